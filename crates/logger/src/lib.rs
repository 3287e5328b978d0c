//! Shared tracing setup for the tracewatch binaries.

mod subscriber;

pub use subscriber::{LogFormat, init};
