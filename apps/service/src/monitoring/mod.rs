/// Monitoring engine module - drives route diagnostics for every host
///
/// This module is responsible for:
/// - Running the external diagnostic utility
/// - Parsing reports into route snapshots and samples
/// - Detecting route changes and applying the host lifecycle
/// - Scheduling check cycles
pub mod checker;
pub mod detector;
pub mod executor;
pub mod lifecycle;
pub mod parser;
pub mod scheduler;
pub mod types;
pub mod validation;

pub use checker::HostChecker;
pub use executor::{DiagnosticError, DiagnosticExecutor, MtrExecutor};
pub use scheduler::MonitoringScheduler;
