//! Two-strikes host lifecycle.
//!
//! ```text
//! pending -> ok <-> failing -> (removed)
//! ```
//!
//! Any run that does not end in a diagnostic error counts as a success, even
//! when the report carried no usable sample.

use super::types::HostStatus;

/// What a failed run does to a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Record the failure and keep monitoring
    MarkFailing,
    /// Second consecutive failure; remove the host at the end of the cycle
    Retire,
}

/// Status after a successful run, whatever the status before it.
pub fn on_success() -> HostStatus {
    HostStatus::Ok
}

/// Decide what a failed run does, given the status before the run.
pub fn on_failure(current: HostStatus) -> FailureAction {
    match current {
        HostStatus::Failing => FailureAction::Retire,
        HostStatus::Ok | HostStatus::Pending => FailureAction::MarkFailing,
    }
}
