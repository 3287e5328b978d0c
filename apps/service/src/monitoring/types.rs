use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Prefix of the placeholder snapshot written when a host stops answering
pub const UNREACHABLE_SENTINEL: &str = "Unreachable:";

/// Health status of a monitored host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Ok,
    Failing,
    Pending,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostStatus::Ok => write!(f, "ok"),
            HostStatus::Failing => write!(f, "failing"),
            HostStatus::Pending => write!(f, "pending"),
        }
    }
}

impl FromStr for HostStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ok" => Ok(HostStatus::Ok),
            "failing" => Ok(HostStatus::Failing),
            "pending" => Ok(HostStatus::Pending),
            other => Err(format!("unknown host status '{other}'")),
        }
    }
}

/// One latency / packet-loss measurement from the terminal hop
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Average round trip in milliseconds
    pub latency: Option<f64>,
    /// Packet loss in percent
    pub loss: Option<f64>,
}

impl Sample {
    /// Whether there is anything worth recording
    pub fn is_empty(&self) -> bool {
        self.latency.is_none() && self.loss.is_none()
    }
}

/// Structured result of parsing one diagnostic report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedReport {
    /// Timing-free route used for change comparison
    pub route_snapshot: String,
    pub sample: Sample,
    /// No header row was found; the snapshot is the raw output
    pub degenerate: bool,
}

/// Outcome of comparing a new snapshot with the stored baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeDecision {
    FirstBaseline,
    Changed,
    Unchanged,
}

impl ChangeDecision {
    /// Whether a history entry has to be written
    pub fn should_record(self) -> bool {
        !matches!(self, ChangeDecision::Unchanged)
    }
}

/// What one check did to a host
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// Diagnostic succeeded; host is `ok`
    Healthy { decision: ChangeDecision, sample_recorded: bool },
    /// First failure in a row; host is now `failing`
    Failing { error: String },
    /// Second failure in a row; host must be removed at the end of the cycle
    Retire { error: String },
    /// Host disappeared between listing and checking
    Missing,
}
