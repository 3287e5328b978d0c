use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::types::HostStatus;

/// Category grouping monitored hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

/// Host row joined with its category name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub destination: String,
    pub title: String,
    pub category_id: i64,
    pub category: String,
    pub status: HostStatus,
    pub created_at: DateTime<Utc>,
}

/// Host to be inserted
#[derive(Debug, Clone)]
pub struct NewHost {
    pub destination: String,
    pub title: String,
    pub category_id: i64,
}

/// Route snapshot stored for a host; the newest entry is its baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub host_id: i64,
    pub timestamp: DateTime<Utc>,
    pub snapshot: String,
    pub is_change: bool,
}

#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub timestamp: DateTime<Utc>,
    pub snapshot: String,
    pub is_change: bool,
}

/// One latency / packet-loss sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: i64,
    pub host_id: i64,
    pub timestamp: DateTime<Utc>,
    pub latency: Option<f64>,
    pub packet_loss: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NewMetric {
    pub timestamp: DateTime<Utc>,
    pub latency: Option<f64>,
    pub packet_loss: Option<f64>,
}

/// Rows removed by one retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeCounts {
    pub logs: u64,
    pub metrics: u64,
}

pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
