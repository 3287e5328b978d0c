//! Metric recording and time-ranged reads.
//!
//! Reads spanning more than a day are collapsed into hourly buckets so long
//! ranges stay cheap to chart; shorter reads return raw samples.

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::database::Database;
use crate::database::models::{Metric, NewMetric};
use crate::monitoring::types::Sample;

const BUCKET_SECONDS: i64 = 3600;

/// Window length above which samples are bucketed
pub fn aggregation_threshold() -> TimeDelta {
    TimeDelta::hours(24)
}

/// One point of a metric series
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub latency: Option<f64>,
    pub packet_loss: Option<f64>,
}

impl From<&Metric> for MetricPoint {
    fn from(metric: &Metric) -> Self {
        Self { timestamp: metric.timestamp, latency: metric.latency, packet_loss: metric.packet_loss }
    }
}

/// Persist a sample; empty samples are skipped. Returns whether a row was written.
pub async fn record_sample(
    database: &dyn Database,
    host_id: i64,
    sample: &Sample,
    at: DateTime<Utc>,
) -> Result<bool> {
    if sample.is_empty() {
        return Ok(false);
    }

    database
        .record_metric(host_id, &NewMetric { timestamp: at, latency: sample.latency, packet_loss: sample.loss })
        .await?;
    Ok(true)
}

/// Whether a query window is long enough to be bucketed.
///
/// Open-ended windows are never bucketed.
pub fn should_aggregate(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
    match (start, end) {
        (Some(start), Some(end)) => end - start > aggregation_threshold(),
        _ => false,
    }
}

/// Shape chronologically ordered metrics for a query window.
pub fn shape_series(
    metrics: &[Metric],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<MetricPoint> {
    if should_aggregate(start, end) {
        aggregate_hourly(metrics)
    } else {
        metrics.iter().map(MetricPoint::from).collect()
    }
}

#[derive(Default)]
struct Bucket {
    latency_sum: f64,
    latency_count: u32,
    loss_sum: f64,
    loss_count: u32,
}

impl Bucket {
    fn add(&mut self, metric: &Metric) {
        if let Some(latency) = metric.latency {
            self.latency_sum += latency;
            self.latency_count += 1;
        }
        if let Some(loss) = metric.packet_loss {
            self.loss_sum += loss;
            self.loss_count += 1;
        }
    }

    fn mean(sum: f64, count: u32) -> Option<f64> {
        (count > 0).then(|| round2(sum / f64::from(count)))
    }
}

/// Collapse samples into UTC hour buckets, earliest first.
///
/// Each field is the mean of the non-null samples in its hour, rounded to two
/// decimals. Hours without samples produce no point.
pub fn aggregate_hourly(metrics: &[Metric]) -> Vec<MetricPoint> {
    let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();

    for metric in metrics {
        let hour = metric.timestamp.timestamp().div_euclid(BUCKET_SECONDS);
        buckets.entry(hour).or_default().add(metric);
    }

    buckets
        .into_iter()
        .filter_map(|(hour, bucket)| {
            let timestamp = DateTime::from_timestamp(hour * BUCKET_SECONDS, 0)?;
            Some(MetricPoint {
                timestamp,
                latency: Bucket::mean(bucket.latency_sum, bucket.latency_count),
                packet_loss: Bucket::mean(bucket.loss_sum, bucket.loss_count),
            })
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
