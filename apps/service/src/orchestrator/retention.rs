//! Automatic retention and cleanup of route history and metrics.
//!
//! Monitoring log entries and metric samples older than the retention
//! horizon (six months by default) are purged in bulk. The sweep runs once a
//! day as a background task; a failed sweep is logged and retried on the
//! next run.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Months, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RetentionConfig;
use crate::database::Database;
use crate::database::models::PurgeCounts;

/// Retention policy for history and metrics
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Calendar months of data to keep
    pub horizon_months: u32,
    /// Hours between two sweeps
    pub sweep_interval_hours: u64,
    /// Sweep once as soon as the task starts
    pub sweep_on_startup: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { horizon_months: 6, sweep_interval_hours: 24, sweep_on_startup: true }
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            horizon_months: config.horizon_months,
            sweep_interval_hours: config.sweep_interval_hours,
            sweep_on_startup: config.sweep_on_startup,
        }
    }
}

impl RetentionPolicy {
    /// Oldest timestamp that survives a sweep run at `now`
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        now.checked_sub_months(Months::new(self.horizon_months))
            .ok_or_else(|| anyhow!("Retention horizon of {} months is out of range", self.horizon_months))
    }

    fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_hours.max(1) * 3600)
    }
}

/// Cleanup manager for expired history and metrics
pub struct RetentionSweeper {
    database: Arc<dyn Database>,
    policy: RetentionPolicy,
}

impl RetentionSweeper {
    /// Create a new retention sweeper
    pub fn new(database: Arc<dyn Database>, policy: RetentionPolicy) -> Self {
        Self { database, policy }
    }

    /// Purge everything older than the horizon
    pub async fn sweep(&self) -> Result<PurgeCounts> {
        let cutoff = self.policy.cutoff(Utc::now())?;
        debug!("Purging history and metrics older than {}", cutoff);

        let counts = self.database.purge_before(cutoff).await?;

        if counts.logs > 0 || counts.metrics > 0 {
            info!(
                "Retention sweep completed: {} metrics and {} history entries removed",
                counts.metrics, counts.logs
            );
        } else {
            info!("Retention sweep completed: nothing to remove");
        }

        Ok(counts)
    }

    /// Start background sweep task
    pub fn start_periodic_sweep(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.policy.sweep_interval();
            let mut interval = if self.policy.sweep_on_startup {
                tokio::time::interval(period)
            } else {
                tokio::time::interval_at(tokio::time::Instant::now() + period, period)
            };

            info!("Retention sweep scheduled every {}h", self.policy.sweep_interval_hours);

            loop {
                interval.tick().await;

                if let Err(e) = self.sweep().await {
                    warn!("Periodic retention sweep failed: {:#}", e);
                }
            }
        })
    }
}
