/// Orchestrator module - coordinates all components
///
/// The orchestrator is the core coordinator that:
/// - Opens the store and wires the monitoring pipeline together
/// - Runs the check scheduler and the retention sweeper as background tasks
/// - Exposes host, category and metric operations to the outer layers
///
/// ## Seed import
/// The `import` submodule reads the seed list consumed once at startup.
///
/// ## Retention
/// The `retention` submodule purges history and metrics past the horizon.
pub mod import;
pub mod retention;


pub use retention::{RetentionPolicy, RetentionSweeper};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::models::{Host, NewHost};
use crate::database::{Database, DatabaseImpl, initialize_database};
use crate::error::{EngineError, EngineResult};
use crate::metrics::{self, MetricPoint};
use crate::monitoring::types::{CheckOutcome, HostStatus, UNREACHABLE_SENTINEL};
use crate::monitoring::validation::validate_destination;
use crate::monitoring::{DiagnosticExecutor, HostChecker, MonitoringScheduler, MtrExecutor};
use crate::pool::open_pool;

/// Host as listed to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostSummary {
    pub destination: String,
    pub title: String,
    pub category: String,
    pub status: HostStatus,
}

impl From<&Host> for HostSummary {
    fn from(host: &Host) -> Self {
        Self {
            destination: host.destination.clone(),
            title: host.title.clone(),
            category: host.category.clone(),
            status: host.status,
        }
    }
}

/// One entry of a host's route history
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub snapshot: String,
    pub is_change: bool,
}

/// Host with its current route and recent history
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDetail {
    pub destination: String,
    pub title: String,
    pub category: String,
    pub status: HostStatus,
    /// Most recent successfully parsed route
    pub last_snapshot: Option<String>,
    /// Failure placeholder while the host is unreachable
    pub unreachable: Option<String>,
    /// Newest first
    pub history: Vec<HistoryEntry>,
}

/// Main orchestrator for the tracewatch service
pub struct Orchestrator {
    config: Arc<Config>,
    database: Arc<dyn Database>,
    checker: Arc<HostChecker>,
    scheduler: Arc<MonitoringScheduler>,
    last_cycle_rx: watch::Receiver<Option<DateTime<Utc>>>,
    /// Out-of-band checks started by `add_host`
    pending_checks: Mutex<Vec<JoinHandle<()>>>,
    task_handles: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Open the configured database, run migrations and wire up the `mtr`
    /// executor.
    pub async fn open(config: Config) -> Result<Self> {
        info!("Opening database {}", config.database.path.display());
        let pool = open_pool(&config.database.path, config.database.pool_size)
            .await
            .with_context(|| format!("failed to open database {}", config.database.path.display()))?;

        {
            let conn = pool.get().await?;
            info!("Initializing database schema...");
            initialize_database(&conn).await?;
        }

        let database: Arc<dyn Database> = Arc::new(DatabaseImpl::new_from_pool(pool));
        let executor: Arc<dyn DiagnosticExecutor> = Arc::new(MtrExecutor::new(
            config.monitoring.mtr_path.clone(),
            config.monitoring.probe_count,
            config.monitoring.timeout_seconds,
        ));

        Self::new(config, database, executor).await
    }

    /// Create an orchestrator over existing components.
    ///
    /// Makes sure the default category exists.
    pub async fn new(
        config: Config,
        database: Arc<dyn Database>,
        executor: Arc<dyn DiagnosticExecutor>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let checker = Arc::new(HostChecker::new(database.clone(), executor));
        let scheduler = Arc::new(MonitoringScheduler::new(
            database.clone(),
            checker.clone(),
            config.monitoring.max_concurrency,
        ));
        let last_cycle_rx = scheduler.subscribe();

        let orchestrator = Self {
            config,
            database,
            checker,
            scheduler,
            last_cycle_rx,
            pending_checks: Mutex::new(Vec::new()),
            task_handles: Vec::new(),
        };
        orchestrator.ensure_category(&orchestrator.config.hosts.default_category).await?;

        Ok(orchestrator)
    }

    /// Start the check scheduler and the retention sweeper
    pub fn start(&mut self) {
        if !self.task_handles.is_empty() {
            warn!("Background tasks already running");
            return;
        }

        let monitoring = &self.config.monitoring;
        if monitoring.max_concurrency > 1 {
            warn!(
                "Checking up to {} hosts in parallel; the default is one at a time",
                monitoring.max_concurrency
            );
        }
        self.task_handles.push(self.scheduler.clone().start(monitoring.interval_seconds));

        let policy = RetentionPolicy::from(&self.config.retention);
        info!("Retention policy: {} months, swept every {}h", policy.horizon_months, policy.sweep_interval_hours);
        let sweeper = Arc::new(RetentionSweeper::new(self.database.clone(), policy));
        self.task_handles.push(sweeper.start_periodic_sweep());
    }

    /// Stop background tasks and wait for out-of-band checks
    pub async fn shutdown(self) {
        for handle in &self.task_handles {
            handle.abort();
        }
        self.wait_for_pending_checks().await;
        info!("Orchestrator stopped");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<MonitoringScheduler> {
        &self.scheduler
    }

    pub fn retention_sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(self.database.clone(), RetentionPolicy::from(&self.config.retention))
    }

    /// Completion time of the latest check cycle, `None` before the first one
    pub fn last_cycle_timestamp(&self) -> Option<DateTime<Utc>> {
        *self.last_cycle_rx.borrow()
    }

    pub async fn list_hosts(&self) -> EngineResult<Vec<HostSummary>> {
        let hosts = self.database.list_hosts().await?;
        Ok(hosts.iter().map(HostSummary::from).collect())
    }

    pub async fn get_host(&self, destination: &str) -> EngineResult<HostDetail> {
        let host = self.find_host(destination).await?;
        let history = self.database.recent_logs(host.id, self.config.monitoring.history_limit).await?;
        let last_route = self.database.latest_route_log(host.id, UNREACHABLE_SENTINEL).await?;
        let latest = self.database.latest_log(host.id).await?;

        let unreachable = latest
            .filter(|entry| entry.snapshot.starts_with(UNREACHABLE_SENTINEL))
            .map(|entry| entry.snapshot);

        Ok(HostDetail {
            destination: host.destination,
            title: host.title,
            category: host.category,
            status: host.status,
            last_snapshot: last_route.map(|entry| entry.snapshot),
            unreachable,
            history: history
                .into_iter()
                .map(|entry| HistoryEntry {
                    timestamp: entry.timestamp,
                    snapshot: entry.snapshot,
                    is_change: entry.is_change,
                })
                .collect(),
        })
    }

    /// Metric series of a host, bucketed hourly for windows above a day
    pub async fn get_metrics(
        &self,
        destination: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<MetricPoint>> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(EngineError::InvalidRange { start, end });
            }
        }

        let host = self.find_host(destination).await?;
        let samples = self.database.metrics_in_range(host.id, start, end).await?;
        Ok(metrics::shape_series(&samples, start, end))
    }

    /// Add a host and start an immediate out-of-band check.
    pub async fn add_host(
        &self,
        destination: &str,
        title: Option<&str>,
        category: Option<&str>,
    ) -> EngineResult<HostSummary> {
        let destination = destination.trim();
        validate_destination(destination).map_err(|reason| EngineError::InvalidDestination {
            destination: destination.to_string(),
            reason,
        })?;

        if self.database.get_host(destination).await?.is_some() {
            return Err(EngineError::Conflict { entity: "Host", key: destination.to_string() });
        }

        let category = category
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(self.config.hosts.default_category.as_str());
        let category_id = self.ensure_category(category).await?;
        let title = title.map(str::trim).filter(|t| !t.is_empty()).unwrap_or(destination);

        self.database
            .insert_host(&NewHost { destination: destination.to_string(), title: title.to_string(), category_id })
            .await?;
        info!(destination, category, "Host added");

        self.spawn_check(destination.to_string());

        Ok(HostSummary {
            destination: destination.to_string(),
            title: title.to_string(),
            category: category.to_string(),
            status: HostStatus::Pending,
        })
    }

    /// Remove a host immediately, with its history and metrics
    pub async fn delete_host(&self, destination: &str) -> EngineResult<()> {
        let removed = self.database.delete_hosts(&[destination.to_string()]).await?;
        if removed == 0 {
            return Err(EngineError::host_not_found(destination));
        }
        info!(destination, "Host removed");
        Ok(())
    }

    pub async fn list_categories(&self) -> EngineResult<Vec<String>> {
        let categories = self.database.list_categories().await?;
        Ok(categories.into_iter().map(|c| c.name).collect())
    }

    pub async fn add_category(&self, name: &str) -> EngineResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::EmptyCategoryName);
        }
        if self.database.get_category(name).await?.is_some() {
            return Err(EngineError::Conflict { entity: "Category", key: name.to_string() });
        }
        self.database.insert_category(name).await?;
        info!(category = name, "Category added");
        Ok(())
    }

    /// Delete a category; its hosts move to the default category.
    pub async fn delete_category(&self, name: &str) -> EngineResult<()> {
        let default_name = &self.config.hosts.default_category;
        if name == default_name {
            return Err(EngineError::ProtectedCategory(name.to_string()));
        }

        let category = self
            .database
            .get_category(name)
            .await?
            .ok_or_else(|| EngineError::category_not_found(name))?;
        let default_id = self.ensure_category(default_name).await?;

        let moved = self.database.reassign_hosts(category.id, default_id).await?;
        self.database.delete_category(category.id).await?;
        info!(category = name, moved, "Category removed");
        Ok(())
    }

    /// Wait until every out-of-band check started so far has finished
    pub async fn wait_for_pending_checks(&self) {
        let handles: Vec<_> = match self.pending_checks.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Out-of-band check task failed: {}", e);
            }
        }
    }

    fn spawn_check(&self, destination: String) {
        let checker = self.checker.clone();
        let handle = tokio::spawn(async move {
            match checker.check_destination(&destination).await {
                Ok(CheckOutcome::Retire { .. }) => {
                    // Removal only happens at the end of a scheduler cycle
                    debug!(%destination, "Out-of-band check failed again, leaving removal to the scheduler")
                }
                Ok(outcome) => debug!(%destination, ?outcome, "Out-of-band check finished"),
                Err(e) => error!(%destination, "Out-of-band check failed: {:#}", e),
            }
        });

        match self.pending_checks.lock() {
            Ok(mut pending) => {
                pending.retain(|h| !h.is_finished());
                pending.push(handle);
            }
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }

    async fn find_host(&self, destination: &str) -> EngineResult<Host> {
        self.database
            .get_host(destination)
            .await?
            .ok_or_else(|| EngineError::host_not_found(destination))
    }

    async fn ensure_category(&self, name: &str) -> Result<i64> {
        match self.database.get_category(name).await? {
            Some(category) => Ok(category.id),
            None => {
                let id = self.database.insert_category(name).await?;
                info!(category = name, "Category created");
                Ok(id)
            }
        }
    }
}
