use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use super::checker::HostChecker;
use super::types::CheckOutcome;
use crate::database::Database;
use crate::database::models::Host;

/// State carried from one cycle to the next
#[derive(Debug, Default)]
pub struct CycleContext {
    /// Completion time of the last finished cycle
    pub last_cycle: Option<DateTime<Utc>>,
    /// Hosts retired during the current cycle, deleted when it ends
    pub pending_removal: BTreeSet<String>,
}

/// Summary of one cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub checked: usize,
    pub failing: usize,
    pub removed: u64,
    pub errors: usize,
}

/// Monitoring scheduler - runs one check cycle over every host per tick
pub struct MonitoringScheduler {
    database: Arc<dyn Database>,
    checker: Arc<HostChecker>,
    max_concurrency: usize,
    last_cycle_tx: watch::Sender<Option<DateTime<Utc>>>,
}

impl MonitoringScheduler {
    /// Create a new monitoring scheduler.
    ///
    /// `max_concurrency` of 1 checks hosts strictly one after another.
    pub fn new(database: Arc<dyn Database>, checker: Arc<HostChecker>, max_concurrency: usize) -> Self {
        let (last_cycle_tx, _) = watch::channel(None);
        Self { database, checker, max_concurrency: max_concurrency.max(1), last_cycle_tx }
    }

    /// Receiver for the completion time of the latest cycle
    pub fn subscribe(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_cycle_tx.subscribe()
    }

    /// Run one cycle.
    ///
    /// Per-host failures are logged and counted; only failing to list hosts
    /// aborts the cycle.
    pub async fn run_cycle(&self, ctx: &mut CycleContext) -> Result<CycleReport> {
        let started = Instant::now();
        let hosts = self.database.list_hosts().await?;
        let mut report = CycleReport::default();

        info!(hosts = hosts.len(), "Starting check cycle");

        if self.max_concurrency == 1 {
            for host in &hosts {
                let outcome = self.checker.check_host(host).await;
                Self::absorb(ctx, &mut report, host, &outcome);
            }
        } else {
            let checker = self.checker.clone();
            let outcomes: Vec<(Host, Result<CheckOutcome>)> = stream::iter(hosts)
                .map(move |host| {
                    let checker = checker.clone();
                    async move {
                        let outcome = checker.check_host(&host).await;
                        (host, outcome)
                    }
                })
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;

            for (host, outcome) in &outcomes {
                Self::absorb(ctx, &mut report, host, outcome);
            }
        }

        report.removed = self.apply_removals(ctx).await;

        let finished = Utc::now();
        ctx.last_cycle = Some(finished);
        self.last_cycle_tx.send_replace(Some(finished));

        info!(
            checked = report.checked,
            failing = report.failing,
            removed = report.removed,
            errors = report.errors,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Check cycle completed"
        );

        Ok(report)
    }

    /// Fold one host's outcome into the cycle. A mark left over from a failed
    /// delete is dropped once the host is no longer retiring.
    fn absorb(ctx: &mut CycleContext, report: &mut CycleReport, host: &Host, outcome: &Result<CheckOutcome>) {
        match outcome {
            Ok(CheckOutcome::Missing) => {
                debug!(destination = %host.destination, "Host vanished before its check");
                ctx.pending_removal.remove(&host.destination);
            }
            Ok(CheckOutcome::Healthy { .. }) => {
                report.checked += 1;
                ctx.pending_removal.remove(&host.destination);
            }
            Ok(CheckOutcome::Failing { .. }) => {
                report.checked += 1;
                report.failing += 1;
                ctx.pending_removal.remove(&host.destination);
            }
            Ok(CheckOutcome::Retire { .. }) => {
                report.checked += 1;
                report.failing += 1;
                ctx.pending_removal.insert(host.destination.clone());
            }
            Err(e) => {
                report.checked += 1;
                report.errors += 1;
                error!(destination = %host.destination, "Failed to process host: {:#}", e);
            }
        }
    }

    /// Delete every host retired this cycle in one batch. Marks survive a
    /// failed delete and are retried next cycle.
    async fn apply_removals(&self, ctx: &mut CycleContext) -> u64 {
        if ctx.pending_removal.is_empty() {
            return 0;
        }

        let destinations: Vec<String> = ctx.pending_removal.iter().cloned().collect();
        match self.database.delete_hosts(&destinations).await {
            Ok(removed) => {
                for destination in &destinations {
                    info!(destination = %destination, "Retired host after consecutive failures");
                }
                ctx.pending_removal.clear();
                removed
            }
            Err(e) => {
                warn!("Failed to remove retired hosts, retrying next cycle: {:#}", e);
                0
            }
        }
    }

    /// Start the periodic cycle loop
    pub fn start(self: Arc<Self>, interval_seconds: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(interval_seconds);
            let mut timer = interval_at(tokio::time::Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ctx = CycleContext::default();

            info!("Check cycle scheduled every {}s", interval_seconds);

            loop {
                timer.tick().await;

                match self.run_cycle(&mut ctx).await {
                    Ok(report) => debug!(?report, "Cycle finished"),
                    Err(e) => error!("Check cycle aborted: {:#}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{LogEntry, Metric, NewHost, NewLogEntry, NewMetric, PurgeCounts};
    use crate::database::repository::tests::create_test_database;
    use crate::monitoring::checker::tests::{ScriptedExecutor, report};
    use crate::monitoring::types::HostStatus;

    async fn setup(
        destinations: &[&str],
        max_concurrency: usize,
    ) -> Result<(MonitoringScheduler, Arc<ScriptedExecutor>, Arc<crate::database::DatabaseImpl>, tempfile::TempDir)>
    {
        let (db, dir) = create_test_database().await?;
        let category_id = db.insert_category("General").await?;
        for destination in destinations {
            db.insert_host(&NewHost {
                destination: destination.to_string(),
                title: destination.to_string(),
                category_id,
            })
            .await?;
        }
        let executor = Arc::new(ScriptedExecutor::default());
        let checker = Arc::new(HostChecker::new(db.clone(), executor.clone()));
        let scheduler = MonitoringScheduler::new(db.clone(), checker, max_concurrency);
        Ok((scheduler, executor, db, dir))
    }

    #[tokio::test]
    async fn test_empty_host_list_still_stamps_cycle() -> Result<()> {
        let (scheduler, executor, _db, _dir) = setup(&[], 1).await?;
        let rx = scheduler.subscribe();
        let mut ctx = CycleContext::default();

        let report = scheduler.run_cycle(&mut ctx).await?;

        assert_eq!(report, CycleReport::default());
        assert!(ctx.last_cycle.is_some());
        assert_eq!(*rx.borrow(), ctx.last_cycle);
        assert!(executor.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_hosts_are_checked_in_order() -> Result<()> {
        let (scheduler, executor, _db, _dir) = setup(&["a.example", "b.example", "c.example"], 1).await?;
        for destination in ["a.example", "b.example", "c.example"] {
            executor.push_ok(destination, report(&[destination], 1.0));
        }
        let mut ctx = CycleContext::default();

        let report = scheduler.run_cycle(&mut ctx).await?;

        assert_eq!(report.checked, 3);
        assert_eq!(executor.calls(), vec!["a.example", "b.example", "c.example"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_retirement_after_two_failing_cycles() -> Result<()> {
        let (scheduler, executor, db, _dir) = setup(&["10.0.0.1", "10.0.0.2"], 1).await?;
        executor.push_ok("10.0.0.1", report(&["10.0.0.1"], 1.0));
        executor.push_ok("10.0.0.1", report(&["10.0.0.1"], 1.0));
        executor.push_ok("10.0.0.1", report(&["10.0.0.1"], 1.0));
        executor.push_ok("10.0.0.2", report(&["10.0.0.2"], 1.0));
        executor.push_err("10.0.0.2", "unreachable");
        executor.push_err("10.0.0.2", "unreachable");
        let mut ctx = CycleContext::default();

        scheduler.run_cycle(&mut ctx).await?;
        assert_eq!(db.get_host("10.0.0.2").await?.unwrap().status, HostStatus::Ok);

        let second = scheduler.run_cycle(&mut ctx).await?;
        assert_eq!(second.failing, 1);
        assert_eq!(db.get_host("10.0.0.2").await?.unwrap().status, HostStatus::Failing);

        let third = scheduler.run_cycle(&mut ctx).await?;
        assert_eq!(third.removed, 1);
        assert!(ctx.pending_removal.is_empty());
        let remaining: Vec<_> = db.list_hosts().await?.into_iter().map(|h| h.destination).collect();
        assert_eq!(remaining, vec!["10.0.0.1".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_bounded_parallel_cycle_checks_everything() -> Result<()> {
        let destinations = ["a.example", "b.example", "c.example", "d.example"];
        let (scheduler, executor, db, _dir) = setup(&destinations, 3).await?;
        for destination in destinations {
            executor.push_ok(destination, report(&[destination], 2.0));
        }
        let mut ctx = CycleContext::default();

        let report = scheduler.run_cycle(&mut ctx).await?;

        assert_eq!(report.checked, 4);
        assert_eq!(report.errors, 0);
        let mut calls = executor.calls();
        calls.sort();
        assert_eq!(calls, destinations.to_vec());
        assert!(db.list_hosts().await?.iter().all(|h| h.status == HostStatus::Ok));
        Ok(())
    }

    #[tokio::test]
    async fn test_parallel_cycle_runs_in_spawned_task() -> Result<()> {
        let destinations = ["a.example", "b.example"];
        let (scheduler, executor, _db, _dir) = setup(&destinations, 2).await?;
        for destination in destinations {
            executor.push_ok(destination, report(&[destination], 1.0));
        }
        let scheduler = Arc::new(scheduler);

        let task = tokio::spawn({
            let scheduler = scheduler.clone();
            async move {
                let mut ctx = CycleContext::default();
                scheduler.run_cycle(&mut ctx).await
            }
        });

        assert_eq!(task.await??.checked, 2);
        Ok(())
    }

    /// Delegates to the real store but fails the first batch delete
    struct FailFirstDelete {
        inner: Arc<crate::database::DatabaseImpl>,
        failures_left: std::sync::Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl Database for FailFirstDelete {
        async fn list_categories(&self) -> Result<Vec<crate::database::models::Category>> {
            self.inner.list_categories().await
        }
        async fn get_category(&self, name: &str) -> Result<Option<crate::database::models::Category>> {
            self.inner.get_category(name).await
        }
        async fn insert_category(&self, name: &str) -> Result<i64> {
            self.inner.insert_category(name).await
        }
        async fn delete_category(&self, id: i64) -> Result<()> {
            self.inner.delete_category(id).await
        }
        async fn reassign_hosts(&self, from_category: i64, to_category: i64) -> Result<u64> {
            self.inner.reassign_hosts(from_category, to_category).await
        }
        async fn list_hosts(&self) -> Result<Vec<Host>> {
            self.inner.list_hosts().await
        }
        async fn get_host(&self, destination: &str) -> Result<Option<Host>> {
            self.inner.get_host(destination).await
        }
        async fn insert_host(&self, host: &NewHost) -> Result<i64> {
            self.inner.insert_host(host).await
        }
        async fn update_host_status(&self, host_id: i64, status: HostStatus) -> Result<()> {
            self.inner.update_host_status(host_id, status).await
        }
        async fn delete_hosts(&self, destinations: &[String]) -> Result<u64> {
            {
                let mut failures_left = self.failures_left.lock().unwrap();
                if *failures_left > 0 {
                    *failures_left -= 1;
                    anyhow::bail!("database is locked");
                }
            }
            self.inner.delete_hosts(destinations).await
        }
        async fn latest_log(&self, host_id: i64) -> Result<Option<LogEntry>> {
            self.inner.latest_log(host_id).await
        }
        async fn latest_route_log(&self, host_id: i64, sentinel_prefix: &str) -> Result<Option<LogEntry>> {
            self.inner.latest_route_log(host_id, sentinel_prefix).await
        }
        async fn recent_logs(&self, host_id: i64, limit: usize) -> Result<Vec<LogEntry>> {
            self.inner.recent_logs(host_id, limit).await
        }
        async fn append_log(&self, host_id: i64, entry: &NewLogEntry) -> Result<i64> {
            self.inner.append_log(host_id, entry).await
        }
        async fn record_metric(&self, host_id: i64, metric: &NewMetric) -> Result<i64> {
            self.inner.record_metric(host_id, metric).await
        }
        async fn metrics_in_range(
            &self,
            host_id: i64,
            start: Option<DateTime<Utc>>,
            end: Option<DateTime<Utc>>,
        ) -> Result<Vec<Metric>> {
            self.inner.metrics_in_range(host_id, start, end).await
        }
        async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeCounts> {
            self.inner.purge_before(cutoff).await
        }
    }

    #[tokio::test]
    async fn test_recovered_host_survives_failed_removal() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let category_id = db.insert_category("General").await?;
        db.insert_host(&NewHost { destination: "10.0.0.1".into(), title: "r1".into(), category_id }).await?;

        let store: Arc<dyn Database> =
            Arc::new(FailFirstDelete { inner: db.clone(), failures_left: std::sync::Mutex::new(1) });
        let executor = Arc::new(ScriptedExecutor::default());
        executor.push_err("10.0.0.1", "no route");
        executor.push_err("10.0.0.1", "no route");
        executor.push_ok("10.0.0.1", report(&["10.0.0.1"], 1.0));
        let checker = Arc::new(HostChecker::new(store.clone(), executor.clone()));
        let scheduler = MonitoringScheduler::new(store, checker, 1);
        let mut ctx = CycleContext::default();

        scheduler.run_cycle(&mut ctx).await?;
        let second = scheduler.run_cycle(&mut ctx).await?;
        assert_eq!(second.removed, 0);
        assert!(ctx.pending_removal.contains("10.0.0.1"));

        let third = scheduler.run_cycle(&mut ctx).await?;
        assert_eq!(third.removed, 0);
        assert!(ctx.pending_removal.is_empty());
        assert_eq!(db.get_host("10.0.0.1").await?.unwrap().status, HostStatus::Ok);
        Ok(())
    }

    #[tokio::test]
    async fn test_still_failing_host_is_removed_on_retry() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let category_id = db.insert_category("General").await?;
        db.insert_host(&NewHost { destination: "10.0.0.1".into(), title: "r1".into(), category_id }).await?;

        let store: Arc<dyn Database> =
            Arc::new(FailFirstDelete { inner: db.clone(), failures_left: std::sync::Mutex::new(1) });
        let executor = Arc::new(ScriptedExecutor::default());
        for _ in 0..3 {
            executor.push_err("10.0.0.1", "no route");
        }
        let checker = Arc::new(HostChecker::new(store.clone(), executor));
        let scheduler = MonitoringScheduler::new(store, checker, 1);
        let mut ctx = CycleContext::default();

        scheduler.run_cycle(&mut ctx).await?;
        scheduler.run_cycle(&mut ctx).await?;
        let third = scheduler.run_cycle(&mut ctx).await?;

        assert_eq!(third.removed, 1);
        assert!(db.get_host("10.0.0.1").await?.is_none());
        Ok(())
    }

    #[test]
    fn test_missing_host_is_not_counted_as_checked() {
        let host = Host {
            id: 1,
            destination: "gone.example".into(),
            title: "gone".into(),
            category_id: 1,
            category: "General".into(),
            status: HostStatus::Failing,
            created_at: Utc::now(),
        };
        let mut ctx = CycleContext::default();
        ctx.pending_removal.insert(host.destination.clone());
        let mut report = CycleReport::default();

        MonitoringScheduler::absorb(&mut ctx, &mut report, &host, &Ok(CheckOutcome::Missing));

        assert_eq!(report, CycleReport::default());
        assert!(ctx.pending_removal.is_empty());
    }
}
