use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::detector::{detect_change, unreachable_snapshot};
use super::executor::DiagnosticExecutor;
use super::lifecycle::{self, FailureAction};
use super::parser::parse_report;
use super::types::{ChangeDecision, CheckOutcome, HostStatus};
use crate::database::Database;
use crate::database::models::{Host, NewLogEntry};
use crate::metrics;

/// Runs the full pipeline for one host:
/// diagnostic, parse, change detection, metric recording and lifecycle update.
pub struct HostChecker {
    database: Arc<dyn Database>,
    executor: Arc<dyn DiagnosticExecutor>,
}

impl HostChecker {
    pub fn new(database: Arc<dyn Database>, executor: Arc<dyn DiagnosticExecutor>) -> Self {
        Self { database, executor }
    }

    /// Look the host up again and check it.
    pub async fn check_destination(&self, destination: &str) -> Result<CheckOutcome> {
        match self.database.get_host(destination).await? {
            Some(host) => self.check_host(&host).await,
            None => Ok(CheckOutcome::Missing),
        }
    }

    /// Check one host. Diagnostic failures are folded into the outcome; only
    /// storage errors are returned.
    pub async fn check_host(&self, host: &Host) -> Result<CheckOutcome> {
        match self.executor.run(&host.destination).await {
            Ok(raw) => {
                let now = Utc::now();
                let report = parse_report(&raw.stdout);
                if report.degenerate {
                    warn!(destination = %host.destination, "Report has no header row, storing raw output");
                }

                let baseline = self.database.latest_log(host.id).await?;
                let decision =
                    detect_change(baseline.as_ref().map(|entry| entry.snapshot.as_str()), &report.route_snapshot);

                match decision {
                    ChangeDecision::FirstBaseline => {
                        info!(destination = %host.destination, "Recording first baseline")
                    }
                    ChangeDecision::Changed => info!(destination = %host.destination, "Route change detected"),
                    ChangeDecision::Unchanged => debug!(destination = %host.destination, "Route unchanged"),
                }

                if decision.should_record() {
                    self.database
                        .append_log(
                            host.id,
                            &NewLogEntry { timestamp: now, snapshot: report.route_snapshot, is_change: true },
                        )
                        .await?;
                }

                let sample_recorded =
                    metrics::record_sample(self.database.as_ref(), host.id, &report.sample, now).await?;

                let status = lifecycle::on_success();
                if status != host.status {
                    self.database.update_host_status(host.id, status).await?;
                }

                Ok(CheckOutcome::Healthy { decision, sample_recorded })
            }
            Err(error) => {
                let error = error.to_string();
                warn!(destination = %host.destination, %error, "Diagnostic failed");

                match lifecycle::on_failure(host.status) {
                    FailureAction::MarkFailing => {
                        self.database
                            .append_log(
                                host.id,
                                &NewLogEntry {
                                    timestamp: Utc::now(),
                                    snapshot: unreachable_snapshot(&error),
                                    is_change: false,
                                },
                            )
                            .await?;
                        self.database.update_host_status(host.id, HostStatus::Failing).await?;
                        Ok(CheckOutcome::Failing { error })
                    }
                    FailureAction::Retire => {
                        warn!(destination = %host.destination, "Second consecutive failure, marking for removal");
                        Ok(CheckOutcome::Retire { error })
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::models::NewHost;
    use crate::database::repository::tests::create_test_database;
    use crate::monitoring::executor::{DiagnosticError, RawOutput};
    use crate::monitoring::types::UNREACHABLE_SENTINEL;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Scripted executor: pops the next queued result for a destination.
    /// Destinations without a script fail.
    #[derive(Default)]
    pub(crate) struct ScriptedExecutor {
        scripts: Mutex<HashMap<String, VecDeque<Result<String, String>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        pub(crate) fn push_ok(&self, destination: &str, stdout: impl Into<String>) {
            self.push(destination, Ok(stdout.into()));
        }

        pub(crate) fn push_err(&self, destination: &str, message: &str) {
            self.push(destination, Err(message.to_string()));
        }

        fn push(&self, destination: &str, result: Result<String, String>) {
            self.scripts.lock().unwrap().entry(destination.to_string()).or_default().push_back(result);
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DiagnosticExecutor for ScriptedExecutor {
        async fn run(&self, destination: &str) -> Result<RawOutput, DiagnosticError> {
            self.calls.lock().unwrap().push(destination.to_string());
            let next = self.scripts.lock().unwrap().get_mut(destination).and_then(VecDeque::pop_front);
            match next {
                Some(Ok(stdout)) => Ok(RawOutput { destination: destination.to_string(), stdout }),
                Some(Err(message)) => Err(DiagnosticError::Failed { destination: destination.to_string(), message }),
                None => Err(DiagnosticError::Failed {
                    destination: destination.to_string(),
                    message: "no scripted result".into(),
                }),
            }
        }
    }

    /// Build a report whose hops are the given addresses
    pub(crate) fn report(hops: &[&str], avg: f64) -> String {
        let mut out = String::from(
            "Start: 2024-05-01T10:00:00+0000\nHOST: probe                       Loss%   Snt   Last   Avg  Best  Wrst StDev\n",
        );
        for (i, hop) in hops.iter().enumerate() {
            out.push_str(&format!(
                "{:>3}.|-- {:<24}{:>5.1}%{:>6}{:>7.1}{:>6.1}{:>6.1}{:>6.1}{:>6.1}\n",
                i + 1,
                hop,
                0.0,
                3,
                avg,
                avg,
                avg,
                avg,
                0.1
            ));
        }
        out
    }

    async fn add_host(db: &dyn Database, destination: &str) -> Result<Host> {
        let category_id = db.insert_category("General").await?;
        db.insert_host(&NewHost {
            destination: destination.into(),
            title: destination.into(),
            category_id,
        })
        .await?;
        Ok(db.get_host(destination).await?.expect("host stored"))
    }

    #[test]
    fn test_report_helper_parses() {
        let parsed = parse_report(&report(&["10.0.0.1", "10.0.0.2"], 12.5));
        assert!(!parsed.degenerate);
        assert_eq!(parsed.route_snapshot, "  1.|-- 10.0.0.1\n  2.|-- 10.0.0.2");
        assert_eq!(parsed.sample.latency, Some(12.5));
        assert_eq!(parsed.sample.loss, Some(0.0));
    }

    #[tokio::test]
    async fn test_first_check_records_baseline_and_metric() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let host = add_host(db.as_ref(), "10.0.0.1").await?;
        let executor = Arc::new(ScriptedExecutor::default());
        executor.push_ok("10.0.0.1", report(&["10.0.0.1"], 1.0));
        let checker = HostChecker::new(db.clone(), executor);

        let outcome = checker.check_host(&host).await?;

        assert_eq!(
            outcome,
            CheckOutcome::Healthy { decision: ChangeDecision::FirstBaseline, sample_recorded: true }
        );
        assert_eq!(db.get_host("10.0.0.1").await?.unwrap().status, HostStatus::Ok);
        assert_eq!(db.recent_logs(host.id, 10).await?.len(), 1);
        assert_eq!(db.metrics_in_range(host.id, None, None).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unchanged_then_changed() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let host = add_host(db.as_ref(), "10.0.0.1").await?;
        let executor = Arc::new(ScriptedExecutor::default());
        executor.push_ok("10.0.0.1", report(&["10.0.0.1", "10.0.0.2"], 1.0));
        executor.push_ok("10.0.0.1", report(&["10.0.0.1", "10.0.0.2"], 7.0));
        executor.push_ok("10.0.0.1", report(&["10.0.0.1", "10.0.0.3"], 1.0));
        let checker = HostChecker::new(db.clone(), executor);

        checker.check_destination("10.0.0.1").await?;
        let second = checker.check_destination("10.0.0.1").await?;
        assert!(matches!(second, CheckOutcome::Healthy { decision: ChangeDecision::Unchanged, .. }));
        assert_eq!(db.recent_logs(host.id, 10).await?.len(), 1);

        let third = checker.check_destination("10.0.0.1").await?;
        assert!(matches!(third, CheckOutcome::Healthy { decision: ChangeDecision::Changed, .. }));
        let logs = db.recent_logs(host.id, 10).await?;
        assert_eq!(logs.len(), 2);
        assert!(logs[0].snapshot.ends_with("10.0.0.3"));
        assert_eq!(db.metrics_in_range(host.id, None, None).await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_writes_sentinel_and_recovery_rebaselines() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        add_host(db.as_ref(), "10.0.0.1").await?;
        let executor = Arc::new(ScriptedExecutor::default());
        executor.push_ok("10.0.0.1", report(&["10.0.0.1"], 1.0));
        executor.push_err("10.0.0.1", "no route to host");
        executor.push_ok("10.0.0.1", report(&["10.0.0.1"], 1.0));
        let checker = HostChecker::new(db.clone(), executor);

        checker.check_destination("10.0.0.1").await?;
        let failed = checker.check_destination("10.0.0.1").await?;
        assert!(matches!(failed, CheckOutcome::Failing { .. }));

        let host = db.get_host("10.0.0.1").await?.unwrap();
        assert_eq!(host.status, HostStatus::Failing);
        let latest = db.latest_log(host.id).await?.unwrap();
        assert!(latest.snapshot.starts_with(UNREACHABLE_SENTINEL));
        assert!(latest.snapshot.contains("no route to host"));

        let recovered = checker.check_destination("10.0.0.1").await?;
        assert!(matches!(recovered, CheckOutcome::Healthy { decision: ChangeDecision::FirstBaseline, .. }));
        assert_eq!(db.get_host("10.0.0.1").await?.unwrap().status, HostStatus::Ok);
        Ok(())
    }

    #[tokio::test]
    async fn test_second_failure_retires_without_writes() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let host = add_host(db.as_ref(), "10.0.0.1").await?;
        let executor = Arc::new(ScriptedExecutor::default());
        executor.push_err("10.0.0.1", "timeout");
        executor.push_err("10.0.0.1", "timeout");
        let checker = HostChecker::new(db.clone(), executor);

        assert!(matches!(checker.check_destination("10.0.0.1").await?, CheckOutcome::Failing { .. }));
        assert!(matches!(checker.check_destination("10.0.0.1").await?, CheckOutcome::Retire { .. }));
        assert_eq!(db.recent_logs(host.id, 10).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_degenerate_report_still_succeeds() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let host = add_host(db.as_ref(), "10.0.0.1").await?;
        let executor = Arc::new(ScriptedExecutor::default());
        executor.push_ok("10.0.0.1", "garbled output");
        let checker = HostChecker::new(db.clone(), executor);

        let outcome = checker.check_host(&host).await?;
        assert_eq!(
            outcome,
            CheckOutcome::Healthy { decision: ChangeDecision::FirstBaseline, sample_recorded: false }
        );
        assert_eq!(db.latest_log(host.id).await?.unwrap().snapshot, "garbled output");
        assert!(db.metrics_in_range(host.id, None, None).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_host() -> Result<()> {
        let (db, _dir) = create_test_database().await?;
        let checker = HostChecker::new(db, Arc::new(ScriptedExecutor::default()));
        assert_eq!(checker.check_destination("gone.example").await?, CheckOutcome::Missing);
        Ok(())
    }
}
