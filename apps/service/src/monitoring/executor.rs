use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::validation::{DestinationError, validate_destination};

/// Raw text produced by one diagnostic run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub destination: String,
    pub stdout: String,
}

/// Why a diagnostic run produced no report
#[derive(Debug, thiserror::Error)]
pub enum DiagnosticError {
    #[error("invalid destination '{destination}': {reason}")]
    InvalidDestination {
        destination: String,
        #[source]
        reason: DestinationError,
    },

    #[error("diagnostic for {destination} failed: {message}")]
    Failed { destination: String, message: String },

    #[error("failed to launch diagnostic for {destination}: {source}")]
    Spawn {
        destination: String,
        #[source]
        source: std::io::Error,
    },

    #[error("diagnostic for {destination} timed out after {seconds}s")]
    Timeout { destination: String, seconds: u64 },
}

/// Runs the route-diagnostic utility for one destination
#[async_trait]
pub trait DiagnosticExecutor: Send + Sync {
    async fn run(&self, destination: &str) -> Result<RawOutput, DiagnosticError>;
}

/// Executor backed by `mtr` in report mode
pub struct MtrExecutor {
    program: String,
    probe_count: u32,
    timeout_duration: Duration,
}

impl MtrExecutor {
    pub fn new(program: impl Into<String>, probe_count: u32, timeout_seconds: u64) -> Self {
        Self {
            program: program.into(),
            probe_count,
            timeout_duration: Duration::from_secs(timeout_seconds),
        }
    }

    fn arguments(&self, destination: &str) -> Vec<String> {
        let mut args = vec![
            "--report".to_string(),
            "--no-dns".to_string(),
            "--report-cycles".to_string(),
            self.probe_count.to_string(),
            "--aslookup".to_string(),
        ];
        // Literal IPv6 addresses cannot be probed over IPv4
        if !destination.contains(':') {
            args.push("-4".to_string());
        }
        args.push(destination.to_string());
        args
    }
}

#[async_trait]
impl DiagnosticExecutor for MtrExecutor {
    async fn run(&self, destination: &str) -> Result<RawOutput, DiagnosticError> {
        validate_destination(destination).map_err(|reason| DiagnosticError::InvalidDestination {
            destination: destination.to_string(),
            reason,
        })?;

        let mut command = Command::new(&self.program);
        command
            .args(self.arguments(destination))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(destination, program = %self.program, "Spawning diagnostic");

        let output = timeout(self.timeout_duration, command.output())
            .await
            .map_err(|_| DiagnosticError::Timeout {
                destination: destination.to_string(),
                seconds: self.timeout_duration.as_secs(),
            })?
            .map_err(|source| DiagnosticError::Spawn { destination: destination.to_string(), source })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() { output.status.to_string() } else { stderr };
            return Err(DiagnosticError::Failed { destination: destination.to_string(), message });
        }

        Ok(RawOutput {
            destination: destination.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_force_ipv4_for_names() {
        let executor = MtrExecutor::new("mtr", 3, 10);
        let args = executor.arguments("example.com");
        assert_eq!(
            args,
            vec!["--report", "--no-dns", "--report-cycles", "3", "--aslookup", "-4", "example.com"]
        );

        let v6 = executor.arguments("2001:db8::1");
        assert!(!v6.contains(&"-4".to_string()));
        assert_eq!(v6.last().map(String::as_str), Some("2001:db8::1"));
    }

    #[tokio::test]
    async fn test_invalid_destination_never_spawns() {
        // A missing binary would surface as `Spawn`; validation must come first
        let executor = MtrExecutor::new("/nonexistent/mtr", 3, 5);
        let result = executor.run("example.com && reboot").await;
        assert!(matches!(result, Err(DiagnosticError::InvalidDestination { .. })));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let executor = MtrExecutor::new("/nonexistent/mtr", 3, 5);
        let result = executor.run("10.0.0.1").await;
        assert!(matches!(result, Err(DiagnosticError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let executor = MtrExecutor::new("false", 3, 5);
        let result = executor.run("10.0.0.1").await;
        match result {
            Err(DiagnosticError::Failed { destination, message }) => {
                assert_eq!(destination, "10.0.0.1");
                assert!(!message.is_empty());
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_is_captured() {
        let executor = MtrExecutor::new("echo", 3, 5);
        let output = executor.run("10.0.0.1").await.unwrap();
        assert_eq!(output.destination, "10.0.0.1");
        assert!(output.stdout.contains("--report-cycles 3"));
        assert!(output.stdout.trim_end().ends_with("10.0.0.1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hanging_diagnostic_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("slow-mtr");
        std::fs::write(&program, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        let executor = MtrExecutor::new(program.to_string_lossy(), 3, 1);
        let started = std::time::Instant::now();
        let result = executor.run("10.0.0.1").await;

        assert!(matches!(result, Err(DiagnosticError::Timeout { seconds: 1, .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
