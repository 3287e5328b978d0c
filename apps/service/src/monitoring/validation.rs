//! Input validation for destinations and monitoring settings.
//!
//! Destinations are handed to an external process, so they are checked
//! against a restricted charset before anything is spawned.

use anyhow::{Result, anyhow};

/// Longest accepted destination (a fully qualified domain name)
const MAX_DESTINATION_LEN: usize = 253;

/// Reasons a destination is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DestinationError {
    #[error("destination is empty")]
    Empty,
    #[error("destination is {0} characters long (maximum 253)")]
    TooLong(usize),
    #[error("destination contains forbidden character {0:?}")]
    ForbiddenCharacter(char),
    #[error("destination must not start with '-'")]
    LeadingHyphen,
}

/// Validate a host name or IP address before it reaches the diagnostic tool.
///
/// Only ASCII letters, digits, `.`, `-` and `:` are accepted. A leading `-`
/// would be read as a command line flag.
pub fn validate_destination(destination: &str) -> Result<(), DestinationError> {
    if destination.is_empty() {
        return Err(DestinationError::Empty);
    }

    if destination.len() > MAX_DESTINATION_LEN {
        return Err(DestinationError::TooLong(destination.len()));
    }

    if let Some(c) = destination
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':')))
    {
        return Err(DestinationError::ForbiddenCharacter(c));
    }

    if destination.starts_with('-') {
        return Err(DestinationError::LeadingHyphen);
    }

    Ok(())
}

/// Validate check interval
pub fn validate_check_interval(interval_seconds: u64) -> Result<()> {
    const MIN_INTERVAL: u64 = 5;
    const MAX_INTERVAL: u64 = 86400; // 24 hours

    if interval_seconds < MIN_INTERVAL {
        return Err(anyhow!(
            "Check interval too short: {} seconds (minimum: {})",
            interval_seconds,
            MIN_INTERVAL
        ));
    }

    if interval_seconds > MAX_INTERVAL {
        return Err(anyhow!(
            "Check interval too long: {} seconds (maximum: {})",
            interval_seconds,
            MAX_INTERVAL
        ));
    }

    Ok(())
}

/// Validate the per-run diagnostic timeout
pub fn validate_timeout(timeout_seconds: u64) -> Result<()> {
    const MIN_TIMEOUT: u64 = 1;
    const MAX_TIMEOUT: u64 = 600;

    if timeout_seconds < MIN_TIMEOUT {
        return Err(anyhow!(
            "Timeout too short: {} seconds (minimum: {})",
            timeout_seconds,
            MIN_TIMEOUT
        ));
    }

    if timeout_seconds > MAX_TIMEOUT {
        return Err(anyhow!(
            "Timeout too long: {} seconds (maximum: {})",
            timeout_seconds,
            MAX_TIMEOUT
        ));
    }

    Ok(())
}

/// Validate probe rounds per diagnostic run
pub fn validate_probe_count(probe_count: u32) -> Result<()> {
    if !(1..=100).contains(&probe_count) {
        return Err(anyhow!("Probe count must be between 1 and 100, got {}", probe_count));
    }
    Ok(())
}
