use super::types::{ChangeDecision, UNREACHABLE_SENTINEL};

/// Compare a fresh snapshot with the host's stored baseline.
///
/// A missing baseline, or one left behind by a failure, makes the new
/// snapshot the reference point. Otherwise the comparison is exact text
/// equality; timing noise was removed by the parser.
pub fn detect_change(baseline: Option<&str>, snapshot: &str) -> ChangeDecision {
    match baseline {
        None => ChangeDecision::FirstBaseline,
        Some(previous) if previous.starts_with(UNREACHABLE_SENTINEL) => ChangeDecision::FirstBaseline,
        Some(previous) if previous != snapshot => ChangeDecision::Changed,
        Some(_) => ChangeDecision::Unchanged,
    }
}

/// Placeholder snapshot recorded when a host stops answering.
pub fn unreachable_snapshot(reason: &str) -> String {
    format!("{UNREACHABLE_SENTINEL} {reason}")
}
