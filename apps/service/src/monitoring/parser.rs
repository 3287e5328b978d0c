//! Turns an `mtr --report` into a comparable route snapshot and a sample.
//!
//! ```text
//! Start: 2024-05-01T10:00:00+0000
//! HOST: probe                      Loss%   Snt   Last   Avg  Best  Wrst StDev
//!   1.|-- 10.0.0.1                  0.0%     3    0.4   0.5   0.4   0.6   0.1
//!   2.|-- 192.0.2.7                 0.0%     3   11.2  11.9  11.2  12.8   0.8
//! ```
//!
//! Parsing happens in two stages: [`locate_header`] finds the row holding the
//! loss column, then hop rows are sliced at that column. Everything from the
//! loss column onwards is volatile, so only hop identities end up in the
//! snapshot.

use super::types::{ParsedReport, Sample};

/// Column label marking the first volatile column
pub const LOSS_COLUMN: &str = "Loss%";

/// Fields between the loss token and the average latency (Snt, Last, Avg)
const AVG_OFFSET: usize = 3;

/// Header position within the report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Index of the header line
    pub line: usize,
    /// Byte offset of the loss column within a line
    pub loss_column: usize,
}

/// Find the header row holding the loss column.
pub fn locate_header(lines: &[&str]) -> Option<Header> {
    lines.iter().enumerate().find_map(|(line, text)| {
        text.find(LOSS_COLUMN).map(|loss_column| Header { line, loss_column })
    })
}

/// Parse a raw report.
///
/// Without a header the whole output becomes the snapshot and no sample is
/// produced.
pub fn parse_report(raw: &str) -> ParsedReport {
    // Only trailing whitespace is trimmed; leading spaces carry column offsets
    let lines: Vec<&str> = raw.trim_end().lines().collect();

    let Some(header) = locate_header(&lines) else {
        return ParsedReport { route_snapshot: raw.to_string(), sample: Sample::default(), degenerate: true };
    };

    let hops: Vec<&str> = lines[header.line + 1..]
        .iter()
        .copied()
        .filter(|line| !line.trim().is_empty())
        .collect();

    let route_snapshot = hops
        .iter()
        .map(|line| strip_volatile_columns(line, header.loss_column))
        .collect::<Vec<_>>()
        .join("\n");

    let sample = hops.last().map(|line| extract_sample(line)).unwrap_or_default();

    ParsedReport { route_snapshot, sample, degenerate: false }
}

/// Cut a hop line at the loss column and drop trailing whitespace.
fn strip_volatile_columns(line: &str, loss_column: usize) -> &str {
    line.get(..loss_column).unwrap_or(line).trim_end()
}

/// Read loss and average latency from a hop line.
///
/// Missing or malformed fields are left as `None`.
pub fn extract_sample(line: &str) -> Sample {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let Some(loss_index) = tokens.iter().position(|token| token.contains('%')) else {
        return Sample::default();
    };

    let loss = tokens[loss_index].trim_end_matches('%').parse::<f64>().ok().filter(|v| v.is_finite());
    let latency = tokens
        .get(loss_index + AVG_OFFSET)
        .and_then(|token| token.parse::<f64>().ok())
        .filter(|v| v.is_finite());

    Sample { latency, loss }
}
