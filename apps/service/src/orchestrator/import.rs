//! Seed list import.
//!
//! Two line formats are accepted:
//!
//! ```text
//! 10.0.0.1, Core router, Backbone
//! destination: 192.0.2.10, title: Edge, category: Branch offices
//! ```
//!
//! Blank lines and `#` comments are skipped. `destino:` is accepted as an
//! alias of `destination:`.

use std::path::Path;
use tracing::{info, warn};

use super::Orchestrator;
use crate::error::{EngineError, EngineResult};

/// One host described by the seed list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedEntry {
    pub destination: String,
    pub title: Option<String>,
    pub category: Option<String>,
}

/// Result of importing a seed list
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub existing: usize,
    pub invalid: usize,
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn is_destination_key(key: &str) -> bool {
    matches!(key.trim().to_ascii_lowercase().as_str(), "destination" | "destino")
}

/// Parse one seed line; `None` for blanks, comments and lines without a destination.
pub fn parse_seed_line(line: &str) -> Option<SeedEntry> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let first = line.split(',').next().unwrap_or_default();
    let legacy = first.split_once(':').map(|(key, _)| is_destination_key(key)).unwrap_or(false);

    if legacy {
        parse_key_value_line(line)
    } else {
        let mut parts = line.splitn(3, ',');
        let destination = parts.next().and_then(non_empty)?;
        Some(SeedEntry {
            destination,
            title: parts.next().and_then(non_empty),
            category: parts.next().and_then(non_empty),
        })
    }
}

fn parse_key_value_line(line: &str) -> Option<SeedEntry> {
    let mut entry = SeedEntry { destination: String::new(), title: None, category: None };
    let mut fields = line.split(',');

    while let Some(field) = fields.next() {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "destination" | "destino" => entry.destination = value.trim().to_string(),
            "title" => entry.title = non_empty(value),
            "category" => {
                // Category runs to the end of the line and may contain commas
                let mut category = value.to_string();
                for rest in fields.by_ref() {
                    category.push(',');
                    category.push_str(rest);
                }
                entry.category = non_empty(&category);
            }
            _ => {}
        }
    }

    (!entry.destination.is_empty()).then_some(entry)
}

/// Parse a whole seed list
pub fn parse_seed_list(text: &str) -> Vec<SeedEntry> {
    text.lines().filter_map(parse_seed_line).collect()
}

impl Orchestrator {
    /// Add every seed entry that is not monitored yet.
    pub async fn import_seed_list(&self, text: &str) -> EngineResult<ImportSummary> {
        let mut summary = ImportSummary::default();

        for entry in parse_seed_list(text) {
            match self.add_host(&entry.destination, entry.title.as_deref(), entry.category.as_deref()).await {
                Ok(_) => {
                    info!(destination = %entry.destination, "Imported host");
                    summary.imported += 1;
                }
                Err(EngineError::Conflict { .. }) => summary.existing += 1,
                Err(EngineError::InvalidDestination { destination, reason }) => {
                    warn!(%destination, "Skipping seed entry: {}", reason);
                    summary.invalid += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if summary.imported > 0 {
            info!("{} new hosts imported", summary.imported);
        }

        Ok(summary)
    }

    /// Import a seed file; a missing file is not an error.
    pub async fn import_seed_file(&self, path: &Path) -> EngineResult<ImportSummary> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Seed file {} not found, skipping import", path.display());
                return Ok(ImportSummary::default());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to read seed file {}", path.display()))
                    .into());
            }
        };

        self.import_seed_list(&text)
            .await
            .map_err(|e| match e {
                EngineError::Storage(inner) => {
                    EngineError::Storage(inner.context(format!("failed to import {}", path.display())))
                }
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(destination: &str, title: Option<&str>, category: Option<&str>) -> SeedEntry {
        SeedEntry {
            destination: destination.into(),
            title: title.map(Into::into),
            category: category.map(Into::into),
        }
    }

    #[test]
    fn test_csv_lines() {
        assert_eq!(parse_seed_line("10.0.0.1"), Some(entry("10.0.0.1", None, None)));
        assert_eq!(parse_seed_line(" 10.0.0.1 , Core "), Some(entry("10.0.0.1", Some("Core"), None)));
        assert_eq!(
            parse_seed_line("10.0.0.1, Core router, Backbone"),
            Some(entry("10.0.0.1", Some("Core router"), Some("Backbone")))
        );
        assert_eq!(parse_seed_line("10.0.0.1,,Lab"), Some(entry("10.0.0.1", None, Some("Lab"))));
        assert_eq!(parse_seed_line("2001:db8::1, v6"), Some(entry("2001:db8::1", Some("v6"), None)));
    }

    #[test]
    fn test_key_value_lines() {
        assert_eq!(
            parse_seed_line("destination: 192.0.2.10, title: Edge, category: Branch, North"),
            Some(entry("192.0.2.10", Some("Edge"), Some("Branch, North")))
        );
        assert_eq!(
            parse_seed_line("destino: example.com, category: Web"),
            Some(entry("example.com", None, Some("Web")))
        );
        assert_eq!(
            parse_seed_line("destination: 2001:db8::1"),
            Some(entry("2001:db8::1", None, None))
        );
        assert_eq!(parse_seed_line("destination: , title: nothing"), None);
    }

    #[test]
    fn test_blank_and_comment_lines() {
        let list = "\n# core\n10.0.0.1\n   \n10.0.0.2, R2\n";
        assert_eq!(
            parse_seed_list(list),
            vec![entry("10.0.0.1", None, None), entry("10.0.0.2", Some("R2"), None)]
        );
    }
}
