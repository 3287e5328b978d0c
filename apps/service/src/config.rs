use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config {path}: {source}")]
    Read { path: path::PathBuf, source: std::io::Error },
    #[error("failed to write config {path}: {source}")]
    Write { path: path::PathBuf, source: std::io::Error },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub monitoring: MonitoringConfig,
    pub retention: RetentionConfig,
    pub hosts: HostsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: path::PathBuf,
    pub pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Seconds between two check cycles
    pub interval_seconds: u64,
    /// Probe rounds passed to the diagnostic utility
    pub probe_count: u32,
    /// Upper bound for a single diagnostic run
    pub timeout_seconds: u64,
    /// Hosts checked at once within a cycle; 1 keeps cycles strictly serial
    pub max_concurrency: usize,
    pub mtr_path: String,
    /// History entries returned by a host lookup
    pub history_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub horizon_months: u32,
    pub sweep_interval_hours: u64,
    pub sweep_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostsConfig {
    /// Seed list imported once at startup
    pub seed_file: Option<path::PathBuf>,
    pub default_category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
    pub level: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "tracewatch.db".into(), pool_size: 4 }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            probe_count: 3,
            timeout_seconds: 60,
            max_concurrency: 1,
            mtr_path: "mtr".into(),
            history_limit: 20,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { horizon_months: 6, sweep_interval_hours: 24, sweep_on_startup: true }
    }
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self { seed_file: Some("hosts.txt".into()), default_category: "General".into() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { format: "compact".into(), level: "info".into() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/tracewatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("tracewatch/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_1 = |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
            writeln!(f, "    {label}: {value}")
        };
        let seed_file = self
            .hosts
            .seed_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".into());

        writeln!(f, "Current Internal Configuration State:")?;
        writeln!(f, "  Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Pool Size", &self.database.pool_size)?;
        writeln!(f, "  Monitoring")?;
        write_1(f, "Interval (s)", &self.monitoring.interval_seconds)?;
        write_1(f, "Probe Count", &self.monitoring.probe_count)?;
        write_1(f, "Timeout (s)", &self.monitoring.timeout_seconds)?;
        write_1(f, "Max Concurrency", &self.monitoring.max_concurrency)?;
        write_1(f, "Diagnostic Tool", &self.monitoring.mtr_path)?;
        write_1(f, "History Limit", &self.monitoring.history_limit)?;
        writeln!(f, "  Retention")?;
        write_1(f, "Horizon (months)", &self.retention.horizon_months)?;
        write_1(f, "Sweep Interval (h)", &self.retention.sweep_interval_hours)?;
        write_1(f, "Sweep On Startup", &self.retention.sweep_on_startup)?;
        writeln!(f, "  Hosts")?;
        write_1(f, "Seed File", &seed_file)?;
        write_1(f, "Default Category", &self.hosts.default_category)?;
        writeln!(f, "  Logging")?;
        write_1(f, "Format", &self.logging.format)?;
        write_1(f, "Level", &self.logging.level)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/tracewatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::Read { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::Write { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str).map_err(|source| Error::Write { path: path.to_path_buf(), source })
    }
}
