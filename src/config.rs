//! Configuration file support for shardscan.
//!
//! Load settings from `.shardscan.toml` or `~/.config/shardscan/config.toml`.
//!
//! ## Config Resolution Order
//!
//! 1. Environment variables (`SHARDSCAN_*`)
//! 2. Custom config file (`--config`)
//! 3. Project-level `.shardscan.toml`
//! 4. User-level `~/.config/shardscan/config.toml`
//! 5. Built-in defaults

use std::env;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default interval between status reports to the coordinator.
pub const DEFAULT_STATUS_REPORT_INTERVAL_MS: u64 = 1_000;
/// Default upper limit on the delay between scheduling ticks.
pub const DEFAULT_MAX_TICK_DELAY_MS: u64 = 1_000;
/// Default crash-stall count above which the processor is recreated.
pub const DEFAULT_RECREATE_THRESHOLD: u32 = 2;
/// Default crash-stall count above which the job is surrendered.
pub const DEFAULT_SURRENDER_THRESHOLD: u32 = 6;
/// Default capacity of a worker's command inbox.
pub const DEFAULT_INBOX_CAPACITY: usize = 64;

/// Settings of one scan worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Milliseconds between status reports while a job is active.
    pub status_report_interval_ms: u64,
    /// Upper limit in milliseconds on the delay between scheduling ticks.
    pub max_tick_delay_ms: u64,
    /// Crash-stall count above which the processor is recreated on load.
    pub recreate_threshold: u32,
    /// Crash-stall count above which the job is surrendered on load.
    pub surrender_threshold: u32,
    /// Capacity of the command inbox.
    pub inbox_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            status_report_interval_ms: DEFAULT_STATUS_REPORT_INTERVAL_MS,
            max_tick_delay_ms: DEFAULT_MAX_TICK_DELAY_MS,
            recreate_threshold: DEFAULT_RECREATE_THRESHOLD,
            surrender_threshold: DEFAULT_SURRENDER_THRESHOLD,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }
}

impl WorkerConfig {
    /// Interval between status reports.
    #[must_use]
    pub const fn status_report_interval(&self) -> Duration {
        Duration::from_millis(self.status_report_interval_ms)
    }

    /// Upper limit on the delay between scheduling ticks.
    #[must_use]
    pub const fn max_tick_delay(&self) -> Duration {
        Duration::from_millis(self.max_tick_delay_ms)
    }
}

/// Settings of the `demo` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Number of workers sharing the job.
    pub num_workers: u32,
    /// Number of database shards.
    pub num_db_shards: usize,
    /// Number of synthetic entities in the database.
    pub num_entities: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            num_db_shards: 3,
            num_entities: 10_000,
        }
    }
}

/// Resolved configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardscanConfig {
    /// Worker settings.
    pub worker: WorkerConfig,
    /// Demo settings.
    pub demo: DemoConfig,
}

/// `[worker]` section of a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkerSection {
    /// See [`WorkerConfig::status_report_interval_ms`].
    pub status_report_interval_ms: Option<u64>,
    /// See [`WorkerConfig::max_tick_delay_ms`].
    pub max_tick_delay_ms: Option<u64>,
    /// See [`WorkerConfig::recreate_threshold`].
    pub recreate_threshold: Option<u32>,
    /// See [`WorkerConfig::surrender_threshold`].
    pub surrender_threshold: Option<u32>,
    /// See [`WorkerConfig::inbox_capacity`].
    pub inbox_capacity: Option<usize>,
}

/// `[demo]` section of a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DemoSection {
    /// See [`DemoConfig::num_workers`].
    pub num_workers: Option<u32>,
    /// See [`DemoConfig::num_db_shards`].
    pub num_db_shards: Option<usize>,
    /// See [`DemoConfig::num_entities`].
    pub num_entities: Option<u64>,
}

/// Contents of a config file. Every setting is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Worker settings.
    #[serde(default)]
    pub worker: WorkerSection,
    /// Demo settings.
    #[serde(default)]
    pub demo: DemoSection,
}

impl ConfigFile {
    /// Fills unset values with the built-in defaults.
    #[must_use]
    pub fn resolve(&self) -> ShardscanConfig {
        let worker_defaults = WorkerConfig::default();
        let demo_defaults = DemoConfig::default();
        ShardscanConfig {
            worker: WorkerConfig {
                status_report_interval_ms: self
                    .worker
                    .status_report_interval_ms
                    .unwrap_or(worker_defaults.status_report_interval_ms),
                max_tick_delay_ms: self
                    .worker
                    .max_tick_delay_ms
                    .unwrap_or(worker_defaults.max_tick_delay_ms),
                recreate_threshold: self
                    .worker
                    .recreate_threshold
                    .unwrap_or(worker_defaults.recreate_threshold),
                surrender_threshold: self
                    .worker
                    .surrender_threshold
                    .unwrap_or(worker_defaults.surrender_threshold),
                inbox_capacity: self
                    .worker
                    .inbox_capacity
                    .unwrap_or(worker_defaults.inbox_capacity),
            },
            demo: DemoConfig {
                num_workers: self.demo.num_workers.unwrap_or(demo_defaults.num_workers),
                num_db_shards: self.demo.num_db_shards.unwrap_or(demo_defaults.num_db_shards),
                num_entities: self.demo.num_entities.unwrap_or(demo_defaults.num_entities),
            },
        }
    }
}

/// Where configuration was looked for.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// User-level config path (~/.config/shardscan/config.toml)
    pub user_config: Option<PathBuf>,
    /// Whether user config exists
    pub user_config_exists: bool,
    /// Project-level config path (.shardscan.toml)
    pub project_config: PathBuf,
    /// Whether project config exists
    pub project_config_exists: bool,
    /// Custom config path (from --config flag)
    pub custom_config: Option<PathBuf>,
    /// Whether custom config exists
    pub custom_config_exists: bool,
}

impl ConfigSources {
    /// Discover config file locations.
    #[must_use]
    pub fn discover() -> Self {
        let user_config = get_user_config_path();
        let user_config_exists = user_config.as_ref().is_some_and(|p| p.exists());
        let project_config = get_project_config_path();
        let project_config_exists = project_config.exists();

        Self {
            user_config,
            user_config_exists,
            project_config,
            project_config_exists,
            custom_config: None,
            custom_config_exists: false,
        }
    }

    /// Add a custom config path.
    #[must_use]
    pub fn with_custom_config(mut self, path: Option<PathBuf>) -> Self {
        if let Some(p) = path {
            self.custom_config_exists = p.exists();
            self.custom_config = Some(p);
        }
        self
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to parse TOML configuration.
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    /// Failed to read configuration file.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

/// Get the user-level config path (~/.config/shardscan/config.toml).
#[must_use]
pub fn get_user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("shardscan").join("config.toml"))
}

/// Get the project-level config path (.shardscan.toml in current directory).
#[must_use]
pub fn get_project_config_path() -> PathBuf {
    PathBuf::from(".shardscan.toml")
}

/// Load configuration from a TOML string.
///
/// # Errors
/// Returns `ConfigError::TomlParse` if the TOML is invalid.
pub fn load_from_str(toml_content: &str) -> Result<ConfigFile, ConfigError> {
    let config: ConfigFile = toml::from_str(toml_content)?;
    Ok(config)
}

/// Load configuration from a file path.
///
/// # Errors
/// Returns `ConfigError::Io` if the file cannot be read, or
/// `ConfigError::TomlParse` if the TOML is invalid.
pub fn load_from_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_from_str(&content)
}

/// Load configuration from the discovered files and the environment.
///
/// # Errors
/// Returns an error if a config file exists but cannot be read or parsed, or
/// if a custom config file was given but cannot be read.
pub fn load_config(sources: &ConfigSources) -> Result<ShardscanConfig, ConfigError> {
    let mut merged = ConfigFile::default();

    if let Some(user_path) = sources.user_config.as_ref().filter(|_| sources.user_config_exists) {
        merge_config_file(&mut merged, &load_from_file(user_path)?);
    }
    if sources.project_config_exists {
        merge_config_file(&mut merged, &load_from_file(&sources.project_config)?);
    }
    if let Some(custom_path) = &sources.custom_config {
        merge_config_file(&mut merged, &load_from_file(custom_path)?);
    }

    let mut config = merged.resolve();
    apply_env_overrides(&mut config, |key| env::var(key).ok());
    Ok(config)
}

/// Merge a config file into the base config (later values override earlier).
fn merge_config_file(base: &mut ConfigFile, overlay: &ConfigFile) {
    let w = &overlay.worker;
    if w.status_report_interval_ms.is_some() {
        base.worker.status_report_interval_ms = w.status_report_interval_ms;
    }
    if w.max_tick_delay_ms.is_some() {
        base.worker.max_tick_delay_ms = w.max_tick_delay_ms;
    }
    if w.recreate_threshold.is_some() {
        base.worker.recreate_threshold = w.recreate_threshold;
    }
    if w.surrender_threshold.is_some() {
        base.worker.surrender_threshold = w.surrender_threshold;
    }
    if w.inbox_capacity.is_some() {
        base.worker.inbox_capacity = w.inbox_capacity;
    }

    let d = &overlay.demo;
    if d.num_workers.is_some() {
        base.demo.num_workers = d.num_workers;
    }
    if d.num_db_shards.is_some() {
        base.demo.num_db_shards = d.num_db_shards;
    }
    if d.num_entities.is_some() {
        base.demo.num_entities = d.num_entities;
    }
}

fn parse_env<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

/// Apply environment variable overrides (highest priority).
fn apply_env_overrides(config: &mut ShardscanConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(ms) = parse_env(&lookup, "SHARDSCAN_STATUS_REPORT_INTERVAL_MS") {
        config.worker.status_report_interval_ms = ms;
    }
    if let Some(ms) = parse_env(&lookup, "SHARDSCAN_MAX_TICK_DELAY_MS") {
        config.worker.max_tick_delay_ms = ms;
    }
    if let Some(n) = parse_env(&lookup, "SHARDSCAN_RECREATE_THRESHOLD") {
        config.worker.recreate_threshold = n;
    }
    if let Some(n) = parse_env(&lookup, "SHARDSCAN_SURRENDER_THRESHOLD") {
        config.worker.surrender_threshold = n;
    }
    if let Some(n) = parse_env(&lookup, "SHARDSCAN_INBOX_CAPACITY") {
        config.worker.inbox_capacity = n;
    }
}

/// Validate the configuration.
///
/// Returns a list of validation errors (empty if valid).
#[must_use]
pub fn validate_config(config: &ShardscanConfig) -> Vec<String> {
    let mut errors = Vec::new();
    let worker = &config.worker;

    if worker.status_report_interval_ms == 0 {
        errors.push("worker.status_report_interval_ms: must be > 0".to_string());
    }
    if worker.max_tick_delay_ms == 0 {
        errors.push("worker.max_tick_delay_ms: must be > 0".to_string());
    }
    if worker.inbox_capacity == 0 {
        errors.push("worker.inbox_capacity: must be > 0".to_string());
    }
    if worker.surrender_threshold < worker.recreate_threshold {
        errors.push(format!(
            "worker.surrender_threshold: must be >= recreate_threshold ({}), got {}",
            worker.recreate_threshold, worker.surrender_threshold
        ));
    }

    if config.demo.num_workers == 0 {
        errors.push("demo.num_workers: must be > 0".to_string());
    }
    if config.demo.num_db_shards == 0 {
        errors.push("demo.num_db_shards: must be > 0".to_string());
    }

    errors
}

/// Format the configuration for display.
#[must_use]
pub fn format_config(config: &ShardscanConfig, sources: &ConfigSources) -> String {
    let mut output = String::new();

    output.push_str("# Resolved Configuration\n\n");
    match toml::to_string_pretty(config) {
        Ok(rendered) => output.push_str(&rendered),
        Err(e) => {
            let _ = writeln!(output, "(failed to render: {e})");
        }
    }

    output.push_str("\n# Config Sources\n\n");
    if let Some(ref path) = sources.user_config {
        let _ = writeln!(
            output,
            "User config:    {} {}",
            path.display(),
            if sources.user_config_exists { "(exists)" } else { "(not found)" }
        );
    }
    let _ = writeln!(
        output,
        "Project config: {} {}",
        sources.project_config.display(),
        if sources.project_config_exists { "(exists)" } else { "(not found)" }
    );
    if let Some(ref path) = sources.custom_config {
        let _ = writeln!(
            output,
            "Custom config:  {} {}",
            path.display(),
            if sources.custom_config_exists { "(exists)" } else { "(not found)" }
        );
    }

    output.push_str("\nPriority order (highest first):\n");
    output.push_str("  1. Environment variables (SHARDSCAN_*)\n");
    output.push_str("  2. Custom config (if --config specified)\n");
    output.push_str("  3. Project config (.shardscan.toml)\n");
    output.push_str("  4. User config (~/.config/shardscan/config.toml)\n");
    output.push_str("  5. Built-in defaults\n");

    output
}
