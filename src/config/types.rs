// Configuration types module
// Defines all configuration-related data structures

use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub site: SiteConfig,
    pub build: BuildConfig,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
    pub http: HttpConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// Generated site being previewed
#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    /// Directory holding the generator's output
    pub root: PathBuf,
}

/// External site build configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    /// Rebuild the site before serving an existing `.html` page
    pub enabled: bool,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory the build command runs in
    pub working_dir: PathBuf,
    pub mode: RebuildMode,
    /// Kill the build after this many seconds (no limit if unset)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Pass build stdout/stderr through instead of discarding them
    pub show_output: bool,
}

/// How overlapping rebuild requests are handled
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RebuildMode {
    /// One build at a time, every request gets its own build
    Serialize,
    /// One build at a time, waiters reuse a build that started after they arrived
    Coalesce,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub access_log: bool,
    /// Access log format (combined, common, json, or custom pattern)
    #[serde(default = "default_access_log_format")]
    pub access_log_format: String,
    /// Access log file path (optional, stdout if not set)
    #[serde(default)]
    pub access_log_file: Option<String>,
    /// Error log file path (optional, stderr if not set)
    #[serde(default)]
    pub error_log_file: Option<String>,
}

#[allow(clippy::missing_const_for_fn)]
fn default_access_log_format() -> String {
    "combined".to_string()
}

/// Performance configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PerformanceConfig {
    pub keep_alive_timeout: u64,
    pub read_timeout: u64,
    pub write_timeout: u64,
    pub max_connections: Option<u64>,
}

/// HTTP configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub server_name: String,
    /// `Cache-Control: public, max-age=N` when set, `no-cache` otherwise
    #[serde(default)]
    pub cache_max_age: Option<u32>,
}
