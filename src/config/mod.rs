// Configuration module entry point
// Loads layered configuration and holds the per-process application state

mod state;
mod types;

use std::net::SocketAddr;
use std::path::PathBuf;

// Re-export public types
pub use state::AppState;
pub use types::{BuildConfig, Config, RebuildMode};

/// Command-line values that take precedence over file and environment
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub site_root: Option<PathBuf>,
    pub disable_rebuild: bool,
}

impl Config {
    /// Load configuration from specified file path (extension optional)
    ///
    /// Sources, later wins: defaults, the file (if present), `PREVIEW__*`
    /// environment variables, then `overrides`.
    pub fn load_from(config_path: &str, overrides: &Overrides) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("PREVIEW")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(" ")
                    .with_list_parse_key("build.args")
                    .try_parsing(true),
            )
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 4000)?
            .set_default("site.root", "./_site")?
            .set_default("build.enabled", true)?
            .set_default("build.command", "jekyll")?
            .set_default("build.args", vec!["build"])?
            .set_default("build.working_dir", ".")?
            .set_default("build.mode", "coalesce")?
            .set_default("build.show_output", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("performance.keep_alive_timeout", 75)?
            .set_default("performance.read_timeout", 300)?
            .set_default("performance.write_timeout", 300)?
            .set_default("http.server_name", "site-preview")?
            .set_override_option("server.host", overrides.host.clone())?
            .set_override_option("server.port", overrides.port.map(i64::from))?
            .set_override_option(
                "site.root",
                overrides
                    .site_root
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
            )?;

        if overrides.disable_rebuild {
            builder = builder.set_override("build.enabled", false)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn get_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid address: {e}"))
    }
}
