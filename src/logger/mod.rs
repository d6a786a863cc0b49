//! Logger module
//!
//! Provides logging utilities for the preview server including:
//! - Server lifecycle logging
//! - Site build logging
//! - Access logging with multiple formats
//! - Error and warning logging

mod format;
pub mod writer;

pub use format::AccessLogEntry;

use crate::config::Config;
use crate::handler::builder::BuildStatus;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize the logger with configuration
///
/// Should be called once at application startup.
pub fn init(config: &Config) -> std::io::Result<()> {
    DEBUG_ENABLED.store(
        config.logging.level.eq_ignore_ascii_case("debug"),
        Ordering::Relaxed,
    );
    writer::init(
        config.logging.access_log_file.as_deref(),
        config.logging.error_log_file.as_deref(),
    )
}

/// Build progress and lifecycle lines
fn write_info(message: &str) {
    match writer::global() {
        Some(writer) => writer.write_info(message),
        None => println!("{message}"),
    }
}

fn write_error(message: &str) {
    match writer::global() {
        Some(writer) => writer.write_error(message),
        None => eprintln!("{message}"),
    }
}

fn write_access(message: &str) {
    match writer::global() {
        Some(writer) => writer.write_access(message),
        None => println!("{message}"),
    }
}

pub fn log_server_start(addr: &SocketAddr, config: &Config) {
    write_info("======================================");
    write_info("Site preview server started");
    write_info(&format!("Listening on: http://{addr}"));
    write_info(&format!("Site root: {}", config.site.root.display()));
    if config.build.enabled {
        let args = config.build.args.join(" ");
        write_info(&format!(
            "Rebuild on HTML request: `{} {args}` in {} ({:?})",
            config.build.command,
            config.build.working_dir.display(),
            config.build.mode,
        ));
    } else {
        write_info("Rebuild on HTML request: disabled");
    }
    write_info(&format!("Log level: {}", config.logging.level));
    if let Some(workers) = config.server.workers {
        write_info(&format!("Worker threads: {workers}"));
    }
    if let Some(ref path) = config.logging.access_log_file {
        write_info(&format!("Access log: {path}"));
    }
    if let Some(ref path) = config.logging.error_log_file {
        write_info(&format!("Error log: {path}"));
    }
    write_info("======================================\n");
}

pub fn log_shutdown(reason: &str) {
    write_info(&format!("[Shutdown] {reason}, no longer accepting connections"));
}

pub fn log_connection_accepted(peer_addr: &SocketAddr) {
    log_debug(&format!("[Connection] Accepted from: {peer_addr}"));
}

pub fn log_connection_error(err: &impl std::fmt::Debug) {
    write_error(&format!("[ERROR] Failed to serve connection: {err:?}"));
}

pub fn log_error(message: &str) {
    write_error(&format!("[ERROR] {message}"));
}

pub fn log_warning(message: &str) {
    write_error(&format!("[WARN] {message}"));
}

pub fn log_debug(message: &str) {
    if DEBUG_ENABLED.load(Ordering::Relaxed) {
        write_info(&format!("[DEBUG] {message}"));
    }
}

pub fn log_build_started(command: &str, trigger: &str) {
    write_info(&format!("[Build] Running `{command}` for {trigger}"));
}

/// Non-zero exits and timeouts are warnings; the page is served regardless
pub fn log_build_finished(status: &BuildStatus) {
    if status.success() {
        write_info(&format!("[Build] Finished: {status}"));
    } else {
        log_warning(&format!(
            "[Build] Build did not succeed ({status}), serving current output"
        ));
    }
}

pub fn log_build_coalesced(trigger: &str) {
    write_info(&format!(
        "[Build] {trigger} reused a build that finished while it waited"
    ));
}

/// Log formatted access log entry
pub fn log_access(entry: &AccessLogEntry, format: &str) {
    write_access(&entry.format(format));
}
