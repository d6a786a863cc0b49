use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod config;
mod handler;
mod http;
mod logger;
mod server;

/// How long in-flight requests get to finish after a shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Preview a generated static site, rebuilding it when pages are requested
#[derive(Debug, Parser)]
#[command(name = "site-preview", version, about)]
struct Cli {
    /// Configuration file, extension optional; a missing file is not an error
    #[arg(short, long, default_value = "preview")]
    config: String,

    /// Directory holding the generated site (overrides `site.root`)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Address to listen on (overrides `server.host`)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides `server.port`)
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve pages as they are, never running the site build
    #[arg(long)]
    no_rebuild: bool,
}

impl Cli {
    fn overrides(&self) -> config::Overrides {
        config::Overrides {
            host: self.host.clone(),
            port: self.port,
            site_root: self.root.clone(),
            disable_rebuild: self.no_rebuild,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let cfg = config::Config::load_from(&cli.config, &cli.overrides())?;
    logger::init(&cfg)?;

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
    }
    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(cfg))
}

async fn async_main(cfg: config::Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = cfg.get_socket_addr()?;
    let listener = server::create_listener(addr)?;

    let dispatcher = handler::Dispatcher::from_config(&cfg);
    if !dispatcher.site_root().is_dir() {
        logger::log_warning(&format!(
            "Site root {} does not exist yet; requests will 404 until the site is built",
            dispatcher.site_root().display()
        ));
    }
    let state = Arc::new(config::AppState::new(&cfg, dispatcher));

    logger::log_server_start(&addr, &cfg);

    // Connections are served with spawn_local
    let local = tokio::task::LocalSet::new();
    local
        .run_until(server::run(
            listener,
            state,
            server::signal::shutdown_requested(),
            DRAIN_TIMEOUT,
        ))
        .await;
    Ok(())
}
