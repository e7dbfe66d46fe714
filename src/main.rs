use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

mod config;
mod media;
mod server;
mod tasks;
mod utils;

use config::Config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

fn get_config_path(args: &Args) -> Option<String> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var("CONFIG_FILE") {
        return Some(path);
    }

    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        let config_path = format!("{}/fetchdeck/config.toml", xdg_config_home);
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let config_path = format!("{}/.config/fetchdeck/config.toml", home.display());
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    None
}

fn init_logging(format: &str) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    if format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = get_config_path(&args);
    let mut config = match &config_path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_logging(config.get_logging_format());

    info!("Starting fetchdeck...");
    match &config_path {
        Some(path) => info!("Loaded config from: {}", path),
        None => info!("No config file found, using defaults"),
    }

    let ffmpeg = media::locate_ffmpeg(&config.downloads.bin_dir);
    let extractor: Arc<dyn media::Extractor> = Arc::new(media::YtDlp::new(
        config.downloads.ytdlp_path.clone(),
        ffmpeg.clone(),
        config.downloads.fetch_timeout(),
    ));
    media::check_setup(extractor.as_ref(), ffmpeg.as_deref()).await;

    let registry = Arc::new(tasks::TaskRegistry::new());
    let downloads = Arc::new(media::DownloadManager::new(
        extractor.clone(),
        registry.clone(),
        config.downloads.resolved_default_dir(),
        ffmpeg.is_some(),
    ));
    tasks::spawn_sweeper(
        registry.clone(),
        config.progress.sweep_interval(),
        config.progress.orphan_ttl(),
    );

    let state = server::AppState {
        extractor,
        registry,
        downloads,
        poll_interval: config.progress.poll_interval(),
    };
    let app = server::router(state, &config.server.static_dir);

    let host: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.server.host))?;
    server::serve(SocketAddr::new(host, config.server.port), app).await
}
