// Relaycast Server
// Process bootstrap: configuration, logging, backends and the HTTP listener

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::{
    env,
    fs::OpenOptions,
    io::Write,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Mutex,
};
use tokio::signal;

use relaycast_server::api::{build_router, AppState};
use relaycast_server::services::{Backends, ConfigLoader};

// ============================================================================
// Logging
// ============================================================================

struct ServerLogger {
    file: Mutex<std::fs::File>,
    level: LevelFilter,
}

impl ServerLogger {
    fn new(log_dir: &Path, level: LevelFilter) -> Result<Self, Box<dyn std::error::Error>> {
        let log_path = log_dir.join("relaycast-server.log");
        let file = OpenOptions::new().create(true).append(true).open(log_path)?;
        Ok(Self {
            file: Mutex::new(file),
            level,
        })
    }
}

impl Log for ServerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Local::now();
        let date = timestamp.format("%Y-%m-%d");
        let time = timestamp.format("%H:%M:%S");
        let target = record.target();
        let level = record.level();
        let line = format!("[{date}][{time}][{target}][{level}] {}", record.args());

        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{line}");
        }
        if level <= Level::Warn {
            eprintln!("{line}");
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

fn log_level() -> LevelFilter {
    env::var("RELAYCAST_LOG_LEVEL")
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(LevelFilter::Info)
}

fn parse_host(host: &str) -> IpAddr {
    host.parse().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("Shutdown signal received, draining connections");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let loader = ConfigLoader::from_env();
    let config = loader.load()?;

    let data_dir = PathBuf::from(&config.data_dir);
    let log_dir = PathBuf::from(&config.log_dir);
    std::fs::create_dir_all(&data_dir)?;
    std::fs::create_dir_all(&log_dir)?;

    let level = log_level();
    let logger = ServerLogger::new(&log_dir, level)?;
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(level);
    }

    log::info!("Relaycast server v{} starting", env!("CARGO_PKG_VERSION"));
    log::info!("  Config: {}", loader.config_path().display());
    log::info!("  Data dir: {}", data_dir.display());

    let backends = Backends::from_config(&config).await?;
    log::info!(
        "  Backend: {} (registry: {}), topology: {}",
        backends.name,
        backends.registry.backend_name(),
        config.topology.as_str()
    );
    for (platform, channel_id) in &config.channels {
        if !channel_id.trim().is_empty() {
            log::info!("  Channel for {}: {}", platform, channel_id);
        }
    }

    let state = AppState::new(&config, backends)?;
    if state.auth_enabled() {
        log::info!("  Authentication: enabled");
    } else {
        log::info!("  Authentication: disabled (no token configured)");
    }
    let app = build_router(state);

    let address = SocketAddr::new(parse_host(&config.host), config.port);
    let listener = tokio::net::TcpListener::bind(address).await?;
    log::info!("Relaycast backend listening on http://{address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Relaycast server stopped");
    Ok(())
}
