//! Main application entry point for the spaces server.
//!
//! Loads configuration, sets up logging, builds the space server and runs it
//! until a termination signal arrives.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::{anyhow, Result};
use cli::CliArgs;
use config::AppConfig;
use space_server::{ServerStats, SpaceServer};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// How often the health line is logged.
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on how long shutdown waits for connections to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

pub struct Application {
    config: AppConfig,
    server: Arc<SpaceServer>,
}

impl Application {
    pub async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(spaces_url) = args.spaces_url {
            config.spaces.base_url = Some(spaces_url);
        }

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;

        logging::setup_logging(&config.logging)?;

        let server = SpaceServer::new(
            config.to_server_config()?,
            config.build_verifier()?,
            config.build_directory()?,
        );

        info!(
            "🚀 Spaces server v{} | config: {}",
            env!("CARGO_PKG_VERSION"),
            args.config_path.display()
        );

        Ok(Self {
            config,
            server: Arc::new(server),
        })
    }

    pub async fn run(self) -> Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!("  ⏱️ Join timeout: {}s", self.config.server.connection_timeout);
        info!("  🧱 Tile size: {}", self.config.world.tile_size);
        match &self.config.spaces.base_url {
            Some(url) => info!("  🗺️ Spaces: {}", url),
            None => info!("  🗺️ Spaces: {} declared", self.config.spaces.declared.len()),
        }

        let listeners = self.server.bind()?;

        let server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve(listeners).await {
                    error!("❌ Server error: {}", e);
                }
            })
        };

        let monitoring_handle = {
            let server = self.server.clone();
            tokio::spawn(async move { monitor(server).await })
        };

        info!("✅ Spaces server is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        signals::wait_for_shutdown_signal().await?;

        info!("🛑 Shutdown signal received, initiating graceful shutdown...");
        monitoring_handle.abort();
        self.server.shutdown().await?;

        if tokio::time::timeout(SHUTDOWN_GRACE, server_handle).await.is_err() {
            error!("Server did not stop within {:?}", SHUTDOWN_GRACE);
        }

        // Connection tasks close on the same signal; give them a moment
        let stats = self.server.stats();
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while stats.snapshot().active_connections > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        let final_stats = stats.snapshot();
        info!("📊 Final Statistics:");
        info!("  - Connections served: {}", final_stats.connections_total);
        info!("  - Rooms still open: {}", final_stats.live_rooms);
        info!("  - Joins accepted/rejected: {}/{}", final_stats.joins_accepted, final_stats.joins_rejected);
        info!("  - Moves accepted/rejected: {}/{}", final_stats.moves_accepted, final_stats.moves_rejected);
        info!("  - Chats relayed: {}", final_stats.chats_relayed);
        info!("✅ Spaces server shutdown complete");
        Ok(())
    }
}

/// Logs a health line every minute.
async fn monitor(server: Arc<SpaceServer>) {
    let stats: Arc<ServerStats> = server.stats();
    let mut ticker = interval(HEALTH_INTERVAL);
    ticker.tick().await;
    let mut last = stats.snapshot();

    loop {
        ticker.tick().await;
        let now = stats.snapshot();
        info!(
            "📊 System Health - {} connections | {} rooms | {} joins, {} moves, {} chats this period | {} delivery failures",
            now.active_connections,
            now.live_rooms,
            now.joins_accepted - last.joins_accepted,
            now.moves_accepted - last.moves_accepted,
            now.chats_relayed - last.chats_relayed,
            now.deliveries_failed - last.deliveries_failed,
        );
        last = now;
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }
}
