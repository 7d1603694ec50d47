//! Core space server implementation.
//!
//! This module contains the `SpaceServer` struct: it owns the shared
//! [`ServerContext`], binds the listeners and runs the accept loops that hand
//! each connection to its own task.

use crate::{
    auth::TokenVerifier,
    config::ServerConfig,
    connection::handle_connection,
    context::ServerContext,
    error::ServerError,
    room::RoomRegistry,
    spaces::SpaceDirectory,
    stats::{ServerStats, StatsSnapshot},
};
use futures::stream::{FuturesUnordered, StreamExt};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// The space server.
///
/// Construction wires the registry, admission controller and stats together;
/// nothing touches the network until [`SpaceServer::bind`] or
/// [`SpaceServer::start`] is called.
///
/// # Multi-threading
///
/// With `use_reuse_port` set, one listener per CPU core is bound to the same
/// address and the kernel spreads incoming connections across them.
pub struct SpaceServer {
    /// State shared with every connection task
    context: Arc<ServerContext>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,
}

impl SpaceServer {
    /// Creates a new server with the given configuration and collaborators.
    ///
    /// # Arguments
    ///
    /// * `config` - Network settings and world rules
    /// * `verifier` - Checks identity tokens on `join`
    /// * `directory` - Resolves space identifiers to their bounds
    pub fn new(
        config: ServerConfig,
        verifier: Arc<dyn TokenVerifier>,
        directory: Arc<dyn SpaceDirectory>,
    ) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            context: Arc::new(ServerContext::new(config, verifier, directory)),
            shutdown_sender,
        }
    }

    /// Binds the configured address.
    ///
    /// Returns one listener, or one per CPU core when `use_reuse_port` is
    /// enabled. Must be called from within a Tokio runtime.
    pub fn bind(&self) -> Result<Vec<TcpListener>, ServerError> {
        let config = &self.context.config;
        config.validate()?;

        let core_count = num_cpus::get();
        let num_acceptors = if config.use_reuse_port { core_count } else { 1 };
        info!("🧠 Detected {} CPU cores, using {} acceptor(s)", core_count, num_acceptors);

        // Port 0 must resolve once so that every acceptor shares the same port
        let mut address = config.bind_address;
        let mut listeners = Vec::with_capacity(num_acceptors);
        for i in 0..num_acceptors {
            let listener = bind_listener(address, config.use_reuse_port)?;
            address = listener
                .local_addr()
                .map_err(|e| ServerError::Network(format!("Failed to read local address: {e}")))?;
            info!("✅ Listener {} bound on {}", i, address);
            listeners.push(listener);
        }
        Ok(listeners)
    }

    /// Runs the accept loops on `listeners` until shutdown is requested or
    /// every loop has failed.
    pub async fn serve(&self, listeners: Vec<TcpListener>) -> Result<(), ServerError> {
        if listeners.is_empty() {
            return Err(ServerError::Internal("no listeners to serve".to_string()));
        }
        let mut shutdown_receiver = self.shutdown_sender.subscribe();

        let mut accept_futures = listeners
            .into_iter()
            .map(|listener| {
                let context = self.context.clone();
                let shutdown_sender = self.shutdown_sender.clone();

                async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, addr)) => {
                                if let Err(e) = stream.set_nodelay(true) {
                                    debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                                }
                                let context = context.clone();
                                let shutdown = shutdown_sender.subscribe();

                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, addr, context, shutdown).await {
                                        warn!("Connection error: {}", e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                                break;
                            }
                        }
                    }
                }
            })
            .collect::<FuturesUnordered<_>>();

        tokio::select! {
            _ = async { while accept_futures.next().await.is_some() {} } => {
                error!("All accept loops stopped");
            }
            _ = shutdown_receiver.recv() => {
                info!("Shutdown signal received");
            }
        }

        let stats = self.context.stats.snapshot();
        info!(
            "✅ Server stopped ({} rooms open, {} connections active)",
            self.context.registry.room_count(),
            stats.active_connections
        );
        Ok(())
    }

    /// Binds and serves in one call.
    pub async fn start(&self) -> Result<(), ServerError> {
        info!("🚀 Starting space server on {}", self.context.config.bind_address);
        let listeners = self.bind()?;
        self.serve(listeners).await
    }

    /// Initiates server shutdown.
    ///
    /// Stops the accept loops and tells every connection task to close its
    /// session, which announces `user-left` to the remaining members.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down server...");
        let _ = self.shutdown_sender.send(());
        Ok(())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    pub fn context(&self) -> Arc<ServerContext> {
        self.context.clone()
    }

    pub fn registry(&self) -> Arc<RoomRegistry> {
        self.context.registry.clone()
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.context.stats.clone()
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.context.stats.snapshot()
    }
}

fn bind_listener(address: SocketAddr, reuse_port: bool) -> Result<TcpListener, ServerError> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
    socket.set_reuse_address(true).ok();

    if reuse_port {
        #[cfg(unix)]
        match socket.set_reuse_port(true) {
            Ok(()) => debug!("SO_REUSEPORT enabled for load balancing across acceptor threads"),
            Err(e) => warn!("Failed to set SO_REUSEPORT: {}", e),
        }
        #[cfg(not(unix))]
        warn!("SO_REUSEPORT is not supported on this platform. Using SO_REUSEADDR only.");
    }

    socket
        .bind(&address.into())
        .map_err(|e| ServerError::Network(format!("Bind failed: {e}")))?;
    socket
        .listen(65535)
        .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

    let std_listener: StdTcpListener = socket.into();
    std_listener
        .set_nonblocking(true)
        .map_err(|e| ServerError::Network(format!("Failed to set non-blocking mode: {e}")))?;

    TcpListener::from_std(std_listener)
        .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))
}
