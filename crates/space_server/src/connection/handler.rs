//! Per-connection task.
//!
//! Runs the websocket handshake, starts the writer, and then feeds inbound
//! frames to the session one at a time until the session ends, the transport
//! goes away, a teardown is requested, or the server shuts down. Every exit
//! path goes through the same `Session::close`.

use super::writer::write_loop;
use super::ClientHandle;
use crate::context::ServerContext;
use crate::error::ServerError;
use crate::messaging::route_client_message;
use crate::session::{Flow, Session, SessionStatus};
use crate::stats::ServerStats;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Keeps the active-connection gauge honest on every exit path.
struct ActiveConnection {
    stats: Arc<ServerStats>,
    active: u64,
}

impl ActiveConnection {
    fn open(stats: Arc<ServerStats>) -> Self {
        let active = stats.connection_opened();
        Self { stats, active }
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.stats.connection_closed();
    }
}

/// Handles one accepted TCP connection from handshake to close.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    context: Arc<ServerContext>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let handshake_limit = Duration::from_secs(context.config.connection_timeout);
    let ws_stream = match tokio::time::timeout(handshake_limit, accept_async(stream)).await {
        Ok(Ok(ws_stream)) => ws_stream,
        Ok(Err(e)) => {
            return Err(ServerError::Network(format!("WebSocket handshake failed for {addr}: {e}")));
        }
        Err(_) => {
            return Err(ServerError::Network(format!(
                "WebSocket handshake with {addr} timed out after {handshake_limit:?}"
            )));
        }
    };

    let active = ActiveConnection::open(context.stats.clone());
    let (ws_sink, mut ws_receiver) = ws_stream.split();
    let (client, outbound) = ClientHandle::channel(addr, context.config.outbound_queue_capacity);
    let teardown = client.teardown_signal();

    if active.active > context.config.max_connections as u64 {
        warn!(
            "🚧 Refusing {}: {} connections open (limit {})",
            addr, active.active, context.config.max_connections
        );
        let _ = client.try_deliver(Message::Close(Some(CloseFrame {
            code: CloseCode::Again,
            reason: "server full".into(),
        })));
        drop(client);
        write_loop(ws_sink, outbound, teardown, addr).await;
        return Ok(());
    }

    info!(connection = %client.connection_id, "🔗 Connection from {}", addr);

    let mut writer = tokio::spawn(write_loop(ws_sink, outbound, teardown, addr));
    let mut session = Session::new(client.clone(), context.clone());
    session.accept();

    let join_deadline = tokio::time::sleep(Duration::from_secs(context.config.connection_timeout));
    tokio::pin!(join_deadline);

    let reason = loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if route_client_message(text.as_str(), &mut session).await == Flow::Close {
                        break "session ended";
                    }
                }
                Some(Ok(Message::Close(_))) | None => break "transport closed",
                Some(Ok(Message::Binary(_))) => {
                    debug!(connection = %client.connection_id, "📭 Ignoring binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection = %client.connection_id, "Transport error: {}", e);
                    break "transport error";
                }
            },
            _ = client.teardown_requested() => break "delivery failed",
            _ = &mut join_deadline, if session.status() == SessionStatus::AwaitingJoin => {
                break "join timeout";
            }
            _ = shutdown.recv() => break "server shutdown",
        }
    };

    session.close(reason).await;

    // Anything already queued, such as a join-rejected notice, goes out before
    // the close frame.
    let _ = client.try_deliver(Message::Close(None));
    let connection_id = client.connection_id;
    let lifetime = client.connected_at.elapsed().unwrap_or_default();
    drop(session);
    drop(client);

    let grace = Duration::from_millis(context.config.close_grace_ms);
    if tokio::time::timeout(grace, &mut writer).await.is_err() {
        debug!(connection = %connection_id, "Writer did not flush within {:?}, aborting", grace);
        writer.abort();
    }

    info!(
        connection = %connection_id,
        "🔌 Connection from {} closed ({}) after {:.1}s",
        addr,
        reason,
        lifetime.as_secs_f64()
    );
    drop(active);
    Ok(())
}
