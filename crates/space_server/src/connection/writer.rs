//! Outbound half of a connection.
//!
//! The writer owns the websocket sink and drains the connection's queue in
//! order. A failed write asks the connection to tear down; it never retries.

use futures::stream::SplitSink;
use futures::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::debug;

/// Type alias for WebSocket sink (outgoing messages)
pub(crate) type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Writes queued frames until the queue closes or a Close frame is sent.
pub(crate) async fn write_loop(
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<Message>,
    teardown: Arc<Notify>,
    remote_addr: SocketAddr,
) {
    while let Some(frame) = outbound.recv().await {
        let closing = frame.is_close();
        if let Err(e) = sink.send(frame).await {
            debug!("✉️ Write to {} failed: {}", remote_addr, e);
            teardown.notify_one();
            return;
        }
        if closing {
            break;
        }
    }

    let _ = sink.close().await;
}
