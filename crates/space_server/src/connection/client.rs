//! Client connection handle.
//!
//! A [`ClientHandle`] is the only thing other components hold for a
//! connection: a bounded outbound queue and a teardown signal. The socket
//! itself stays with the connection task and its writer.

use super::ConnectionId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Why a frame could not be queued for a client.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The client is not draining its queue fast enough
    #[error("outbound queue full")]
    QueueFull,

    /// The connection's writer has gone away
    #[error("connection closed")]
    Closed,
}

/// Cheap, cloneable handle used to reach one connected client.
///
/// Delivery never waits: a frame is either queued immediately or the
/// attempt fails, so a slow peer cannot stall whoever is sending to it.
#[derive(Clone, Debug)]
pub struct ClientHandle {
    /// Unique identifier for this connection
    pub connection_id: ConnectionId,

    /// The remote network address of the client
    pub remote_addr: SocketAddr,

    /// When this connection was established
    pub connected_at: SystemTime,

    outbound: mpsc::Sender<Message>,
    teardown: Arc<Notify>,
}

impl ClientHandle {
    /// Creates a handle plus the receiving end of its outbound queue.
    pub fn channel(remote_addr: SocketAddr, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            connection_id: Uuid::new_v4(),
            remote_addr,
            connected_at: SystemTime::now(),
            outbound,
            teardown: Arc::new(Notify::new()),
        };
        (handle, receiver)
    }

    /// Queues a frame without waiting.
    pub fn try_deliver(&self, frame: Message) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Asks the connection to tear itself down on its own task.
    ///
    /// The request is remembered if the connection is not currently waiting
    /// for it.
    pub fn request_teardown(&self) {
        self.teardown.notify_one();
    }

    /// Resolves once teardown has been requested.
    pub async fn teardown_requested(&self) {
        self.teardown.notified().await
    }

    /// Signal shared with the writer task, which has no handle of its own.
    pub(crate) fn teardown_signal(&self) -> Arc<Notify> {
        self.teardown.clone()
    }

    /// Whether the writer side is gone.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_delivery_reaches_receiver() {
        let (client, mut rx) = ClientHandle::channel(addr(), 4);
        client.try_deliver(Message::text("hello")).unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, Message::text("hello"));
    }

    #[tokio::test]
    async fn test_full_queue_fails_without_blocking() {
        let (client, _rx) = ClientHandle::channel(addr(), 1);
        client.try_deliver(Message::text("one")).unwrap();
        assert_eq!(client.try_deliver(Message::text("two")), Err(DeliveryError::QueueFull));
    }

    #[tokio::test]
    async fn test_closed_receiver_reports_closed() {
        let (client, rx) = ClientHandle::channel(addr(), 4);
        drop(rx);
        assert!(client.is_closed());
        assert_eq!(client.try_deliver(Message::text("x")), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn test_teardown_request_is_not_lost() {
        let (client, _rx) = ClientHandle::channel(addr(), 4);

        // Requested before anyone waits
        client.clone().request_teardown();

        tokio::time::timeout(Duration::from_millis(100), client.teardown_requested())
            .await
            .expect("pending teardown request should resolve immediately");
    }
}
