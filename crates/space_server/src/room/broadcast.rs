//! Fan-out of server messages to room members.
//!
//! Delivery is a non-blocking enqueue per recipient. A recipient whose queue
//! is full or closed is skipped and asked to tear down on its own task; the
//! member set is never modified during the iteration.

use super::Member;
use crate::connection::ClientHandle;
use crate::messaging::ServerMessage;
use crate::stats::ServerStats;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, warn};

/// Sends `frame` to every member except `exclude`. Returns how many
/// recipients accepted it.
pub(crate) fn fan_out<'a>(
    members: impl IntoIterator<Item = &'a Member>,
    frame: &Message,
    exclude: Option<&str>,
    stats: &ServerStats,
) -> usize {
    let mut delivered = 0;
    for member in members {
        if exclude == Some(member.user_id.as_str()) {
            continue;
        }
        match member.client.try_deliver(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => {
                warn!(
                    connection = %member.connection_id,
                    user = %member.user_id,
                    "📉 Broadcast delivery failed ({}), scheduling disconnect", e
                );
                stats.delivery_failed();
                member.client.request_teardown();
            }
        }
    }
    delivered
}

/// Encodes a message once for a whole fan-out.
pub(crate) fn encode(message: &ServerMessage) -> Option<Message> {
    match message.to_frame() {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!("Failed to encode {} message: {}", message.kind(), e);
            None
        }
    }
}

/// Sends one message to a single client with the same failure policy as
/// [`fan_out`].
pub(crate) fn deliver(client: &ClientHandle, message: &ServerMessage, stats: &ServerStats) -> bool {
    let Some(frame) = encode(message) else {
        return false;
    };
    match client.try_deliver(frame) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                connection = %client.connection_id,
                "📉 Delivery of {} failed ({}), scheduling disconnect",
                message.kind(),
                e
            );
            stats.delivery_failed();
            client.request_teardown();
            false
        }
    }
}
