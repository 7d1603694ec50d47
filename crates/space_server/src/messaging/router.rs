//! Message routing logic for dispatching client envelopes to the session.
//!
//! This module parses incoming text frames and hands the decoded message to
//! the session's handler for that type. Frames that cannot be interpreted are
//! dropped here: protocol errors are never surfaced to the client and never
//! end the connection.

use crate::messaging::{ChatRequest, ClientEnvelope, ClientMessage, JoinRequest, MoveRequest, ProtocolError};
use crate::session::{Flow, Session};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Decodes one inbound text frame.
///
/// # Example Message Format
///
/// ```json
/// { "type": "move", "payload": { "x": 32, "y": 0 } }
/// ```
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let envelope: ClientEnvelope = serde_json::from_str(text).map_err(ProtocolError::Envelope)?;

    match envelope.kind.as_str() {
        "join" => payload::<JoinRequest>("join", envelope.payload).map(ClientMessage::Join),
        "move" => payload::<MoveRequest>("move", envelope.payload).map(ClientMessage::Move),
        "chat" => payload::<ChatRequest>("chat", envelope.payload).map(ClientMessage::Chat),
        "leave" => Ok(ClientMessage::Leave),
        _ => Err(ProtocolError::UnknownType(envelope.kind)),
    }
}

fn payload<T: DeserializeOwned>(kind: &'static str, value: serde_json::Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|source| ProtocolError::Payload { kind, source })
}

/// Routes a raw client frame to the session.
///
/// Messages arrive here strictly in the order the connection received them;
/// the caller awaits each one before reading the next frame.
pub async fn route_client_message(text: &str, session: &mut Session) -> Flow {
    let message = match decode_client_message(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(
                connection = %session.connection_id(),
                "📭 Dropping undecodable frame: {}", e
            );
            return Flow::Continue;
        }
    };

    match message {
        ClientMessage::Join(request) => session.on_join(request).await,
        ClientMessage::Move(request) => session.on_move(request).await,
        ClientMessage::Chat(request) => session.on_chat(request).await,
        ClientMessage::Leave => session.on_leave().await,
    }
}
