//! Wire protocol: envelope types and inbound routing.

pub mod router;
pub mod types;

pub use router::{decode_client_message, route_client_message};
pub use types::{
    ChatRequest, ClientEnvelope, ClientMessage, JoinRejectReason, JoinRequest, MemberView,
    MoveRequest, ProtocolError, ServerMessage,
};
