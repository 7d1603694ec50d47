//! Per-connection protocol state machine.
//!
//! A [`Session`] lives on its connection's task and is driven one inbound
//! message at a time. It owns the connection-local view of the user (identity,
//! room, cached position) while the [`RoomRegistry`](crate::room::RoomRegistry)
//! stays authoritative for membership.
//!
//! Status only moves forward:
//! `Connecting -> AwaitingJoin -> Joined -> Closed`, with `AwaitingJoin ->
//! Closed` for rejected joins. Messages that arrive in the wrong status are
//! ignored without a reply.

use crate::chat::{prepare_message, timestamp_millis};
use crate::connection::{ClientHandle, ConnectionId};
use crate::context::ServerContext;
use crate::messaging::{ChatRequest, JoinRequest, MoveRequest, ServerMessage};
use crate::movement::{validate_move, Position};
use crate::room::broadcast::deliver;
use crate::spaces::SpaceBounds;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionStatus {
    Connecting,
    AwaitingJoin,
    Joined,
    Closed,
}

/// What the connection loop should do after a message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Room membership held by a joined session.
#[derive(Debug, Clone)]
struct Presence {
    user_id: String,
    room_id: String,
    position: Position,
    bounds: SpaceBounds,
}

pub struct Session {
    client: ClientHandle,
    context: Arc<ServerContext>,
    status: SessionStatus,
    presence: Option<Presence>,
}

impl Session {
    pub fn new(client: ClientHandle, context: Arc<ServerContext>) -> Self {
        Self {
            client,
            context,
            status: SessionStatus::Connecting,
            presence: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.client.connection_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.presence.as_ref().map(|p| p.user_id.as_str())
    }

    pub fn room_id(&self) -> Option<&str> {
        self.presence.as_ref().map(|p| p.room_id.as_str())
    }

    pub fn position(&self) -> Option<Position> {
        self.presence.as_ref().map(|p| p.position)
    }

    /// Transport accepted; the session now waits for `join`.
    pub fn accept(&mut self) {
        self.advance(SessionStatus::AwaitingJoin);
    }

    fn advance(&mut self, next: SessionStatus) {
        if next > self.status {
            self.status = next;
        }
    }

    pub(crate) async fn on_join(&mut self, request: JoinRequest) -> Flow {
        if self.status != SessionStatus::AwaitingJoin {
            debug!(connection = %self.connection_id(), "Ignoring join in status {:?}", self.status);
            return Flow::Continue;
        }

        match self.context.admission.admit(&self.client, &request).await {
            Ok(admission) => {
                self.context.stats.join_accepted();
                info!(
                    connection = %self.connection_id(),
                    "🚪 {} joined space {} at ({}, {}), {} present",
                    admission.user_id,
                    admission.room_id,
                    admission.position.x,
                    admission.position.y,
                    admission.member_count
                );
                self.presence = Some(Presence {
                    user_id: admission.user_id,
                    room_id: admission.room_id,
                    position: admission.position,
                    bounds: admission.bounds,
                });
                self.advance(SessionStatus::Joined);
                Flow::Continue
            }
            Err(e) => {
                self.context.stats.join_rejected();
                info!(
                    connection = %self.connection_id(),
                    "⛔ Join to space {} rejected: {}", request.space_id, e
                );
                let notice = ServerMessage::JoinRejected { reason: e.reason() };
                deliver(&self.client, &notice, &self.context.stats);
                self.advance(SessionStatus::Closed);
                Flow::Close
            }
        }
    }

    pub(crate) async fn on_move(&mut self, request: MoveRequest) -> Flow {
        if self.status != SessionStatus::Joined {
            return Flow::Continue;
        }
        let Some(presence) = self.presence.as_mut() else {
            return Flow::Continue;
        };

        let proposed = Position::new(request.x, request.y);
        match validate_move(presence.position, proposed, self.context.config.tile_size, presence.bounds) {
            Ok(position) => {
                let moved = self
                    .context
                    .registry
                    .move_member(&presence.room_id, &presence.user_id, self.client.connection_id, position)
                    .await;
                if moved.is_some() {
                    presence.position = position;
                    self.context.stats.move_accepted();
                } else {
                    warn!(
                        connection = %self.client.connection_id,
                        "Move by {} ignored: no longer registered in {}", presence.user_id, presence.room_id
                    );
                }
            }
            Err(rejection) => {
                debug!(
                    connection = %self.client.connection_id,
                    "🚫 Move by {} rejected: {:?}", presence.user_id, rejection
                );
                self.context.stats.move_rejected();
                deliver(&self.client, &ServerMessage::MovementRejected {}, &self.context.stats);
            }
        }
        Flow::Continue
    }

    pub(crate) async fn on_chat(&mut self, request: ChatRequest) -> Flow {
        if self.status != SessionStatus::Joined {
            return Flow::Continue;
        }
        let Some(presence) = self.presence.as_ref() else {
            return Flow::Continue;
        };
        let Some(message) = prepare_message(&request.message, self.context.config.max_chat_length) else {
            debug!(connection = %self.client.connection_id, "Dropping empty or oversized chat");
            return Flow::Continue;
        };

        let chat = ServerMessage::Chat {
            user_id: presence.user_id.clone(),
            message,
            ts: timestamp_millis(),
        };
        self.context
            .registry
            .broadcast(&presence.room_id, &chat, Some(&presence.user_id))
            .await;
        self.context.stats.chat_relayed();
        Flow::Continue
    }

    pub(crate) async fn on_leave(&mut self) -> Flow {
        if self.status != SessionStatus::Joined {
            return Flow::Continue;
        }
        self.close("leave").await;
        Flow::Close
    }

    /// Drives the session to `Closed`, deregistering it if it had joined.
    ///
    /// Safe to call any number of times; only the first call has effects.
    pub async fn close(&mut self, reason: &str) {
        if self.status == SessionStatus::Closed {
            return;
        }
        self.advance(SessionStatus::Closed);

        let Some(presence) = self.presence.take() else {
            return;
        };
        let remaining = self
            .context
            .registry
            .deregister(&presence.room_id, &presence.user_id, self.client.connection_id)
            .await;
        if let Some(remaining) = remaining {
            self.context.stats.disconnected();
            info!(
                connection = %self.client.connection_id,
                "👋 {} left space {} ({}), {} remaining",
                presence.user_id, presence.room_id, reason, remaining
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::tests::PlainTokens;
    use crate::config::ServerConfig;
    use crate::spaces::StaticSpaceDirectory;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    fn context() -> Arc<ServerContext> {
        let directory = StaticSpaceDirectory::new().with_space("spaceA", SpaceBounds::new(320, 320));
        Arc::new(ServerContext::new(
            ServerConfig::default(),
            Arc::new(PlainTokens),
            Arc::new(directory),
        ))
    }

    fn session(context: &Arc<ServerContext>) -> (Session, mpsc::Receiver<Message>) {
        let (client, rx) = ClientHandle::channel("127.0.0.1:9000".parse().unwrap(), 32);
        let mut session = Session::new(client, context.clone());
        session.accept();
        (session, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(frame.to_text().unwrap()).unwrap());
        }
        out
    }

    fn join(token: &str) -> JoinRequest {
        JoinRequest {
            space_id: "spaceA".to_string(),
            token: Some(token.to_string()),
        }
    }

    async fn joined(context: &Arc<ServerContext>, user: &str) -> (Session, mpsc::Receiver<Message>) {
        let (mut session, mut rx) = session(context);
        assert_eq!(session.on_join(join(&format!("User:{user}"))).await, Flow::Continue);
        assert_eq!(session.status(), SessionStatus::Joined);
        drain(&mut rx);
        (session, rx)
    }

    #[tokio::test]
    async fn test_status_starts_connecting_then_awaits_join() {
        let context = context();
        let (client, _rx) = ClientHandle::channel("127.0.0.1:9000".parse().unwrap(), 4);
        let mut session = Session::new(client, context);
        assert_eq!(session.status(), SessionStatus::Connecting);
        session.accept();
        assert_eq!(session.status(), SessionStatus::AwaitingJoin);
    }

    #[tokio::test]
    async fn test_messages_before_join_are_ignored() {
        let context = context();
        let (mut session, mut rx) = session(&context);

        assert_eq!(session.on_move(MoveRequest { x: 32, y: 0 }).await, Flow::Continue);
        assert_eq!(
            session
                .on_chat(ChatRequest {
                    message: "hi".to_string()
                })
                .await,
            Flow::Continue
        );
        assert_eq!(session.on_leave().await, Flow::Continue);

        assert_eq!(session.status(), SessionStatus::AwaitingJoin);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_rejected_join_closes_session() {
        let context = context();
        let (mut session, mut rx) = session(&context);

        let request = JoinRequest {
            space_id: "spaceA".to_string(),
            token: None,
        };
        assert_eq!(session.on_join(request).await, Flow::Close);
        assert_eq!(session.status(), SessionStatus::Closed);
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::JoinRejected {
                reason: crate::messaging::JoinRejectReason::InvalidToken
            }]
        );
        assert_eq!(context.stats.snapshot().joins_rejected, 1);

        // Terminal: a later join is not processed
        assert_eq!(session.on_join(join("User:alice")).await, Flow::Continue);
        assert_eq!(context.registry.room_count(), 0);
    }

    #[tokio::test]
    async fn test_second_join_is_ignored() {
        let context = context();
        let (mut session, mut rx) = joined(&context, "alice").await;

        assert_eq!(session.on_join(join("User:bob")).await, Flow::Continue);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(session.user_id(), Some("alice"));
        assert_eq!(context.registry.member_count("spaceA").await, 1);
    }

    #[tokio::test]
    async fn test_move_accept_and_reject() {
        let context = context();
        let (mut a, mut rx_a) = joined(&context, "a").await;
        let (_b, mut rx_b) = joined(&context, "b").await;
        drain(&mut rx_a);

        a.on_move(MoveRequest { x: 32, y: 0 }).await;
        assert_eq!(a.position(), Some(Position::new(32, 0)));
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::Movement {
                id: "a".to_string(),
                x: 32,
                y: 0
            }]
        );
        assert!(drain(&mut rx_a).is_empty());

        a.on_move(MoveRequest { x: 64, y: 32 }).await;
        assert_eq!(a.position(), Some(Position::new(32, 0)));
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::MovementRejected {}]);
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(
            context.registry.position_of("spaceA", "a").await,
            Some(Position::new(32, 0))
        );

        let stats = context.stats.snapshot();
        assert_eq!(stats.moves_accepted, 1);
        assert_eq!(stats.moves_rejected, 1);
    }

    #[tokio::test]
    async fn test_move_off_the_edge_rejected() {
        let context = context();
        let (mut a, mut rx_a) = joined(&context, "a").await;

        a.on_move(MoveRequest { x: -32, y: 0 }).await;
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::MovementRejected {}]);
        assert_eq!(a.position(), Some(Position::new(0, 0)));
    }

    #[tokio::test]
    async fn test_chat_relayed_without_echo() {
        let context = context();
        let (mut a, mut rx_a) = joined(&context, "a").await;
        let (_b, mut rx_b) = joined(&context, "b").await;
        drain(&mut rx_a);

        a.on_chat(ChatRequest {
            message: "  hello  ".to_string(),
        })
        .await;

        assert!(drain(&mut rx_a).is_empty());
        match drain(&mut rx_b).as_slice() {
            [ServerMessage::Chat { user_id, message, ts }] => {
                assert_eq!(user_id, "a");
                assert_eq!(message, "hello");
                assert!(*ts > 0);
            }
            other => panic!("unexpected messages: {:?}", other),
        }

        a.on_chat(ChatRequest {
            message: "   ".to_string(),
        })
        .await;
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(context.stats.snapshot().chats_relayed, 1);
    }

    #[tokio::test]
    async fn test_leave_then_close_announces_once() {
        let context = context();
        let (mut a, _rx_a) = joined(&context, "a").await;
        let (_b, mut rx_b) = joined(&context, "b").await;

        assert_eq!(a.on_leave().await, Flow::Close);
        assert_eq!(a.status(), SessionStatus::Closed);
        a.close("transport closed").await;
        a.close("transport closed").await;

        let left: Vec<_> = drain(&mut rx_b)
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::UserLeft { .. }))
            .collect();
        assert_eq!(
            left,
            vec![ServerMessage::UserLeft {
                id: "a".to_string(),
                user_id: "a".to_string()
            }]
        );
        assert_eq!(context.registry.member_count("spaceA").await, 1);
        assert_eq!(context.stats.snapshot().disconnects, 1);
    }

    #[tokio::test]
    async fn test_last_member_leaving_evicts_room() {
        let context = context();
        let (mut a, _rx) = joined(&context, "a").await;
        assert_eq!(context.registry.room_count(), 1);

        a.close("transport closed").await;
        assert_eq!(context.registry.room_count(), 0);
        assert_eq!(a.room_id(), None);
    }

    #[tokio::test]
    async fn test_mistyped_join_fields_are_rejected_not_dropped() {
        use crate::messaging::{route_client_message, JoinRejectReason};

        let context = context();
        let (mut numeric_token, mut rx) = session(&context);
        let flow = route_client_message(
            r#"{"type":"join","payload":{"spaceId":"spaceA","token":123}}"#,
            &mut numeric_token,
        )
        .await;
        assert_eq!(flow, Flow::Close);
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::JoinRejected {
                reason: JoinRejectReason::InvalidToken
            }]
        );

        let (mut no_space, mut rx) = session(&context);
        let flow = route_client_message(r#"{"type":"join","payload":{"token":"User:alice"}}"#, &mut no_space).await;
        assert_eq!(flow, Flow::Close);
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::JoinRejected {
                reason: JoinRejectReason::SpaceNotFound
            }]
        );
        assert_eq!(context.registry.room_count(), 0);
    }

    #[tokio::test]
    async fn test_stalled_member_torn_down_through_close() {
        let context = context();

        // Queue of one, filled by the space-joined snapshot and never drained
        let (client, _stalled_rx) = ClientHandle::channel("127.0.0.1:9001".parse().unwrap(), 1);
        let mut stalled = Session::new(client, context.clone());
        stalled.accept();
        assert_eq!(stalled.on_join(join("User:slow")).await, Flow::Continue);

        let (_b, mut rx_b) = joined(&context, "b").await;
        assert_eq!(context.stats.snapshot().deliveries_failed, 1);

        tokio::time::timeout(std::time::Duration::from_millis(100), stalled.client.teardown_requested())
            .await
            .expect("stalled member should be asked to tear down");
        stalled.close("delivery failed").await;
        stalled.close("transport closed").await;

        assert_eq!(stalled.status(), SessionStatus::Closed);
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::UserLeft {
                id: "slow".to_string(),
                user_id: "slow".to_string()
            }]
        );
        assert_eq!(context.registry.member_count("spaceA").await, 1);
        assert_eq!(context.registry.position_of("spaceA", "slow").await, None);
        assert_eq!(context.stats.snapshot().disconnects, 1);
    }

    #[tokio::test]
    async fn test_rejoin_after_leave_in_new_session() {
        let context = context();
        let (mut first, _rx) = joined(&context, "alice").await;
        first.close("leave").await;

        let (second, _rx2) = joined(&context, "alice").await;
        assert_eq!(second.room_id(), Some("spaceA"));
    }
}
