//! WebSocket layer for realtime chat delivery.
//!
//! Connection lifecycle:
//! 1. Client opens `GET /ws/subscribe?tenant_id=..&provider_id=..` (or
//!    `conversation_id=..`); the scope is checked against the tenant before
//!    the upgrade, so a bad scope gets a JSON error and no socket
//! 2. Server sends `subscribed` with the subscription id
//! 3. Matching change events are forwarded as `event` frames
//! 4. Heartbeat every 30s; 3 unanswered = disconnect
//! 5. On disconnect the subscription is removed from the dispatcher

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::realtime::{
    ChangeEvent, EventEnvelope, SeenMessages, Subscription, SubscriptionScope,
};

/// Heartbeat interval: server sends Heartbeat every 30 seconds.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Disconnect after this many missed heartbeats (3 × 30s = 90s).
const MAX_MISSED_HEARTBEATS: u32 = 3;

/// Query parameters for WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    pub tenant_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
}

impl SubscribeQuery {
    /// Exactly one of `provider_id` / `conversation_id` must be given.
    fn scope(&self) -> Result<SubscriptionScope, ApiError> {
        match (self.provider_id, self.conversation_id) {
            (Some(provider_id), None) => Ok(SubscriptionScope::Provider {
                tenant_id: self.tenant_id,
                provider_id,
            }),
            (None, Some(conversation_id)) => Ok(SubscriptionScope::Conversation {
                tenant_id: self.tenant_id,
                conversation_id,
            }),
            _ => Err(ApiError::BadRequest(
                "exactly one of provider_id or conversation_id is required".into(),
            )),
        }
    }
}

/// Server → client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutgoing {
    Subscribed {
        subscription_id: Uuid,
        scope: SubscriptionScope,
    },
    Event {
        envelope: EventEnvelope,
    },
    Heartbeat {
        server_time: String,
    },
}

/// Client → server frames. Anything else is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsIncoming {
    Pong {},
}

// ═══════════════════════════════════════════════════════════
// WsSessionState: testable per-connection state
// ═══════════════════════════════════════════════════════════

#[derive(Debug, PartialEq)]
pub(crate) enum HeartbeatAction {
    SendHeartbeat,
    HeartbeatTimeout,
}

/// Heartbeat bookkeeping and duplicate suppression for one connection,
/// kept apart from `handle_ws` so it can be tested without a socket.
pub(crate) struct WsSessionState {
    missed_heartbeats: u32,
    seen: SeenMessages,
}

impl WsSessionState {
    fn new() -> Self {
        Self {
            missed_heartbeats: 0,
            seen: SeenMessages::new(),
        }
    }

    /// Any frame from the client proves it is alive.
    fn on_client_activity(&mut self) {
        self.missed_heartbeats = 0;
    }

    fn on_heartbeat_tick(&mut self) -> HeartbeatAction {
        if self.missed_heartbeats >= MAX_MISSED_HEARTBEATS {
            return HeartbeatAction::HeartbeatTimeout;
        }
        self.missed_heartbeats += 1;
        HeartbeatAction::SendHeartbeat
    }

    /// A message insert is forwarded once per connection. Updates, typing
    /// and conversation changes always pass.
    fn should_forward(&mut self, envelope: &EventEnvelope) -> bool {
        match &envelope.payload {
            ChangeEvent::MessageInserted { message } => self.seen.check_and_insert(message.id),
            _ => true,
        }
    }
}

/// WebSocket upgrade handler.
///
/// Registers the subscription before upgrading; scope errors are returned
/// as regular HTTP responses.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(ctx): State<ApiContext>,
    Query(query): Query<SubscribeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = query.scope()?;
    let subscription = ctx.service.subscribe(scope)?;

    tracing::info!(
        subscription_id = %subscription.id,
        tenant_id = %query.tenant_id,
        "WebSocket subscription accepted"
    );
    Ok(ws.on_upgrade(move |socket| handle_ws(socket, ctx, subscription)))
}

/// Main WebSocket connection handler.
///
/// Spawns a sender task for channel→WS forwarding, then runs the
/// delivery + receive + heartbeat loop until either side goes away.
async fn handle_ws(socket: WebSocket, ctx: ApiContext, subscription: Subscription) {
    let Subscription {
        id: subscription_id,
        scope,
        mut receiver,
    } = subscription;

    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, rx) = mpsc::channel::<WsOutgoing>(64);

    // Spawn sender task (reads from channel, writes to WebSocket)
    let sender_handle = tokio::spawn(async move {
        let mut sink = ws_sink;
        let mut rx = rx;
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping unserializable WS frame");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let _ = tx
        .send(WsOutgoing::Subscribed {
            subscription_id,
            scope,
        })
        .await;

    let mut session = WsSessionState::new();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // Consume initial immediate tick

    loop {
        tokio::select! {
            delivered = receiver.recv() => {
                match delivered {
                    Some(envelope) => {
                        if !session.should_forward(&envelope) {
                            tracing::debug!(event_id = %envelope.event_id, "Duplicate message suppressed");
                            continue;
                        }
                        if tx.send(WsOutgoing::Event { envelope }).await.is_err() {
                            break;
                        }
                    }
                    // Dispatcher closed or subscription removed.
                    None => break,
                }
            }
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(ref text))) => {
                        session.on_client_activity();
                        if let Ok(WsIncoming::Pong {}) = serde_json::from_str::<WsIncoming>(text) {
                            tracing::trace!(subscription_id = %subscription_id, "Heartbeat answered");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // Ping/Pong frames are answered by axum/tungstenite.
                    Some(Ok(_)) => session.on_client_activity(),
                }
            }
            _ = heartbeat.tick() => {
                match session.on_heartbeat_tick() {
                    HeartbeatAction::HeartbeatTimeout => {
                        tracing::info!(
                            subscription_id = %subscription_id,
                            "{MAX_MISSED_HEARTBEATS} missed heartbeats, disconnecting"
                        );
                        break;
                    }
                    HeartbeatAction::SendHeartbeat => {
                        let _ = tx.send(WsOutgoing::Heartbeat {
                            server_time: chrono::Utc::now().to_rfc3339(),
                        }).await;
                    }
                }
            }
        }
    }

    // Cleanup: drop sender (stops sender task), remove subscription
    drop(tx);
    let _ = sender_handle.await;
    ctx.service.unsubscribe(&subscription_id);

    tracing::info!(subscription_id = %subscription_id, "WebSocket disconnected");
}
