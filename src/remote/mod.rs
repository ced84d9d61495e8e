//! Remote operations against Home Assistant servers
//!
//! This module provides the client side of the Home Assistant WebSocket API
//! used by the liveness worker: the push notification channel, notification
//! acknowledgements and keepalive pings.

pub mod websocket_client;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;

use crate::errors::Result;
use crate::models::PushMessage;

pub use websocket_client::{WebSocketRepository, WebSocketRepositoryProvider};

/// Real-time API of one server
#[async_trait]
pub trait RealtimeApi: Send + Sync {
    /// Subscribe to the push notification channel. `None` when the
    /// subscription could not be established. Dropping the stream
    /// unsubscribes.
    async fn notifications(&self) -> Option<BoxStream<'static, PushMessage>>;

    /// Confirm receipt of a notification. `Ok(false)` when the server
    /// answered but refused.
    async fn ack_notification(&self, confirm_id: &str) -> Result<bool>;

    /// Round-trip a ping; `true` on pong
    async fn send_ping(&self) -> bool;
}

/// Hands out the [`RealtimeApi`] for a given server id
#[async_trait]
pub trait RealtimeApiProvider: Send + Sync {
    async fn api_for(&self, server_id: u32) -> Result<Arc<dyn RealtimeApi>>;
}
