pub mod http;
#[cfg(test)]
pub(crate) mod scripted;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::chat::{ChatMessage, QuickMessage, SendMessageRequest};
use crate::models::order::{CancelOutcome, Order, OrderId};
use crate::models::tracking::TrackingSnapshot;

pub use http::HttpBackend;

/// The marketplace endpoints the tracking engine consumes. Every call is a
/// suspension point; implementations classify failures into [`AppError`]
/// variants so callers can tell transient failures from rejections.
#[async_trait]
pub trait TrackingBackend: Send + Sync {
    /// All of the current user's orders, newest first.
    async fn list_orders(&self) -> Result<Vec<Order>, AppError>;

    async fn fetch_tracking(&self, order_id: OrderId) -> Result<TrackingSnapshot, AppError>;

    async fn cancel_order(&self, order_id: OrderId, reason: &str) -> Result<CancelOutcome, AppError>;

    async fn list_messages(&self, order_id: OrderId) -> Result<Vec<ChatMessage>, AppError>;

    async fn send_message(
        &self,
        order_id: OrderId,
        request: &SendMessageRequest,
    ) -> Result<ChatMessage, AppError>;

    async fn quick_messages(&self, order_id: OrderId) -> Result<Vec<QuickMessage>, AppError>;
}

pub type SharedBackend = Arc<dyn TrackingBackend>;
