use std::sync::Arc;
use std::time::Duration;

use prometheus::IntGauge;
use tokio::sync::{watch, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::SharedBackend;
use crate::engine::optimistic::{OptimisticStore, PendingAction};
use crate::engine::poll_loop::{spawn_poll_loop, PollHandle, RequestSequencer};
use crate::error::AppError;
use crate::models::chat::{ChatMessage, MessageType, QuickMessage, SendMessageRequest};
use crate::models::order::OrderId;
use crate::observability::metrics::Metrics;

const MAX_MESSAGE_LEN: usize = 1000;

/// Keeps the gauge honest even when a send future is dropped mid-flight.
struct PendingGauge(IntGauge);

impl PendingGauge {
    fn enter(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for PendingGauge {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// The message list for one order's conversation with its courier. The list
/// is owned here; consumers read it through [`ChatChannel::subscribe`].
pub struct ChatChannel {
    order_id: OrderId,
    backend: SharedBackend,
    store: OptimisticStore<ChatMessage>,
    quick_replies: OnceCell<Vec<QuickMessage>>,
    sequencer: RequestSequencer,
    metrics: Metrics,
}

impl ChatChannel {
    pub fn new(order_id: OrderId, backend: SharedBackend, metrics: Metrics) -> Self {
        Self {
            order_id,
            backend,
            store: OptimisticStore::new(Vec::new()).with_ordering(ChatMessage::display_order),
            quick_replies: OnceCell::new(),
            sequencer: RequestSequencer::default(),
            metrics,
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.store.items()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.store.subscribe()
    }

    /// Fetches the full conversation and replaces the local list with it.
    pub async fn load_messages(&self) -> Result<Vec<ChatMessage>, AppError> {
        self.fetch_and_replace(None).await
    }

    /// Re-fetches the conversation every `period` until the handle is stopped.
    pub fn poll_messages(self: &Arc<Self>, period: Duration) -> PollHandle {
        let channel = Arc::clone(self);
        info!(order_id = self.order_id, period_secs = period.as_secs(), "chat polling started");
        spawn_poll_loop("chat", period, self.metrics.clone(), move |token| {
            let channel = channel.clone();
            async move { channel.fetch_and_replace(Some(&token)).await.map(|_| ()) }
        })
    }

    async fn fetch_and_replace(
        &self,
        token: Option<&CancellationToken>,
    ) -> Result<Vec<ChatMessage>, AppError> {
        let seq = self.sequencer.next();
        let messages = self.backend.list_messages(self.order_id).await?;

        if token.is_some_and(CancellationToken::is_cancelled) {
            debug!(order_id = self.order_id, "chat poll stopped; discarding messages");
            return Ok(self.messages());
        }
        if !self.sequencer.try_apply(seq) {
            self.metrics
                .stale_responses_total
                .with_label_values(&["chat"])
                .inc();
            debug!(order_id = self.order_id, seq, "discarding stale message list");
            return Ok(self.messages());
        }

        self.store.replace_all(messages);
        Ok(self.messages())
    }

    /// Appends the message locally, sends it, and swaps in the server's copy.
    /// On failure the local entry is removed and the error returned.
    pub async fn send_message(
        &self,
        text: &str,
        message_type: MessageType,
    ) -> Result<ChatMessage, AppError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::BadRequest("message cannot be empty".to_string()));
        }
        if message_type == MessageType::Other {
            return Err(AppError::BadRequest("unsupported message type".to_string()));
        }
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(AppError::BadRequest(format!(
                "message exceeds {MAX_MESSAGE_LEN} characters"
            )));
        }

        let optimistic = ChatMessage::optimistic(self.order_id, text.to_string(), message_type);
        let temp_id = optimistic.message_id;
        let request = SendMessageRequest {
            message: optimistic.message.clone(),
            message_type,
        };

        let _pending = PendingGauge::enter(&self.metrics.pending_optimistic_actions);
        let confirmed = self
            .store
            .execute_with_optimism(PendingAction::create(optimistic), || {
                self.backend.send_message(self.order_id, &request)
            })
            .await?;

        self.store.replace(&temp_id, confirmed.clone());
        debug!(order_id = self.order_id, message_id = %confirmed.message_id, "chat message sent");
        Ok(confirmed)
    }

    async fn templates(&self) -> Result<&[QuickMessage], AppError> {
        let templates = self
            .quick_replies
            .get_or_try_init(|| self.backend.quick_messages(self.order_id))
            .await?;
        Ok(templates.as_slice())
    }

    /// Canned openers, offered only while the conversation is empty. Fetched
    /// once per channel.
    pub async fn quick_replies(&self) -> Result<Vec<QuickMessage>, AppError> {
        if !self.messages().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.templates().await?.to_vec())
    }

    pub async fn send_quick_reply(&self, reply_id: u64) -> Result<ChatMessage, AppError> {
        let text = self
            .templates()
            .await?
            .iter()
            .find(|reply| reply.id == reply_id)
            .map(|reply| reply.text.clone())
            .ok_or_else(|| AppError::NotFound(format!("quick reply {reply_id} not found")))?;
        self.send_message(&text, MessageType::Text).await
    }
}
