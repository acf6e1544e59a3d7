//! In-memory backend for unit tests. Responses are scripted per call and may
//! carry a delay so tests can interleave requests under paused time.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::backend::TrackingBackend;
use crate::error::AppError;
use crate::models::chat::{ChatMessage, QuickMessage, SendMessageRequest};
use crate::models::order::{CancelOutcome, Order, OrderId, OrderStatus};
use crate::models::tracking::{OrderType, SnapshotItem, TrackingSnapshot};

type Scripted<T> = (Duration, Result<T, AppError>);

#[derive(Default)]
pub struct ScriptedBackend {
    orders: Mutex<VecDeque<Scripted<Vec<Order>>>>,
    tracking: Mutex<HashMap<OrderId, VecDeque<Scripted<TrackingSnapshot>>>>,
    messages: Mutex<VecDeque<Scripted<Vec<ChatMessage>>>>,
    sends: Mutex<VecDeque<Scripted<()>>>,
    quick: Mutex<Vec<QuickMessage>>,
    cancel: Mutex<Option<Result<CancelOutcome, AppError>>>,
    pub tracking_calls: AtomicUsize,
    pub order_calls: AtomicUsize,
    pub quick_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pub sent: Mutex<Vec<SendMessageRequest>>,
}

/// Pops the next scripted response; the last one repeats.
fn next<T: Clone>(queue: &mut VecDeque<Scripted<T>>) -> Option<Scripted<T>> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

async fn settle<T>(scripted: Scripted<T>) -> Result<T, AppError> {
    let (delay, result) = scripted;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    result
}

impl ScriptedBackend {
    pub fn push_orders(&self, orders: Vec<Order>) {
        self.orders
            .lock()
            .unwrap()
            .push_back((Duration::ZERO, Ok(orders)));
    }

    pub fn push_tracking(&self, order_id: OrderId, snapshot: TrackingSnapshot) {
        self.push_tracking_after(order_id, Duration::ZERO, Ok(snapshot));
    }

    pub fn push_tracking_after(
        &self,
        order_id: OrderId,
        delay: Duration,
        result: Result<TrackingSnapshot, AppError>,
    ) {
        self.tracking
            .lock()
            .unwrap()
            .entry(order_id)
            .or_default()
            .push_back((delay, result));
    }

    pub fn push_messages(&self, messages: Vec<ChatMessage>) {
        self.messages
            .lock()
            .unwrap()
            .push_back((Duration::ZERO, Ok(messages)));
    }

    pub fn push_send(&self, delay: Duration, result: Result<(), AppError>) {
        self.sends.lock().unwrap().push_back((delay, result));
    }

    pub fn set_quick_messages(&self, quick: Vec<QuickMessage>) {
        *self.quick.lock().unwrap() = quick;
    }

    pub fn set_cancel(&self, outcome: Result<CancelOutcome, AppError>) {
        *self.cancel.lock().unwrap() = Some(outcome);
    }
}

#[async_trait]
impl TrackingBackend for ScriptedBackend {
    async fn list_orders(&self) -> Result<Vec<Order>, AppError> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = next(&mut self.orders.lock().unwrap());
        match scripted {
            Some(scripted) => settle(scripted).await,
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_tracking(&self, order_id: OrderId) -> Result<TrackingSnapshot, AppError> {
        self.tracking_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .tracking
            .lock()
            .unwrap()
            .get_mut(&order_id)
            .and_then(next);
        match scripted {
            Some(scripted) => settle(scripted).await,
            None => Err(AppError::NotFound(format!("order {order_id}"))),
        }
    }

    async fn cancel_order(&self, order_id: OrderId, _reason: &str) -> Result<CancelOutcome, AppError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.cancel
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(AppError::NotFound(format!("order {order_id}"))))
    }

    async fn list_messages(&self, _order_id: OrderId) -> Result<Vec<ChatMessage>, AppError> {
        let scripted = next(&mut self.messages.lock().unwrap());
        match scripted {
            Some(scripted) => settle(scripted).await,
            None => Ok(Vec::new()),
        }
    }

    async fn send_message(
        &self,
        order_id: OrderId,
        request: &SendMessageRequest,
    ) -> Result<ChatMessage, AppError> {
        self.sent.lock().unwrap().push(request.clone());
        let scripted = next(&mut self.sends.lock().unwrap()).unwrap_or((Duration::ZERO, Ok(())));
        settle(scripted).await?;
        Ok(ChatMessage {
            message_id: Uuid::new_v4(),
            order_id,
            message: request.message.clone(),
            is_own_message: true,
            is_read: false,
            created_at: Utc::now(),
            message_type: request.message_type,
            pending: false,
        })
    }

    async fn quick_messages(&self, _order_id: OrderId) -> Result<Vec<QuickMessage>, AppError> {
        self.quick_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.quick.lock().unwrap().clone())
    }
}

pub fn snapshot(order_id: OrderId, status: OrderStatus) -> TrackingSnapshot {
    TrackingSnapshot {
        order_id,
        status,
        status_display: status.display_name().to_string(),
        timeline: Vec::new(),
        chef_location: None,
        delivery_location: None,
        agent_location: None,
        estimated_time_remaining_minutes: None,
        distance_km: None,
        can_cancel: status.is_cancellable(),
        cancellation_time_remaining_seconds: 0,
        items: vec![SnapshotItem {
            food_name: "Kottu".to_string(),
            quantity: 1,
            price: 850.0,
        }],
        total_items: 1,
        total_amount: 850.0,
        order_type: OrderType::Delivery,
    }
}

pub fn order(id: OrderId, status: OrderStatus) -> Order {
    Order {
        id,
        order_number: format!("ORD-{id}"),
        status,
        total_amount: 850.0,
        delivery_fee: None,
        created_at: Utc::now(),
        cook: None,
    }
}
