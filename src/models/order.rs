use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::cook::{resolve_cook, CookRef, RawCook};
use crate::models::de::flex_f64_opt;

pub type OrderId = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Cart,
    Pending,
    Confirmed,
    Preparing,
    Ready,
    OutForDelivery,
    Delivered,
    Cancelled,
    Refunded,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Orders in these states are never tracked as active.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    pub fn is_trackable(self) -> bool {
        !self.is_terminal() && self != OrderStatus::Cart
    }

    /// Advisory only; the server enforces the cancellation window.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            OrderStatus::Cart | OrderStatus::Pending | OrderStatus::Confirmed
        )
    }

    /// Position along the delivery pipeline. `None` for the cancelled/refunded
    /// branch, which can be entered from any stage.
    pub fn pipeline_rank(self) -> Option<u8> {
        match self {
            OrderStatus::Cart => Some(0),
            OrderStatus::Pending | OrderStatus::Unknown => Some(1),
            OrderStatus::Confirmed => Some(2),
            OrderStatus::Preparing => Some(3),
            OrderStatus::Ready => Some(4),
            OrderStatus::OutForDelivery => Some(5),
            OrderStatus::Delivered => Some(6),
            OrderStatus::Cancelled | OrderStatus::Refunded => None,
        }
    }

    /// Whether observing `next` after `self` is a legal forward move.
    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        match (self.pipeline_rank(), next.pipeline_rank()) {
            (None, _) | (_, None) => true,
            (Some(current), Some(next)) => next >= current,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            OrderStatus::Cart => "Cart",
            OrderStatus::Pending => "Pending Payment",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Preparing => "Preparing",
            OrderStatus::Ready => "Ready for Pickup",
            OrderStatus::OutForDelivery => "Out for Delivery",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Refunded => "Refunded",
            OrderStatus::Unknown => "Pending",
        }
    }

    pub fn notification_message(self) -> &'static str {
        match self {
            OrderStatus::Cart | OrderStatus::Pending | OrderStatus::Unknown => {
                "Your order has been placed and is awaiting confirmation."
            }
            OrderStatus::Confirmed => "Your order has been confirmed by the cook.",
            OrderStatus::Preparing => "Your food is being prepared.",
            OrderStatus::Ready => "Your order is ready.",
            OrderStatus::OutForDelivery => "Your order is on the way!",
            OrderStatus::Delivered => "Your order has been delivered. Enjoy your meal!",
            OrderStatus::Cancelled => "Your order has been cancelled.",
            OrderStatus::Refunded => "Your order has been refunded.",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "OrderPayload")]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub status: OrderStatus,
    pub total_amount: f64,
    pub delivery_fee: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub cook: Option<CookRef>,
}

#[derive(Deserialize)]
struct OrderPayload {
    id: OrderId,
    #[serde(default)]
    order_number: Option<String>,
    status: OrderStatus,
    #[serde(default, deserialize_with = "flex_f64_opt")]
    total_amount: Option<f64>,
    #[serde(default, deserialize_with = "flex_f64_opt")]
    delivery_fee: Option<f64>,
    created_at: DateTime<Utc>,
    #[serde(default, alias = "chef")]
    cook: Option<RawCook>,
    #[serde(default, alias = "chef_id")]
    cook_id: Option<RawCook>,
}

impl TryFrom<OrderPayload> for Order {
    type Error = String;

    fn try_from(payload: OrderPayload) -> Result<Self, Self::Error> {
        Ok(Self {
            id: payload.id,
            order_number: payload
                .order_number
                .unwrap_or_else(|| format!("#{}", payload.id)),
            status: payload.status,
            total_amount: payload.total_amount.unwrap_or(0.0),
            delivery_fee: payload.delivery_fee,
            created_at: payload.created_at,
            cook: resolve_cook(payload.cook, payload.cook_id)?,
        })
    }
}

/// Order lists arrive either bare or inside a paginated envelope.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum OrderListPayload {
    Paginated { results: Vec<Order> },
    Bare(Vec<Order>),
}

impl OrderListPayload {
    pub fn into_orders(self) -> Vec<Order> {
        match self {
            OrderListPayload::Paginated { results } => results,
            OrderListPayload::Bare(orders) => orders,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelOutcome {
    #[serde(default = "success_by_default")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "flex_f64_opt")]
    pub refund_amount: Option<f64>,
}

fn success_by_default() -> bool {
    true
}
