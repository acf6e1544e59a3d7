use serde::Serialize;

use crate::models::order::OrderStatus;
use crate::models::tracking::OrderType;

const MINUTES_PER_KM: f64 = 2.0;
const PREPARATION_BUFFER_MINUTES: u32 = 30;

/// Where an ETA came from. A server-supplied value always wins over the local
/// placeholder estimate.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "source", content = "minutes", rename_all = "snake_case")]
pub enum Eta {
    Server(u32),
    Estimated(u32),
}

impl Eta {
    pub fn minutes(self) -> u32 {
        match self {
            Eta::Server(minutes) | Eta::Estimated(minutes) => minutes,
        }
    }

    pub fn is_authoritative(self) -> bool {
        matches!(self, Eta::Server(_))
    }
}

fn travel_minutes(distance_km: f64) -> u32 {
    let distance_km = if distance_km.is_finite() {
        distance_km.max(0.0)
    } else {
        0.0
    };
    let travel = (distance_km * MINUTES_PER_KM).ceil();
    travel.min(u32::MAX as f64) as u32
}

/// Rough linear model: travel minutes rounded up, plus a fixed preparation buffer.
pub fn estimated_eta_minutes(distance_km: f64) -> u32 {
    PREPARATION_BUFFER_MINUTES.saturating_add(travel_minutes(distance_km))
}

/// Minutes left for an order already placed. The preparation buffer only
/// applies until the food is ready, and pickup orders have no travel leg.
pub fn remaining_eta_minutes(status: OrderStatus, order_type: OrderType, distance_km: f64) -> u32 {
    let preparing = status
        .pipeline_rank()
        .is_some_and(|rank| rank < OrderStatus::Ready.pipeline_rank().unwrap_or(u8::MAX));
    let buffer = if preparing { PREPARATION_BUFFER_MINUTES } else { 0 };

    match order_type {
        OrderType::Pickup => buffer,
        OrderType::Delivery => buffer.saturating_add(travel_minutes(distance_km)),
    }
}

/// Server value when present, else a local estimate. Delivery estimates need
/// a distance; pickup estimates do not.
pub fn resolve_eta(
    server_minutes: Option<u32>,
    status: OrderStatus,
    order_type: OrderType,
    distance_km: Option<f64>,
) -> Option<Eta> {
    if let Some(minutes) = server_minutes {
        return Some(Eta::Server(minutes));
    }
    let km = match (order_type, distance_km) {
        (OrderType::Pickup, _) => 0.0,
        (OrderType::Delivery, Some(km)) => km,
        (OrderType::Delivery, None) => return None,
    };
    Some(Eta::Estimated(remaining_eta_minutes(status, order_type, km)))
}
