use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::de::{flex_f64, flex_f64_opt};
use crate::models::location::{Location, RawLocation};
use crate::models::order::{OrderId, OrderStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Delivery,
    Pickup,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEntry {
    pub status: OrderStatus,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotItem {
    pub food_name: String,
    pub quantity: u32,
    #[serde(deserialize_with = "flex_f64")]
    pub price: f64,
}

/// A complete point-in-time view of one order. Always replaced wholesale.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrackingSnapshot {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub status_display: String,
    pub timeline: Vec<TimelineEntry>,
    pub chef_location: Option<Location>,
    pub delivery_location: Option<Location>,
    pub agent_location: Option<Location>,
    pub estimated_time_remaining_minutes: Option<u32>,
    pub distance_km: Option<f64>,
    pub can_cancel: bool,
    pub cancellation_time_remaining_seconds: u64,
    pub items: Vec<SnapshotItem>,
    pub total_items: u32,
    pub total_amount: f64,
    pub order_type: OrderType,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimeline {
    Entries(Vec<TimelineEntry>),
    Map(BTreeMap<String, Option<DateTime<Utc>>>),
}

/// Wire form: every field optional so that missing required fields surface as a
/// data-shape error instead of a decode panic or a silent default.
#[derive(Deserialize)]
pub(crate) struct RawTrackingSnapshot {
    #[serde(default)]
    order_id: Option<OrderId>,
    #[serde(default)]
    status: Option<OrderStatus>,
    #[serde(default)]
    status_display: Option<String>,
    #[serde(default)]
    timeline: Option<RawTimeline>,
    #[serde(default)]
    chef_location: Option<RawLocation>,
    #[serde(default)]
    delivery_location: Option<RawLocation>,
    #[serde(default)]
    agent_location: Option<RawLocation>,
    #[serde(default)]
    estimated_time_remaining_minutes: Option<u32>,
    #[serde(default, deserialize_with = "flex_f64_opt")]
    distance_km: Option<f64>,
    #[serde(default)]
    can_cancel: Option<bool>,
    #[serde(default)]
    cancellation_time_remaining_seconds: Option<u64>,
    #[serde(default)]
    items: Option<Vec<SnapshotItem>>,
    #[serde(default)]
    total_items: Option<u32>,
    #[serde(default, deserialize_with = "flex_f64_opt")]
    total_amount: Option<f64>,
    #[serde(default)]
    order_type: Option<OrderType>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::DataShape(format!("tracking snapshot missing {field}")))
}

impl TrackingSnapshot {
    pub fn from_value(order_id: OrderId, value: serde_json::Value) -> Result<Self, AppError> {
        let raw: RawTrackingSnapshot = serde_json::from_value(value)
            .map_err(|err| AppError::DataShape(format!("tracking snapshot: {err}")))?;
        Self::from_raw(order_id, raw)
    }

    pub(crate) fn from_raw(order_id: OrderId, raw: RawTrackingSnapshot) -> Result<Self, AppError> {
        if let Some(reported) = raw.order_id {
            if reported != order_id {
                return Err(AppError::DataShape(format!(
                    "tracking snapshot for order {reported} returned for order {order_id}"
                )));
            }
        }

        let status = required(raw.status, "status")?;
        let items = required(raw.items, "items")?;
        let total_amount = required(raw.total_amount, "total_amount")?;
        let can_cancel = required(raw.can_cancel, "can_cancel")?;
        let order_type = required(raw.order_type, "order_type")?;

        let mut timeline = match raw.timeline {
            Some(RawTimeline::Entries(entries)) => entries,
            Some(RawTimeline::Map(map)) => map
                .into_iter()
                .filter_map(|(status, timestamp)| {
                    serde_json::from_value(serde_json::Value::String(status))
                        .ok()
                        .map(|status| TimelineEntry { status, timestamp })
                })
                .collect(),
            None => Vec::new(),
        };
        timeline.sort_by_key(|entry| {
            (
                entry.timestamp.is_none(),
                entry.timestamp,
                entry.status.pipeline_rank().unwrap_or(u8::MAX),
            )
        });

        let total_items = raw
            .total_items
            .unwrap_or_else(|| items.iter().map(|item| item.quantity).sum());

        Ok(Self {
            order_id,
            status,
            status_display: raw
                .status_display
                .filter(|display| !display.trim().is_empty())
                .unwrap_or_else(|| status.display_name().to_string()),
            timeline,
            chef_location: raw.chef_location.and_then(RawLocation::into_location),
            delivery_location: raw.delivery_location.and_then(RawLocation::into_location),
            agent_location: raw.agent_location.and_then(RawLocation::into_location),
            estimated_time_remaining_minutes: raw.estimated_time_remaining_minutes,
            distance_km: raw.distance_km.filter(|km| km.is_finite() && *km >= 0.0),
            can_cancel,
            cancellation_time_remaining_seconds: raw
                .cancellation_time_remaining_seconds
                .unwrap_or(0),
            items,
            total_items,
            total_amount,
            order_type,
        })
    }
}
