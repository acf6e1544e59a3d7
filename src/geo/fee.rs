use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::eta::{estimated_eta_minutes, Eta};
use crate::geo::round2;

/// Tiered fee table: flat `base_fee` inside `base_radius_km`, then
/// `per_km_rate` for the excess distance only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeeSchedule {
    pub base_fee: f64,
    pub base_radius_km: f64,
    pub per_km_rate: f64,
    pub bulk_multiplier: f64,
}

/// Canonical table, matching what the marketplace backend charges.
pub const STANDARD_FEE_SCHEDULE: FeeSchedule = FeeSchedule {
    base_fee: 50.0,
    base_radius_km: 5.0,
    per_km_rate: 15.0,
    bulk_multiplier: 5.0,
};

/// Competing table seen at the checkout call site. Product has not decided
/// between the two, so it is never applied unless passed in explicitly.
pub const CHECKOUT_FEE_SCHEDULE: FeeSchedule = FeeSchedule {
    base_fee: 300.0,
    base_radius_km: 5.0,
    per_km_rate: 100.0,
    bulk_multiplier: 1.0,
};

const NIGHT_SURCHARGE_RATE: f64 = 0.10;
/// Absorbs float noise such as 34.5000000001 before rounding up to a cent.
const CENT_EPSILON: f64 = 1e-6;
const NIGHT_START_HOUR: u32 = 18;
const NIGHT_END_HOUR: u32 = 5;

impl Default for FeeSchedule {
    fn default() -> Self {
        STANDARD_FEE_SCHEDULE
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    #[default]
    Regular,
    Bulk,
}

impl FeeSchedule {
    pub fn fee(&self, distance_km: f64, kind: OrderKind) -> f64 {
        let distance_km = sanitize_km(distance_km);
        let base = match kind {
            OrderKind::Regular => self.base_fee,
            OrderKind::Bulk => self.base_fee * self.bulk_multiplier,
        };
        let excess_km = (distance_km - self.base_radius_km).max(0.0);
        round2(base + excess_charge(excess_km, self.per_km_rate))
    }
}

/// Charge for distance past the base radius, rounded up to the next cent. Any
/// excess at all costs at least one cent.
fn excess_charge(excess_km: f64, per_km_rate: f64) -> f64 {
    if excess_km <= 0.0 || per_km_rate <= 0.0 {
        return 0.0;
    }
    let cents = (excess_km * per_km_rate * 100.0 - CENT_EPSILON).ceil().max(1.0);
    cents / 100.0
}

/// Delivery fee for a regular order under the canonical table.
pub fn delivery_fee(distance_km: f64) -> f64 {
    STANDARD_FEE_SCHEDULE.fee(distance_km, OrderKind::Regular)
}

fn sanitize_km(distance_km: f64) -> f64 {
    if distance_km.is_finite() {
        distance_km.max(0.0)
    } else {
        0.0
    }
}

pub fn is_night(at: DateTime<Utc>, local_offset: FixedOffset) -> bool {
    let hour = at.with_timezone(&local_offset).hour();
    hour >= NIGHT_START_HOUR || hour < NIGHT_END_HOUR
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeeQuote {
    pub distance_km: f64,
    pub kind: OrderKind,
    pub distance_fee: f64,
    pub night_surcharge: f64,
    pub total_fee: f64,
    pub is_night: bool,
    pub eta: Eta,
}

pub fn quote_fee(
    schedule: &FeeSchedule,
    distance_km: f64,
    kind: OrderKind,
    at: DateTime<Utc>,
    local_offset: FixedOffset,
) -> FeeQuote {
    let distance_fee = schedule.fee(distance_km, kind);
    let night = is_night(at, local_offset);
    let night_surcharge = if night {
        round2(distance_fee * NIGHT_SURCHARGE_RATE)
    } else {
        0.0
    };

    FeeQuote {
        distance_km: round2(sanitize_km(distance_km)),
        kind,
        distance_fee,
        night_surcharge,
        total_fee: round2(distance_fee + night_surcharge),
        is_night: night,
        eta: Eta::Estimated(estimated_eta_minutes(distance_km)),
    }
}
