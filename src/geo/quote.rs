use serde::{Deserialize, Serialize};

use crate::geo::eta::estimated_eta_minutes;
use crate::geo::fee::{FeeSchedule, OrderKind};
use crate::geo::{haversine_km, round2};
use crate::models::location::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierCandidate {
    pub id: u64,
    pub name: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CourierQuote {
    pub courier_id: u64,
    pub pickup_distance_km: f64,
    pub route_distance_km: f64,
    pub fee: f64,
    pub eta_minutes: u32,
}

/// Quotes every candidate for the kitchen -> destination leg. The fee only
/// depends on the delivery leg; the ETA includes the courier's pickup leg.
/// Result is ordered by total route distance, closest first.
pub fn compare_couriers(
    schedule: &FeeSchedule,
    kind: OrderKind,
    kitchen: &GeoPoint,
    destination: &GeoPoint,
    candidates: &[CourierCandidate],
) -> Vec<CourierQuote> {
    let delivery_km = haversine_km(kitchen, destination);
    let fee = schedule.fee(delivery_km, kind);

    let mut quotes: Vec<CourierQuote> = candidates
        .iter()
        .filter(|courier| courier.location.is_valid())
        .map(|courier| {
            let pickup_km = haversine_km(&courier.location, kitchen);
            let route_km = pickup_km + delivery_km;
            CourierQuote {
                courier_id: courier.id,
                pickup_distance_km: round2(pickup_km),
                route_distance_km: round2(route_km),
                fee,
                eta_minutes: estimated_eta_minutes(route_km),
            }
        })
        .collect();

    quotes.sort_by(|a, b| {
        a.route_distance_km
            .total_cmp(&b.route_distance_km)
            .then_with(|| a.courier_id.cmp(&b.courier_id))
    });
    quotes
}
