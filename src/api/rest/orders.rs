use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::engine::location::MapView;
use crate::engine::registry::{DetailState, RegistryView};
use crate::engine::tracker::TrackingView;
use crate::error::AppError;
use crate::geo::fee::OrderKind;
use crate::geo::quote::{CourierCandidate, CourierQuote};
use crate::models::location::GeoPoint;
use crate::models::order::{CancelOutcome, OrderId};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/active", get(active_orders))
        .route("/orders/:id/select", post(select_order))
        .route("/orders/:id/dismiss", post(dismiss_order))
        .route("/orders/:id/reopen", post(reopen_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/tracking", get(tracking))
        .route("/tracking/refresh", post(refresh))
        .route("/tracking/detail", put(set_detail))
        .route("/tracking/courier-quotes", post(courier_quotes))
        .route("/map", get(map_view))
        .route("/me/location", get(my_location))
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Deserialize)]
pub struct CourierQuoteRequest {
    pub candidates: Vec<CourierCandidate>,
    #[serde(default)]
    pub kind: OrderKind,
}

async fn active_orders(State(state): State<Arc<AppState>>) -> Json<RegistryView> {
    Json(state.tracker.registry_view())
}

async fn select_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
) -> Result<Json<RegistryView>, AppError> {
    state.tracker.select_order(id)?;
    Ok(Json(state.tracker.registry_view()))
}

async fn dismiss_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
) -> Result<Json<RegistryView>, AppError> {
    state.tracker.dismiss(id)?;
    Ok(Json(state.tracker.registry_view()))
}

async fn reopen_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
) -> Result<Json<RegistryView>, AppError> {
    state.tracker.reopen(id).await?;
    Ok(Json(state.tracker.registry_view()))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
    Json(payload): Json<CancelOrderRequest>,
) -> Result<Json<CancelOutcome>, AppError> {
    let outcome = state.tracker.cancel_order(id, &payload.reason).await?;
    Ok(Json(outcome))
}

async fn tracking(State(state): State<Arc<AppState>>) -> Result<Json<TrackingView>, AppError> {
    state
        .tracker
        .tracking_view()
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no active order selected".to_string()))
}

async fn refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Option<TrackingView>>, AppError> {
    Ok(Json(state.tracker.refresh().await?))
}

async fn set_detail(
    State(state): State<Arc<AppState>>,
    Json(detail): Json<DetailState>,
) -> Result<Json<RegistryView>, AppError> {
    state.tracker.set_detail(detail)?;
    Ok(Json(state.tracker.registry_view()))
}

async fn courier_quotes(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CourierQuoteRequest>,
) -> Result<Json<Vec<CourierQuote>>, AppError> {
    let quotes = state
        .tracker
        .courier_quotes(&payload.candidates, payload.kind)?;
    Ok(Json(quotes))
}

async fn map_view(State(state): State<Arc<AppState>>) -> Result<Json<MapView>, AppError> {
    state
        .tracker
        .map_view()
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no map view for the selected order yet".to_string()))
}

async fn my_location(State(state): State<Arc<AppState>>) -> Result<Json<GeoPoint>, AppError> {
    Ok(Json(state.tracker.locate_user().await?))
}
