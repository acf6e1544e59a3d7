use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::SharedBackend;
use crate::config::Config;
use crate::engine::chat::ChatChannel;
use crate::engine::geolocation::{locate_user, PositionSource};
use crate::engine::location::{run_location_sync, LocationSynchronizer, MapSettings, MapView};
use crate::engine::poll_loop::PollHandle;
use crate::engine::poller::{StatusChange, StatusPoller};
use crate::engine::registry::{
    run_order_registry, DetailState, OrderRegistry, RegistryHandle, RegistryView,
};
use crate::error::AppError;
use crate::geo::eta::{resolve_eta, Eta};
use crate::geo::fee::{quote_fee, FeeQuote, FeeSchedule, OrderKind};
use crate::geo::quote::{compare_couriers, CourierCandidate, CourierQuote};
use crate::geo::{haversine_km, round2};
use crate::models::chat::{ChatMessage, MessageType, QuickMessage};
use crate::models::location::GeoPoint;
use crate::models::order::{CancelOutcome, Order, OrderId};
use crate::models::tracking::{OrderType, TrackingSnapshot};
use crate::observability::metrics::Metrics;

const REGISTRY_COMMAND_BUFFER: usize = 32;

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub order_refresh_interval: Duration,
    pub status_poll_interval: Duration,
    pub chat_poll_interval: Duration,
    pub event_buffer_size: usize,
    pub map: MapSettings,
    pub fee_schedule: FeeSchedule,
    pub local_offset: FixedOffset,
}

impl TrackerSettings {
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let local_offset = FixedOffset::east_opt(config.local_utc_offset_minutes * 60)
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "LOCAL_UTC_OFFSET_MINUTES out of range: {}",
                    config.local_utc_offset_minutes
                ))
            })?;

        Ok(Self {
            order_refresh_interval: config.order_refresh_interval,
            status_poll_interval: config.status_poll_interval,
            chat_poll_interval: config.chat_poll_interval,
            event_buffer_size: config.event_buffer_size,
            map: MapSettings {
                default_kitchen: config.default_kitchen,
                max_single_point_zoom: config.max_single_point_zoom,
                maps_api_key: config.maps_api_key.clone(),
            },
            fee_schedule: FeeSchedule::default(),
            local_offset,
        })
    }
}

/// Everything the presentation layer needs to render the selected order.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingView {
    pub order: Order,
    /// `None` until the first poll for this order lands.
    pub snapshot: Option<TrackingSnapshot>,
    pub cancellation_seconds_remaining: u64,
    pub can_cancel_now: bool,
    pub eta: Option<Eta>,
    pub fee: Option<FeeQuote>,
    pub indicator_visible: bool,
    pub detail: DetailState,
    pub fetched_at: Option<DateTime<Utc>>,
}

struct ChatSession {
    channel: Arc<ChatChannel>,
    _poll: PollHandle,
}

/// Keeps status polling alive while held.
pub struct ViewGuard {
    consumers: Arc<watch::Sender<usize>>,
}

impl Drop for ViewGuard {
    fn drop(&mut self) {
        self.consumers.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Wires the registry, status poller, map synchronizer and chat channels
/// together and exposes the commands the presentation layer calls.
pub struct Tracker {
    backend: SharedBackend,
    metrics: Metrics,
    settings: TrackerSettings,
    registry: Arc<OrderRegistry>,
    registry_handle: RegistryHandle,
    poller: StatusPoller,
    map_rx: watch::Receiver<Option<MapView>>,
    chats: Arc<DashMap<OrderId, ChatSession>>,
    consumers: Arc<watch::Sender<usize>>,
    position_source: Arc<dyn PositionSource>,
    token: CancellationToken,
}

impl Tracker {
    /// Builds the tracker and spawns its background tasks on the current runtime.
    pub fn start(
        backend: SharedBackend,
        metrics: Metrics,
        settings: TrackerSettings,
        position_source: Arc<dyn PositionSource>,
    ) -> Arc<Self> {
        let token = CancellationToken::new();
        let registry = Arc::new(OrderRegistry::new(backend.clone(), metrics.clone()));
        let (registry_handle, commands) = RegistryHandle::channel(REGISTRY_COMMAND_BUFFER);
        let poller = StatusPoller::new(
            backend.clone(),
            metrics.clone(),
            Some(registry_handle.clone()),
            settings.event_buffer_size,
        );

        let sync = LocationSynchronizer::new(settings.map.clone());
        let map_rx = sync.subscribe();
        let (consumers, consumers_rx) = watch::channel(0usize);
        let chats = Arc::new(DashMap::new());

        tokio::spawn(run_order_registry(
            registry.clone(),
            commands,
            settings.order_refresh_interval,
            token.child_token(),
        ));
        tokio::spawn(follow_selection(
            poller.clone(),
            registry.subscribe(),
            consumers_rx,
            settings.status_poll_interval,
            token.child_token(),
        ));
        tokio::spawn(run_location_sync(sync, poller.subscribe(), token.child_token()));
        tokio::spawn(close_inactive_chats(
            chats.clone(),
            registry.subscribe(),
            token.child_token(),
        ));

        info!("tracker started");

        Arc::new(Self {
            backend,
            metrics,
            settings,
            registry,
            registry_handle,
            poller,
            map_rx,
            chats,
            consumers: Arc::new(consumers),
            position_source,
            token,
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn registry_handle(&self) -> RegistryHandle {
        self.registry_handle.clone()
    }

    /// Registers a consumer of the tracking view. Status polling runs while
    /// at least one guard is alive.
    pub fn attach(&self) -> ViewGuard {
        self.consumers.send_modify(|count| *count += 1);
        ViewGuard {
            consumers: self.consumers.clone(),
        }
    }

    pub fn consumer_count(&self) -> usize {
        *self.consumers.borrow()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    pub fn registry_view(&self) -> RegistryView {
        self.registry.view()
    }

    pub fn active_orders(&self) -> Vec<Order> {
        self.registry.view().active_orders
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StatusChange> {
        self.poller.subscribe_events()
    }

    pub fn tracking_view(&self) -> Option<TrackingView> {
        let view = self.registry.view();
        let order = view.selected_order()?.clone();
        let tracked = self
            .poller
            .current()
            .filter(|tracked| tracked.snapshot.order_id == order.id);

        let now = Instant::now();
        let (cancellation_seconds_remaining, can_cancel_now) = tracked
            .as_ref()
            .map(|tracked| {
                (
                    tracked.cancellation_seconds_remaining(now),
                    tracked.can_cancel_now(now),
                )
            })
            .unwrap_or((0, false));

        let snapshot = tracked.as_ref().map(|tracked| tracked.snapshot.as_ref().clone());
        let distance_km = snapshot.as_ref().and_then(|snapshot| {
            snapshot.distance_km.or_else(|| local_distance_km(snapshot))
        });
        let eta = snapshot.as_ref().and_then(|snapshot| {
            resolve_eta(
                snapshot.estimated_time_remaining_minutes,
                snapshot.status,
                snapshot.order_type,
                distance_km,
            )
        });
        // Pickup orders have no delivery leg to charge for.
        let is_delivery = snapshot
            .as_ref()
            .is_some_and(|snapshot| snapshot.order_type == OrderType::Delivery);
        let fee = distance_km.filter(|_| is_delivery).map(|km| {
            quote_fee(
                &self.settings.fee_schedule,
                km,
                OrderKind::Regular,
                order.created_at,
                self.settings.local_offset,
            )
        });

        Some(TrackingView {
            indicator_visible: view.indicator_visible(),
            detail: view.detail,
            fetched_at: tracked.map(|tracked| tracked.fetched_at_utc),
            order,
            snapshot,
            cancellation_seconds_remaining,
            can_cancel_now,
            eta,
            fee,
        })
    }

    pub fn map_view(&self) -> Option<MapView> {
        let selected = self.registry.view().selected?;
        self.map_rx
            .borrow()
            .as_ref()
            .filter(|view| view.order_id == selected)
            .cloned()
    }

    pub fn select_order(&self, order_id: OrderId) -> Result<(), AppError> {
        self.registry.select(order_id)
    }

    pub fn dismiss(&self, order_id: OrderId) -> Result<(), AppError> {
        self.registry.dismiss(order_id)
    }

    pub async fn reopen(&self, order_id: OrderId) -> Result<(), AppError> {
        self.registry.reopen_refreshed(order_id).await
    }

    pub fn set_detail(&self, detail: DetailState) -> Result<(), AppError> {
        self.registry.set_detail(detail)
    }

    /// Refreshes the active set, then the selected order's snapshot if it is
    /// being polled.
    pub async fn refresh(&self) -> Result<Option<TrackingView>, AppError> {
        self.registry.refresh_active_orders().await?;
        if self.poller.tracked_order().is_some() {
            self.poller.poll().await?;
        }
        Ok(self.tracking_view())
    }

    /// Asks the server to cancel. The local countdown is advisory only, so the
    /// request is sent even when it has run out.
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<CancelOutcome, AppError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::BadRequest("a cancellation reason is required".to_string()));
        }
        if !self.registry.view().is_active(order_id) {
            return Err(AppError::NotFound(format!("order {order_id} is not an active order")));
        }

        let outcome = self.backend.cancel_order(order_id, reason).await?;
        info!(order_id, refund = ?outcome.refund_amount, "order cancelled");

        if let Err(err) = self.registry.refresh_active_orders().await {
            warn!(order_id, error = %err, "refresh after cancel failed");
        }
        if self.poller.tracked_order() == Some(order_id) {
            if let Err(err) = self.poller.poll().await {
                warn!(order_id, error = %err, "poll after cancel failed");
            }
        }
        Ok(outcome)
    }

    /// Opens the chat for `order_id`, loading its messages and starting the
    /// poll. Opening an already open chat returns its current messages.
    pub async fn open_chat(&self, order_id: OrderId) -> Result<Vec<ChatMessage>, AppError> {
        if let Some(session) = self.chats.get(&order_id) {
            return Ok(session.channel.messages());
        }
        if !self.registry.view().is_active(order_id) {
            return Err(AppError::NotFound(format!("order {order_id} is not an active order")));
        }

        let channel = Arc::new(ChatChannel::new(
            order_id,
            self.backend.clone(),
            self.metrics.clone(),
        ));
        channel.load_messages().await?;

        let messages = match self.chats.entry(order_id) {
            Entry::Occupied(existing) => existing.get().channel.messages(),
            Entry::Vacant(slot) => {
                let poll = channel.poll_messages(self.settings.chat_poll_interval);
                let messages = channel.messages();
                slot.insert(ChatSession {
                    channel,
                    _poll: poll,
                });
                messages
            }
        };
        Ok(messages)
    }

    pub fn close_chat(&self, order_id: OrderId) -> Result<(), AppError> {
        self.chats
            .remove(&order_id)
            .map(|_| debug!(order_id, "chat closed"))
            .ok_or_else(|| chat_not_open(order_id))
    }

    fn chat(&self, order_id: OrderId) -> Result<Arc<ChatChannel>, AppError> {
        self.chats
            .get(&order_id)
            .map(|session| session.channel.clone())
            .ok_or_else(|| chat_not_open(order_id))
    }

    pub fn messages(&self, order_id: OrderId) -> Result<Vec<ChatMessage>, AppError> {
        Ok(self.chat(order_id)?.messages())
    }

    pub async fn send_message(
        &self,
        order_id: OrderId,
        text: &str,
        message_type: MessageType,
    ) -> Result<ChatMessage, AppError> {
        let channel = self.chat(order_id)?;
        channel.send_message(text, message_type).await
    }

    pub async fn quick_replies(&self, order_id: OrderId) -> Result<Vec<QuickMessage>, AppError> {
        let channel = self.chat(order_id)?;
        channel.quick_replies().await
    }

    pub async fn send_quick_reply(
        &self,
        order_id: OrderId,
        reply_id: u64,
    ) -> Result<ChatMessage, AppError> {
        let channel = self.chat(order_id)?;
        channel.send_quick_reply(reply_id).await
    }

    /// The user's own position. Failing here never affects tracking.
    pub async fn locate_user(&self) -> Result<GeoPoint, AppError> {
        locate_user(self.position_source.as_ref())
            .await
            .map_err(AppError::from)
    }

    /// Quotes candidate couriers for the selected order's delivery leg. Falls
    /// back to the configured kitchen when the snapshot has none.
    pub fn courier_quotes(
        &self,
        candidates: &[CourierCandidate],
        kind: OrderKind,
    ) -> Result<Vec<CourierQuote>, AppError> {
        let view = self
            .tracking_view()
            .ok_or_else(|| AppError::BadRequest("no order selected".to_string()))?;
        let snapshot = view
            .snapshot
            .ok_or_else(|| AppError::Unavailable("tracking snapshot not loaded yet".to_string()))?;
        let destination = snapshot
            .delivery_location
            .as_ref()
            .map(|location| location.point())
            .ok_or_else(|| AppError::BadRequest("order has no delivery location".to_string()))?;
        let kitchen = snapshot
            .chef_location
            .as_ref()
            .map(|location| location.point())
            .unwrap_or(self.settings.map.default_kitchen);

        Ok(compare_couriers(
            &self.settings.fee_schedule,
            kind,
            &kitchen,
            &destination,
            candidates,
        ))
    }

    pub fn shutdown(&self) {
        self.token.cancel();
        self.poller.stop();
        self.chats.clear();
        info!("tracker stopped");
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.token.cancel();
        self.poller.stop();
    }
}

fn chat_not_open(order_id: OrderId) -> AppError {
    AppError::NotFound(format!("chat for order {order_id} is not open"))
}

fn local_distance_km(snapshot: &TrackingSnapshot) -> Option<f64> {
    let kitchen = snapshot.chef_location.as_ref()?.point();
    let destination = snapshot.delivery_location.as_ref()?.point();
    Some(round2(haversine_km(&kitchen, &destination)))
}

/// Points the poller at the selected order while anyone is attached.
async fn follow_selection(
    poller: StatusPoller,
    mut views: watch::Receiver<RegistryView>,
    mut consumers: watch::Receiver<usize>,
    period: Duration,
    token: CancellationToken,
) {
    loop {
        let selected = views.borrow_and_update().selected;
        let attached = *consumers.borrow_and_update() > 0;

        match selected {
            Some(order_id) if attached => poller.track(order_id, period),
            _ if poller.tracked_order().is_some() => poller.stop(),
            _ => {}
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = consumers.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    poller.stop();
    debug!("selection follower stopped");
}

/// Drops chat sessions, and with them their polling, once the order leaves
/// the active set.
async fn close_inactive_chats(
    chats: Arc<DashMap<OrderId, ChatSession>>,
    mut views: watch::Receiver<RegistryView>,
    token: CancellationToken,
) {
    loop {
        let active: HashSet<OrderId> = views
            .borrow_and_update()
            .active_orders
            .iter()
            .map(|order| order.id)
            .collect();
        chats.retain(|order_id, _| {
            let keep = active.contains(order_id);
            if !keep {
                info!(order_id = *order_id, "order no longer active; closing chat");
            }
            keep
        });

        tokio::select! {
            _ = token.cancelled() => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("chat janitor stopped");
}
