use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::SharedBackend;
use crate::engine::poll_loop::RequestSequencer;
use crate::error::AppError;
use crate::models::order::{Order, OrderId};
use crate::observability::metrics::Metrics;

/// Transient sub-state of an open detail view; reset whenever the selection changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DetailState {
    pub selected_item: Option<usize>,
    pub minimized: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RegistryView {
    pub active_orders: Vec<Order>,
    pub selected: Option<OrderId>,
    pub dismissed: BTreeSet<OrderId>,
    pub detail: DetailState,
}

/// Commands other components send to the registry instead of broadcasting
/// ambient "open tracking" events.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryCommand {
    Refresh,
    Select(OrderId),
    Dismiss(OrderId),
    Reopen(OrderId),
    SetDetail(DetailState),
}

impl RegistryView {
    pub fn selected_order(&self) -> Option<&Order> {
        let selected = self.selected?;
        self.active_orders.iter().find(|order| order.id == selected)
    }

    pub fn is_active(&self, order_id: OrderId) -> bool {
        self.active_orders.iter().any(|order| order.id == order_id)
    }

    /// Whether the compact status indicator for the selected order should show.
    pub fn indicator_visible(&self) -> bool {
        self.selected
            .is_some_and(|selected| !self.dismissed.contains(&selected))
    }

    /// Replaces the active set with the trackable subset of `orders` (kept in
    /// server order) and re-runs the selection policy. Returns `true` when the
    /// selected order changed.
    pub fn apply_orders(&mut self, orders: Vec<Order>) -> bool {
        let previous: Vec<OrderId> = self.active_orders.iter().map(|order| order.id).collect();
        let active: Vec<Order> = orders
            .into_iter()
            .filter(|order| order.status.is_trackable())
            .collect();

        let arrived = active.iter().any(|order| !previous.contains(&order.id));
        if arrived && !previous.is_empty() {
            self.dismissed.clear();
        }
        self.dismissed
            .retain(|id| active.iter().any(|order| order.id == *id));

        let still_active = |id: &OrderId| active.iter().any(|order| order.id == *id);
        let next_selected = match self.selected {
            Some(current) if still_active(&current) => Some(current),
            Some(current) => previous
                .iter()
                .skip_while(|id| **id != current)
                .skip(1)
                .find(|id| still_active(*id))
                .copied()
                .or_else(|| active.first().map(|order| order.id)),
            None => active.first().map(|order| order.id),
        };

        self.active_orders = active;
        self.set_selected(next_selected)
    }

    pub fn select(&mut self, order_id: OrderId) -> Result<bool, AppError> {
        if !self.is_active(order_id) {
            return Err(AppError::NotFound(format!(
                "order {order_id} is not an active order"
            )));
        }
        Ok(self.set_selected(Some(order_id)))
    }

    /// Hides the status indicator for `order_id` without cancelling it.
    pub fn dismiss(&mut self, order_id: OrderId) -> Result<(), AppError> {
        if !self.is_active(order_id) {
            return Err(AppError::NotFound(format!(
                "order {order_id} is not an active order"
            )));
        }
        self.dismissed.insert(order_id);
        Ok(())
    }

    /// Explicit request to show tracking for `order_id` again.
    pub fn reopen(&mut self, order_id: OrderId) -> Result<bool, AppError> {
        let changed = self.select(order_id)?;
        self.dismissed.remove(&order_id);
        Ok(changed)
    }

    fn set_selected(&mut self, next: Option<OrderId>) -> bool {
        if self.selected == next {
            return false;
        }
        self.selected = next;
        self.detail = DetailState::default();
        if let Some(order_id) = next {
            self.dismissed.remove(&order_id);
        }
        true
    }
}

pub struct OrderRegistry {
    backend: SharedBackend,
    view_tx: watch::Sender<RegistryView>,
    sequencer: RequestSequencer,
    metrics: Metrics,
}

impl OrderRegistry {
    pub fn new(backend: SharedBackend, metrics: Metrics) -> Self {
        let (view_tx, _unused_rx) = watch::channel(RegistryView::default());
        Self {
            backend,
            view_tx,
            sequencer: RequestSequencer::default(),
            metrics,
        }
    }

    pub fn view(&self) -> RegistryView {
        self.view_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistryView> {
        self.view_tx.subscribe()
    }

    pub async fn refresh_active_orders(&self) -> Result<RegistryView, AppError> {
        let seq = self.sequencer.next();
        let orders = self.backend.list_orders().await?;

        if !self.sequencer.try_apply(seq) {
            self.metrics
                .stale_responses_total
                .with_label_values(&["registry"])
                .inc();
            debug!(seq, "discarding stale order list");
            return Ok(self.view());
        }

        let mut selection_changed = false;
        self.view_tx.send_modify(|view| {
            selection_changed = view.apply_orders(orders);
        });

        let view = self.view();
        self.metrics.active_orders.set(view.active_orders.len() as i64);
        if selection_changed {
            info!(selected = ?view.selected, active = view.active_orders.len(), "active order selection changed");
        }
        Ok(view)
    }

    pub fn select(&self, order_id: OrderId) -> Result<(), AppError> {
        self.modify(|view| view.select(order_id).map(|_| ()))
    }

    pub fn dismiss(&self, order_id: OrderId) -> Result<(), AppError> {
        self.modify(|view| view.dismiss(order_id))
    }

    pub fn reopen(&self, order_id: OrderId) -> Result<(), AppError> {
        self.modify(|view| view.reopen(order_id).map(|_| ()))
    }

    /// Like [`OrderRegistry::reopen`], but first refreshes when the order is
    /// unknown, since it may have been placed after the last refresh.
    pub async fn reopen_refreshed(&self, order_id: OrderId) -> Result<(), AppError> {
        if !self.view().is_active(order_id) {
            self.refresh_active_orders().await?;
        }
        self.reopen(order_id)
    }

    pub fn set_detail(&self, detail: DetailState) -> Result<(), AppError> {
        self.modify(|view| {
            if view.selected.is_none() {
                return Err(AppError::BadRequest("no order selected".to_string()));
            }
            view.detail = detail;
            Ok(())
        })
    }

    fn modify(
        &self,
        change: impl FnOnce(&mut RegistryView) -> Result<(), AppError>,
    ) -> Result<(), AppError> {
        let mut result = Ok(());
        self.view_tx.send_if_modified(|view| {
            let before = view.clone();
            result = change(view);
            if result.is_err() {
                *view = before;
                return false;
            }
            *view != before
        });
        result
    }

    async fn handle(&self, command: RegistryCommand) -> Result<(), AppError> {
        match command {
            RegistryCommand::Refresh => self.refresh_active_orders().await.map(|_| ()),
            RegistryCommand::Select(order_id) => self.select(order_id),
            RegistryCommand::Dismiss(order_id) => self.dismiss(order_id),
            RegistryCommand::Reopen(order_id) => self.reopen_refreshed(order_id).await,
            RegistryCommand::SetDetail(detail) => self.set_detail(detail),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<RegistryCommand>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    pub async fn send(&self, command: RegistryCommand) -> Result<(), AppError> {
        self.tx
            .send(command)
            .await
            .map_err(|err| AppError::Internal(format!("registry command channel closed: {err}")))
    }

    /// Non-blocking refresh request; a full queue already holds pending work.
    pub fn request_refresh(&self) {
        if let Err(err) = self.tx.try_send(RegistryCommand::Refresh) {
            debug!(error = %err, "registry refresh request dropped");
        }
    }
}

/// Refreshes immediately, then every `refresh_interval`, and serves commands
/// in between. Failures are logged; the loop only ends on cancellation or when
/// every command sender is gone.
pub async fn run_order_registry(
    registry: Arc<OrderRegistry>,
    mut commands: mpsc::Receiver<RegistryCommand>,
    refresh_interval: Duration,
    token: CancellationToken,
) {
    info!(interval_secs = refresh_interval.as_secs(), "order registry started");
    let mut ticker = interval(refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => {
                    debug!(?command, "registry command");
                    registry.handle(command).await
                }
                None => break,
            },
            _ = ticker.tick() => registry.refresh_active_orders().await.map(|_| ()),
        };

        match outcome {
            Ok(()) => {}
            Err(err) if err.is_transient() => {
                registry
                    .metrics
                    .polls_total
                    .with_label_values(&["registry", "error"])
                    .inc();
                warn!(error = %err, "order refresh failed; keeping last active set");
            }
            Err(err) => warn!(error = %err, "registry command failed"),
        }
    }

    warn!("order registry stopped");
}
