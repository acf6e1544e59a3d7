use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::poller::TrackedSnapshot;
use crate::geo::{haversine_km, round2};
use crate::models::location::{GeoPoint, Location};
use crate::models::order::OrderStatus;
use crate::models::tracking::{OrderType, TrackingSnapshot};

const OVERVIEW_ZOOM: u8 = 12;

#[derive(Debug, Clone)]
pub struct MapSettings {
    pub default_kitchen: GeoPoint,
    pub max_single_point_zoom: u8,
    pub maps_api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Kitchen,
    Destination,
    Courier,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Marker {
    pub kind: MarkerKind,
    pub position: GeoPoint,
    pub label: Option<String>,
    pub approximate: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Bounds {
    pub south_west: GeoPoint,
    pub north_east: GeoPoint,
}

impl Bounds {
    fn around(points: &[GeoPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bounds = Bounds {
            south_west: *first,
            north_east: *first,
        };
        for point in &points[1..] {
            bounds.south_west.lat = bounds.south_west.lat.min(point.lat);
            bounds.south_west.lng = bounds.south_west.lng.min(point.lng);
            bounds.north_east.lat = bounds.north_east.lat.max(point.lat);
            bounds.north_east.lng = bounds.north_east.lng.max(point.lng);
        }
        Some(bounds)
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint {
            lat: (self.south_west.lat + self.north_east.lat) / 2.0,
            lng: (self.south_west.lng + self.north_east.lng) / 2.0,
        }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.south_west.lat..=self.north_east.lat).contains(&point.lat)
            && (self.south_west.lng..=self.north_east.lng).contains(&point.lng)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Viewport {
    /// One known point: centre on it with a capped zoom.
    Centered { center: GeoPoint, zoom: u8 },
    /// Several points: the provider fits the view to `bounds`.
    Fit { bounds: Bounds, center: GeoPoint },
}

impl Viewport {
    pub fn center(&self) -> GeoPoint {
        match self {
            Viewport::Centered { center, .. } | Viewport::Fit { center, .. } => *center,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MapProvider {
    Available,
    Unavailable { reason: String },
}

/// Inputs for the map-rendering provider; the engine never renders.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MapView {
    pub order_id: u64,
    pub viewport: Viewport,
    pub markers: Vec<Marker>,
    pub route: Vec<GeoPoint>,
    /// The kitchen pin is a configured stand-in, not the real location.
    pub approximate: bool,
    pub distance_km: Option<f64>,
    pub provider: MapProvider,
}

#[derive(Debug, Clone, PartialEq)]
struct MapInputs {
    order_id: u64,
    kitchen: Option<Location>,
    destination: Option<Location>,
    courier: Option<Location>,
    order_type: OrderType,
    server_distance_km: Option<f64>,
}

impl MapInputs {
    fn from_snapshot(snapshot: &TrackingSnapshot) -> Self {
        let courier_visible = snapshot.status == OrderStatus::OutForDelivery;
        Self {
            order_id: snapshot.order_id,
            kitchen: snapshot.chef_location.clone(),
            destination: snapshot.delivery_location.clone(),
            courier: snapshot
                .agent_location
                .clone()
                .filter(|_| courier_visible),
            order_type: snapshot.order_type,
            server_distance_km: snapshot.distance_km,
        }
    }
}

fn marker(kind: MarkerKind, location: &Location) -> Marker {
    Marker {
        kind,
        position: location.point(),
        label: location.address.clone(),
        approximate: false,
    }
}

pub fn build_map_view(snapshot: &TrackingSnapshot, settings: &MapSettings) -> MapView {
    build_from_inputs(&MapInputs::from_snapshot(snapshot), settings)
}

fn build_from_inputs(inputs: &MapInputs, settings: &MapSettings) -> MapView {
    let approximate = inputs.kitchen.is_none();
    let mut markers = Vec::with_capacity(3);

    match &inputs.kitchen {
        Some(kitchen) => markers.push(marker(MarkerKind::Kitchen, kitchen)),
        None => markers.push(Marker {
            kind: MarkerKind::Kitchen,
            position: settings.default_kitchen,
            label: None,
            approximate: true,
        }),
    }
    if let Some(destination) = &inputs.destination {
        markers.push(marker(MarkerKind::Destination, destination));
    }
    if let Some(courier) = &inputs.courier {
        markers.push(marker(MarkerKind::Courier, courier));
    }

    // Only real readings shape the viewport; a substituted kitchen would pull
    // the view towards a made-up point.
    let known: Vec<GeoPoint> = [&inputs.kitchen, &inputs.destination, &inputs.courier]
        .into_iter()
        .flatten()
        .map(Location::point)
        .collect();

    let viewport = match known.as_slice() {
        [] => Viewport::Centered {
            center: settings.default_kitchen,
            zoom: OVERVIEW_ZOOM.min(settings.max_single_point_zoom),
        },
        [only] => Viewport::Centered {
            center: *only,
            zoom: settings.max_single_point_zoom,
        },
        points => {
            let bounds = Bounds::around(points).unwrap_or(Bounds {
                south_west: points[0],
                north_east: points[0],
            });
            Viewport::Fit {
                bounds,
                center: bounds.center(),
            }
        }
    };

    let mut route = Vec::with_capacity(3);
    if let Some(kitchen) = &inputs.kitchen {
        route.push(kitchen.point());
    }
    if let Some(courier) = &inputs.courier {
        route.push(courier.point());
    }
    if inputs.order_type == OrderType::Delivery {
        if let Some(destination) = &inputs.destination {
            route.push(destination.point());
        }
    }
    if route.len() < 2 {
        route.clear();
    }

    let distance_km = inputs.server_distance_km.or_else(|| {
        match (&inputs.kitchen, &inputs.destination) {
            (Some(kitchen), Some(destination)) => {
                Some(round2(haversine_km(&kitchen.point(), &destination.point())))
            }
            _ => None,
        }
    });

    let provider = match settings.maps_api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => MapProvider::Available,
        _ => MapProvider::Unavailable {
            reason: "maps API key is not configured".to_string(),
        },
    };

    MapView {
        order_id: inputs.order_id,
        viewport,
        markers,
        route,
        approximate,
        distance_km,
        provider,
    }
}

/// Recomputes the map view whenever one of its inputs changes value.
pub struct LocationSynchronizer {
    settings: MapSettings,
    last_inputs: Option<MapInputs>,
    view_tx: watch::Sender<Option<MapView>>,
}

impl LocationSynchronizer {
    pub fn new(settings: MapSettings) -> Self {
        if settings.maps_api_key.is_none() {
            info!("maps API key not configured; map provider marked unavailable");
        }
        let (view_tx, _unused_rx) = watch::channel(None);
        Self {
            settings,
            last_inputs: None,
            view_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<MapView>> {
        self.view_tx.subscribe()
    }

    pub fn current(&self) -> Option<MapView> {
        self.view_tx.borrow().clone()
    }

    /// Returns `true` if the published view changed.
    pub fn observe(&mut self, snapshot: Option<&TrackingSnapshot>) -> bool {
        let Some(snapshot) = snapshot else {
            if self.last_inputs.take().is_some() {
                self.view_tx.send_replace(None);
                return true;
            }
            return false;
        };

        let inputs = MapInputs::from_snapshot(snapshot);
        if self.last_inputs.as_ref() == Some(&inputs) {
            return false;
        }

        let view = build_from_inputs(&inputs, &self.settings);
        debug!(
            order_id = inputs.order_id,
            markers = view.markers.len(),
            route_points = view.route.len(),
            approximate = view.approximate,
            "map view recomputed"
        );
        self.last_inputs = Some(inputs);
        self.view_tx.send_replace(Some(view));
        true
    }
}

pub async fn run_location_sync(
    mut sync: LocationSynchronizer,
    mut snapshots: watch::Receiver<Option<TrackedSnapshot>>,
    token: CancellationToken,
) {
    loop {
        let current = snapshots.borrow_and_update().clone();
        sync.observe(current.as_ref().map(|tracked| tracked.snapshot.as_ref()));

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("location sync stopped");
}
