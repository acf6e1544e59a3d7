use std::sync::Arc;

use crate::config::Config;
use crate::engine::tracker::Tracker;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub tracker: Arc<Tracker>,
    pub metrics: Metrics,
    pub config: Config,
}

impl AppState {
    pub fn new(tracker: Arc<Tracker>, config: Config) -> Self {
        Self {
            metrics: tracker.metrics().clone(),
            tracker,
            config,
        }
    }
}
