use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub polls_total: IntCounterVec,
    pub poll_latency_seconds: HistogramVec,
    pub status_changes_total: IntCounter,
    pub stale_responses_total: IntCounterVec,
    pub active_orders: IntGauge,
    pub pending_optimistic_actions: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let polls_total = IntCounterVec::new(
            Opts::new("polls_total", "Poll ticks by component and outcome"),
            &["component", "outcome"],
        )
        .expect("valid polls_total metric");

        let poll_latency_seconds = HistogramVec::new(
            HistogramOpts::new("poll_latency_seconds", "Latency of one poll tick in seconds"),
            &["component"],
        )
        .expect("valid poll_latency_seconds metric");

        let status_changes_total =
            IntCounter::new("status_changes_total", "Order status transitions observed")
                .expect("valid status_changes_total metric");

        let stale_responses_total = IntCounterVec::new(
            Opts::new(
                "stale_responses_total",
                "Responses discarded because a newer one was already applied",
            ),
            &["component"],
        )
        .expect("valid stale_responses_total metric");

        let active_orders = IntGauge::new("active_orders", "Non-terminal orders being tracked")
            .expect("valid active_orders metric");

        let pending_optimistic_actions = IntGauge::new(
            "pending_optimistic_actions",
            "Optimistic mutations awaiting server confirmation",
        )
        .expect("valid pending_optimistic_actions metric");

        registry
            .register(Box::new(polls_total.clone()))
            .expect("register polls_total");
        registry
            .register(Box::new(poll_latency_seconds.clone()))
            .expect("register poll_latency_seconds");
        registry
            .register(Box::new(status_changes_total.clone()))
            .expect("register status_changes_total");
        registry
            .register(Box::new(stale_responses_total.clone()))
            .expect("register stale_responses_total");
        registry
            .register(Box::new(active_orders.clone()))
            .expect("register active_orders");
        registry
            .register(Box::new(pending_optimistic_actions.clone()))
            .expect("register pending_optimistic_actions");

        Self {
            registry,
            polls_total,
            poll_latency_seconds,
            status_changes_total,
            stale_responses_total,
            active_orders,
            pending_optimistic_actions,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
