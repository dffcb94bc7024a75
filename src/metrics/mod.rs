//! Prometheus metrics for the dissemination engine.

use lazy_static::lazy_static;
use prometheus::IntGauge;
use prometheus::Registry;

use crate::constants::METRICS_NAMESPACE;

lazy_static! {
    /// Committed update batches still awaiting acknowledgement by at least
    /// one subscriber.
    pub static ref CHANGELOG_LEN_GAUGE: IntGauge = IntGauge::new(
        "update_backlog_len",
        "Committed update batches awaiting acknowledgement"
    )
    .expect("metric can not be created");

    /// Largest update backlog observed since process start. A high value
    /// points at a subscriber that stopped acknowledging updates.
    pub static ref CHANGELOG_HIGH_WATER_GAUGE: IntGauge = IntGauge::new(
        "update_backlog_high_water",
        "Largest update backlog observed"
    )
    .expect("metric can not be created");

    /// Update RPCs currently in flight; bounded by `concurrent_rpcs`.
    pub static ref INFLIGHT_RPC_GAUGE: IntGauge = IntGauge::new(
        "update_rpcs_in_flight",
        "Update RPCs currently in flight"
    )
    .expect("metric can not be created");

    pub static ref CUSTOM_REGISTRY: Registry =
        Registry::new_custom(Some(METRICS_NAMESPACE.to_string()), None)
            .expect("registry can not be created");
}

pub fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(CHANGELOG_LEN_GAUGE.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(CHANGELOG_HIGH_WATER_GAUGE.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(INFLIGHT_RPC_GAUGE.clone()))
        .expect("collector can be registered");
}
