//! Chain gauges, labeled by node identifier.

use prometheus::{register_gauge_vec, register_int_gauge_vec, GaugeVec, IntGaugeVec};
use std::sync::LazyLock;

/// The sequence identifier that is next in line for indexing.
pub static CURSOR_HEIGHT: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "tideline_chain_cursor_height",
        "The sequence identifier that is next in line.",
        &["node"]
    )
    .expect("gauge registration")
});

/// The latest sequence identifier reported by the node.
pub static NODE_HEIGHT: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "tideline_chain_node_height",
        "The latest sequence identifier reported by the node.",
        &["node"]
    )
    .expect("gauge registration")
});

/// Wall-clock moment of the last node height observation, for staleness alarms.
pub static NODE_HEIGHT_OBSERVED: LazyLock<GaugeVec> = LazyLock::new(|| {
    register_gauge_vec!(
        "tideline_chain_node_height_timestamp_seconds",
        "Unix time of the last node height observation.",
        &["node"]
    )
    .expect("gauge registration")
});

/// Record a node height report together with its observation time.
pub fn observe_node_height(node: &str, height: i64) {
    NODE_HEIGHT.with_label_values(&[node]).set(height);
    NODE_HEIGHT_OBSERVED
        .with_label_values(&[node])
        .set(chrono::Utc::now().timestamp() as f64);
}
