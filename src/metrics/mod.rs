
use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::warn;

lazy_static! {
    pub static ref EVENTS_ENQUEUED_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("events_enqueued", "Events accepted by each bus shard"),
        &["shard"]
    )
    .expect("metric can not be created");

    pub static ref BROADCAST_MESSAGES_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("broadcast_messages", "Broadcast messages composed, by kind"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref DROPPED_MESSAGES_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("dropped_messages", "Deliveries dropped for a subscriber, by reason"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

/// Registers the crate collectors on [`REGISTRY`]. Safe to call repeatedly.
pub fn register_custom_metrics() {
    REGISTER.call_once(|| {
        register_into(&REGISTRY);
    });
}

pub(crate) fn register_into(registry: &Registry) {
    let collectors: [Box<dyn prometheus::core::Collector>; 3] = [
        Box::new(EVENTS_ENQUEUED_METRIC.clone()),
        Box::new(BROADCAST_MESSAGES_METRIC.clone()),
        Box::new(DROPPED_MESSAGES_METRIC.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            warn!("collector can not be registered: {:?}", e);
        }
    }
}

/// Renders [`REGISTRY`] in the Prometheus text exposition format.
pub fn metrics_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode custom metrics: {}", e);
    }
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            warn!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
