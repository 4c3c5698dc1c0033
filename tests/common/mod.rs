use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tessera::Filters;
use tessera::Message;
use tessera::Node;
use tessera::NodeBuilder;
use tessera::Settings;
use tessera::Subscription;
use tokio::time::timeout;

pub const MESSAGE_WAIT_IN_MS: u64 = 2_000;

pub fn memory_settings() -> Settings {
    Settings::default()
}

pub fn durable_settings(db_path: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.storage.durable_path = Some(db_path.to_path_buf());
    settings
}

pub fn start_node(
    settings: Settings,
    filters: Filters,
) -> Node {
    let node = NodeBuilder::new(settings)
        .with_filters(filters)
        .build()
        .expect("build node");
    node.start().expect("start node");
    node
}

pub async fn next_message(subscription: &mut Subscription) -> Message {
    let bytes = timeout(Duration::from_millis(MESSAGE_WAIT_IN_MS), subscription.recv())
        .await
        .expect("message should arrive in time")
        .expect("subscription should stay open");
    Message::decode(&bytes).expect("decode message")
}

/// Applies `message` to the view the subscriber currently holds.
pub fn apply_message(
    view: &mut Value,
    message: &Message,
) {
    if message.snapshot {
        *view = message.data.clone();
    } else {
        let ops = message.ops().expect("patch ops");
        tessera::broadcast::apply(view, &ops).expect("apply patch");
    }
}

pub fn payload(object: &Value) -> &Value {
    &object["data"]
}
