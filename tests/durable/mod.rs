use serde_json::json;
use tempfile::tempdir;
use tessera::Filters;

use crate::common::durable_settings;
use crate::common::start_node;

#[tokio::test]
async fn test_data_survives_restart_with_sled_tier() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");

    let node = start_node(durable_settings(&db_path), Filters::new());
    node.set("users/alice", br#"{"age":30}"#.to_vec()).await.unwrap();
    let pushed = node.push("events/*", br#"{"kind":"login"}"#.to_vec()).await.unwrap();
    let before = node.get("users/alice").await.unwrap();
    node.close().await.unwrap();

    node.start().unwrap();
    let after = node.get("users/alice").await.unwrap();
    assert_eq!(after, before);
    let events = node.get_list("events/*").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].index, pushed);
    node.close().await.unwrap();
}

#[tokio::test]
async fn test_new_node_reads_existing_database() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");

    {
        let node = start_node(durable_settings(&db_path), Filters::new());
        node.set("config", br#"{"theme":"dark"}"#.to_vec()).await.unwrap();
        node.close().await.unwrap();
    }

    let mut settings = durable_settings(&db_path);
    settings.storage.skip_load = true;
    let node = start_node(settings, Filters::new());
    // Cold memory tier: the read goes through to sled.
    let object = node.get("config").await.unwrap();
    let data: serde_json::Value = serde_json::from_slice(&object.data).unwrap();
    assert_eq!(data, json!({"theme": "dark"}));
    assert_eq!(node.storage().keys().unwrap(), vec!["config".to_string()]);
    node.close().await.unwrap();
}

#[tokio::test]
async fn test_durable_only_node() {
    let dir = tempdir().unwrap();
    let mut settings = durable_settings(&dir.path().join("db"));
    settings.storage.memory_enabled = false;

    let node = start_node(settings, Filters::new());
    node.set("a", b"{}".to_vec()).await.unwrap();
    node.del("a").await.unwrap();
    assert!(node.get("a").await.unwrap_err().is_not_found());
    node.close().await.unwrap();
}
