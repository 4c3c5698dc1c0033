use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use serde_json::Value;
use tessera::Filters;
use tessera::Error;
use tessera::LockError;
use tokio::sync::mpsc::error::TryRecvError;

use crate::common::apply_message;
use crate::common::memory_settings;
use crate::common::next_message;
use crate::common::payload;
use crate::common::start_node;

#[tokio::test]
async fn test_set_then_get_and_update() {
    let node = start_node(memory_settings(), Filters::new());

    let index = node.set("users/alice", br#"{"age":30}"#.to_vec()).await.unwrap();
    assert_eq!(index, "alice");
    let first = node.get("users/alice").await.unwrap();
    assert_eq!(first.updated, 0);

    node.set("users/alice", br#"{"age":31}"#.to_vec()).await.unwrap();
    let second = node.get("users/alice").await.unwrap();
    assert_eq!(second.created, first.created);
    assert!(second.updated > second.created);
    node.close().await.unwrap();
}

#[tokio::test]
async fn test_list_subscriber_follows_pushes_and_glob_delete() {
    let node = start_node(memory_settings(), Filters::new());
    let mut subscription = node.subscribe("chat/*", None).await.unwrap();
    let mut view = Value::Null;
    apply_message(&mut view, &next_message(&mut subscription).await);
    assert_eq!(view, json!([]));

    for text in ["hi", "there"] {
        node.push("chat/*", json!({"text": text}).to_string().into_bytes())
            .await
            .unwrap();
        apply_message(&mut view, &next_message(&mut subscription).await);
    }
    let texts: Vec<&Value> = view.as_array().unwrap().iter().map(|o| &payload(o)["text"]).collect();
    assert_eq!(texts, vec![&json!("hi"), &json!("there")]);

    node.del("chat/*").await.unwrap();
    apply_message(&mut view, &next_message(&mut subscription).await);
    assert_eq!(view, json!([]));

    // Deleting an empty glob again succeeds and changes nothing.
    node.del("chat/*").await.unwrap();
    node.close().await.unwrap();
}

#[tokio::test]
async fn test_current_version_subscriber_gets_no_snapshot() {
    let node = start_node(memory_settings(), Filters::new());
    node.set("doc", br#"{"v":1}"#.to_vec()).await.unwrap();
    let mut first = node.subscribe("doc", None).await.unwrap();
    next_message(&mut first).await;

    let (_, version) = node.fetch("doc").await.unwrap();
    assert_eq!(version, first.version());
    let mut subscription = node.subscribe("doc", Some(version.as_str())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(matches!(subscription.try_recv(), Err(TryRecvError::Empty)));

    node.set("doc", br#"{"v":2}"#.to_vec()).await.unwrap();
    let message = next_message(&mut subscription).await;
    assert_eq!(
        tessera::broadcast::parse_version(&message.version).unwrap(),
        tessera::broadcast::parse_version(&version).unwrap() + 1
    );
    node.close().await.unwrap();
}

#[tokio::test]
async fn test_sequential_sets_arrive_in_order() {
    let node = start_node(memory_settings(), Filters::new());
    node.set("ticker", br#"{"i":0}"#.to_vec()).await.unwrap();
    let mut subscription = node.subscribe("ticker", None).await.unwrap();
    let mut view = Value::Null;
    apply_message(&mut view, &next_message(&mut subscription).await);

    let mut last_updated = 0;
    for i in 1..=10 {
        node.set("ticker", json!({"i": i}).to_string().into_bytes()).await.unwrap();
        apply_message(&mut view, &next_message(&mut subscription).await);
        let updated = view["updated"].as_u64().unwrap();
        assert!(updated >= last_updated);
        last_updated = updated;
        assert_eq!(payload(&view)["i"], json!(i));
    }
    node.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pushes_are_unique() {
    let node = Arc::new(start_node(memory_settings(), Filters::new()));
    let mut handles = Vec::new();
    for i in 0..100 {
        let node = node.clone();
        handles.push(tokio::spawn(async move {
            node.push("jobs/*", json!({"i": i}).to_string().into_bytes()).await
        }));
    }

    let mut indexes = HashSet::new();
    for handle in handles {
        assert!(indexes.insert(handle.await.unwrap().unwrap()));
    }
    let jobs = node.get_list("jobs/*").await.unwrap();
    assert_eq!(jobs.len(), 100);
    assert!(jobs.windows(2).all(|w| w[0].created <= w[1].created));
    node.close().await.unwrap();
}

#[tokio::test]
async fn test_lock_serializes_read_modify_write() {
    let node = Arc::new(start_node(memory_settings(), Filters::new()));
    node.set("counter", br#"{"n":0}"#.to_vec()).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let node = node.clone();
        handles.push(tokio::spawn(async move {
            let object = node.get_and_lock("counter").await?;
            let value: Value = serde_json::from_slice(&object.data).unwrap();
            let next = value["n"].as_u64().unwrap() + 1;
            node.set_and_unlock("counter", json!({"n": next}).to_string().into_bytes())
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let object = node.get("counter").await.unwrap();
    let value: Value = serde_json::from_slice(&object.data).unwrap();
    assert_eq!(value["n"], json!(10));

    let err = node.unlock("counter").await.unwrap_err();
    assert!(matches!(err, Error::Lock(LockError::LockNotFound(_))));
    node.close().await.unwrap();
}

#[tokio::test]
async fn test_no_broadcast_keys_are_silent() {
    let mut settings = memory_settings();
    settings.storage.no_broadcast_keys = vec!["internal/*".to_string()];
    let node = start_node(settings, Filters::new());

    let mut subscription = node.subscribe("internal/*", None).await.unwrap();
    next_message(&mut subscription).await;
    node.set("internal/cache", b"{}".to_vec()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(subscription.try_recv(), Err(TryRecvError::Empty)));

    node.get("internal/cache").await.unwrap();
    node.close().await.unwrap();
}

#[tokio::test]
async fn test_read_filter_shapes_broadcasts() {
    let mut filters = Filters::new();
    filters.add_read_list("scores/*", |_, objects| {
        Ok(objects
            .into_iter()
            .filter(|o| o.data != b"{\"hidden\":true}".to_vec())
            .collect())
    });
    let node = start_node(memory_settings(), filters);

    let mut subscription = node.subscribe("scores/*", None).await.unwrap();
    let mut view = Value::Null;
    apply_message(&mut view, &next_message(&mut subscription).await);

    node.set("scores/hidden", br#"{"hidden":true}"#.to_vec()).await.unwrap();
    node.set("scores/shown", br#"{"points":3}"#.to_vec()).await.unwrap();
    apply_message(&mut view, &next_message(&mut subscription).await);

    let paths: Vec<&str> = view.as_array().unwrap().iter().map(|o| o["path"].as_str().unwrap()).collect();
    assert_eq!(paths, vec!["scores/shown"]);
    node.close().await.unwrap();
}
