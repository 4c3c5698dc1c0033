use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;
use tracing_test::traced_test;

use super::*;
use crate::bus::Event;
use crate::bus::EventHandler;
use crate::bus::Operation;
use crate::bus::ShardedBus;
use crate::Clock;
use crate::Error;
use crate::LifecycleState;
use crate::LockError;
use crate::StorageError;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl EventHandler for Recorder {
    fn handle(
        &self,
        event: Event,
    ) {
        self.events.lock().push(event);
    }
}

fn memory_storage() -> LayeredStorage {
    let memory: Arc<dyn StorageTier> = Arc::new(MemoryTier::new());
    let storage = LayeredStorage::new(Some(memory), None, Arc::new(Clock::new()));
    storage.start().unwrap();
    storage
}

fn storage_with_bus(no_broadcast_keys: Vec<String>) -> (LayeredStorage, Arc<ShardedBus>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let bus = Arc::new(ShardedBus::new(1, 16));
    bus.start(recorder.clone()).unwrap();

    let memory: Arc<dyn StorageTier> = Arc::new(MemoryTier::new());
    let storage = LayeredStorage::new(Some(memory), None, Arc::new(Clock::new()))
        .with_bus(bus.clone())
        .with_no_broadcast_keys(no_broadcast_keys);
    storage.start().unwrap();
    (storage, bus, recorder)
}

fn stored(
    path: &str,
    created: u64,
    data: &str,
) -> Object {
    Object {
        created,
        updated: 0,
        index: crate::key::last_index(path).to_string(),
        path: path.to_string(),
        data: data.as_bytes().to_vec(),
    }
}

fn durable_mock() -> MockStorageTier {
    let mut durable = MockStorageTier::new();
    durable.expect_name().return_const("mock");
    durable.expect_start().returning(|| Ok(()));
    durable.expect_close().returning(|| Ok(()));
    durable.expect_active().return_const(true);
    durable
}

#[tokio::test]
async fn test_set_then_get_returns_written_data() {
    let storage = memory_storage();

    let index = storage.set("users/alice", br#"{"age":30}"#.to_vec()).await.unwrap();
    assert_eq!(index, "alice");

    let object = storage.get("users/alice").unwrap();
    assert_eq!(object.data, br#"{"age":30}"#.to_vec());
    assert_eq!(object.path, "users/alice");
    assert!(object.created > 0);
    assert_eq!(object.updated, 0);
}

#[tokio::test]
async fn test_update_preserves_created() {
    let storage = memory_storage();
    storage.set("doc", br#"{"v":1}"#.to_vec()).await.unwrap();
    let first = storage.get("doc").unwrap();

    storage.set("doc", br#"{"v":2}"#.to_vec()).await.unwrap();
    let second = storage.get("doc").unwrap();

    assert_eq!(second.created, first.created);
    assert!(second.updated > second.created);
    assert_eq!(second.data, br#"{"v":2}"#.to_vec());
}

#[tokio::test]
async fn test_set_rejects_bad_input() {
    let storage = memory_storage();

    let err = storage.set("users/*", b"{}".to_vec()).await.unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::GlobNotAllowed(_))));

    let err = storage.set("bad path", b"{}".to_vec()).await.unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::InvalidPath(_))));

    let err = storage.set("doc", Vec::new()).await.unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::InvalidStorageData)));

    let err = storage.set("doc", b"{oops".to_vec()).await.unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::InvalidStorageData)));

    let err = storage.get("missing").unwrap_err();
    assert!(err.is_not_found());
    let err = storage.get("users/*").unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::GlobNotAllowed(_))));
}

#[tokio::test]
async fn test_push_and_list_ordering() {
    let storage = memory_storage();

    let err = storage.push("items", b"{}".to_vec()).await.unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::GlobRequired(_))));

    let mut indexes = Vec::new();
    for i in 0..3 {
        indexes.push(storage.push("items/*", format!(r#"{{"n":{i}}}"#).into_bytes()).await.unwrap());
    }

    let list = storage.get_list("items/*").unwrap();
    assert_eq!(list.len(), 3);
    assert!(list.windows(2).all(|w| w[0].created <= w[1].created));
    let listed: Vec<String> = list.iter().map(|o| o.index.clone()).collect();
    assert_eq!(listed, indexes);
    assert!(list.iter().all(|o| o.updated == 0));

    let newest = storage.get_n("items/*", 2).unwrap();
    assert_eq!(newest.len(), 2);
    assert_eq!(newest[0].index, indexes[2]);
    assert_eq!(newest[1].index, indexes[1]);

    let oldest = storage.get_n_ascending("items/*", 2).unwrap();
    assert_eq!(oldest[0].index, indexes[0]);
    assert_eq!(oldest[1].index, indexes[1]);

    assert_eq!(storage.get_n("items/*", 0).unwrap().len(), 3);
    assert_eq!(storage.get_list_descending("items/*").unwrap()[0].index, indexes[2]);

    let err = storage.get_list("items").unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::InvalidPattern(_))));
}

#[tokio::test]
async fn test_concurrent_push_yields_unique_indexes() {
    let storage = Arc::new(memory_storage());
    let mut handles = Vec::new();
    for i in 0..50 {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            storage.push("log/*", format!(r#"{{"i":{i}}}"#).into_bytes()).await
        }));
    }

    let mut indexes = HashSet::new();
    for handle in handles {
        assert!(indexes.insert(handle.await.unwrap().unwrap()));
    }
    assert_eq!(storage.get_list("log/*").unwrap().len(), 50);
}

#[tokio::test]
async fn test_glob_delete_is_repeatable() {
    let storage = memory_storage();
    storage.push("items/*", b"{}".to_vec()).await.unwrap();
    storage.push("items/*", b"{}".to_vec()).await.unwrap();
    storage.set("items/keep/nested", b"{}".to_vec()).await.unwrap();

    storage.del("items/*").await.unwrap();
    assert!(storage.get_list("items/*").unwrap().is_empty());
    storage.del("items/*").await.unwrap();

    // Deeper keys are not part of the glob.
    storage.get("items/keep/nested").unwrap();

    let err = storage.del("items/missing").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_patch_merges_and_detects_noop() {
    let storage = memory_storage();
    storage.set("cfg", br#"{"a":1,"b":2}"#.to_vec()).await.unwrap();

    storage.patch("cfg", br#"{"b":null,"c":3}"#.to_vec()).await.unwrap();
    let object = storage.get("cfg").unwrap();
    let data: serde_json::Value = serde_json::from_slice(&object.data).unwrap();
    assert_eq!(data, serde_json::json!({"a": 1, "c": 3}));
    assert!(object.updated > object.created);

    let err = storage.patch("cfg", br#"{"a":1}"#.to_vec()).await.unwrap_err();
    assert!(err.is_noop());

    let err = storage.patch("cfg", b"[1]".to_vec()).await.unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::InvalidStorageData)));

    let err = storage.patch("nope", br#"{"a":1}"#.to_vec()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_glob_patch_applies_to_every_match() {
    let storage = memory_storage();
    storage.set("teams/a", br#"{"active":false}"#.to_vec()).await.unwrap();
    storage.set("teams/b", br#"{"active":true}"#.to_vec()).await.unwrap();

    let index = storage.patch("teams/*", br#"{"active":true}"#.to_vec()).await.unwrap();
    assert_eq!(index, "*");
    for object in storage.get_list("teams/*").unwrap() {
        assert_eq!(object.data, br#"{"active":true}"#.to_vec());
    }

    let err = storage.patch("teams/*", br#"{"active":true}"#.to_vec()).await.unwrap_err();
    assert!(err.is_noop());
    let err = storage.patch("empty/*", br#"{"x":1}"#.to_vec()).await.unwrap_err();
    assert!(err.is_noop());
}

#[tokio::test]
async fn test_set_with_meta_keeps_caller_timestamps() {
    let storage = memory_storage();
    storage.set_with_meta("imported", b"{}".to_vec(), 5, 9).await.unwrap();
    let object = storage.get("imported").unwrap();
    assert_eq!((object.created, object.updated), (5, 9));
}

#[tokio::test]
async fn test_range_queries() {
    let storage = memory_storage();
    storage.set_with_meta("r/a", b"{}".to_vec(), 10, 0).await.unwrap();
    storage.set_with_meta("r/b", b"{}".to_vec(), 20, 0).await.unwrap();
    storage.set_with_meta("r/c", b"{}".to_vec(), 30, 0).await.unwrap();

    let ranged = storage.get_n_range("r/*", 10, 15, 30).unwrap();
    let paths: Vec<&str> = ranged.iter().map(|o| o.path.as_str()).collect();
    assert_eq!(paths, vec!["r/c", "r/b"]);
    assert_eq!(storage.get_n_range("r/*", 1, 0, 100).unwrap()[0].path, "r/c");

    assert_eq!(storage.keys_range("r/*", 10, 20).unwrap(), vec!["r/a", "r/b"]);
    assert_eq!(storage.keys().unwrap(), vec!["r/a", "r/b", "r/c"]);

    let err = storage.get_n_range("r/*", 0, 0, 1).unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::InvalidLimit(0))));
    let err = storage.get_n_range("r/*", 1, 5, 1).unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::InvalidRange { from: 5, to: 1 })));
    let err = storage.keys_range("r/a", 0, 1).unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::InvalidPattern(_))));
}

#[tokio::test]
async fn test_lock_blocks_second_locker_until_released() {
    let storage = Arc::new(memory_storage());
    storage.set("counter", br#"{"n":0}"#.to_vec()).await.unwrap();

    storage.get_and_lock("counter").await.unwrap();

    let contender = {
        let storage = storage.clone();
        tokio::spawn(async move {
            let object = storage.get_and_lock("counter").await.unwrap();
            storage.unlock("counter").unwrap();
            object
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!contender.is_finished());

    storage.set_and_unlock("counter", br#"{"n":1}"#.to_vec()).await.unwrap();

    let object = timeout(Duration::from_secs(1), contender).await.unwrap().unwrap();
    assert_eq!(object.data, br#"{"n":1}"#.to_vec());
}

#[tokio::test]
async fn test_lock_misuse() {
    let storage = memory_storage();

    let err = storage.get_and_lock("things/*").await.unwrap_err();
    assert!(matches!(err, Error::Lock(LockError::CantLockGlob(_))));

    let err = storage.unlock("free").unwrap_err();
    assert!(matches!(err, Error::Lock(LockError::LockNotFound(_))));

    let err = storage.set_and_unlock("free", b"{}".to_vec()).await.unwrap_err();
    assert!(matches!(err, Error::Lock(LockError::LockNotFound(_))));

    // A failed read keeps the lock; a failed write still releases it.
    assert!(storage.get_and_lock("absent").await.unwrap_err().is_not_found());
    let err = storage.set_and_unlock("absent", Vec::new()).await.unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::InvalidStorageData)));
    assert!(storage.unlock("absent").is_err());
}

#[tokio::test]
async fn test_start_without_tiers_fails() {
    let storage = LayeredStorage::new(None, None, Arc::new(Clock::new()));
    let err = storage.start().unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::AllLayersNil)));
    assert_eq!(storage.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_close_is_idempotent_and_restartable() {
    let storage = memory_storage();
    assert!(storage.active());

    storage.close().unwrap();
    storage.close().unwrap();
    assert_eq!(storage.state(), LifecycleState::Stopped);
    assert!(!storage.active());

    storage.start().unwrap();
    assert!(storage.active());
}

#[tokio::test]
#[traced_test]
async fn test_read_through_backfills_memory() {
    let memory = Arc::new(MemoryTier::new());
    let mut durable = durable_mock();
    durable.expect_load().returning(|| Ok(HashMap::new()));
    durable
        .expect_get()
        .returning(|key| Ok((key == "cold").then(|| stored("cold", 7, r#"{"warm":false}"#))));

    let memory_tier: Arc<dyn StorageTier> = memory.clone();
    let storage = LayeredStorage::new(Some(memory_tier), Some(Arc::new(durable)), Arc::new(Clock::new()));
    storage.start().unwrap();

    assert!(memory.get("cold").unwrap().is_none());
    assert_eq!(storage.get("cold").unwrap().created, 7);
    assert_eq!(memory.get("cold").unwrap().unwrap().created, 7);
    assert!(storage.get("other").unwrap_err().is_not_found());
    assert!(logs_contain("backfill memory tier"));
}

#[tokio::test]
async fn test_start_warms_memory_from_durable() {
    let memory = Arc::new(MemoryTier::new());
    let mut durable = durable_mock();
    durable.expect_load().times(1).returning(|| {
        let mut entries = HashMap::new();
        entries.insert("a".to_string(), stored("a", 1, "{}"));
        entries.insert("b".to_string(), stored("b", 2, "{}"));
        Ok(entries)
    });

    let memory_tier: Arc<dyn StorageTier> = memory.clone();
    let storage = LayeredStorage::new(Some(memory_tier), Some(Arc::new(durable)), Arc::new(Clock::new()));
    storage.start().unwrap();
    assert_eq!(memory.len(), 2);
}

#[tokio::test]
async fn test_skip_load_leaves_memory_cold() {
    let memory = Arc::new(MemoryTier::new());
    let mut durable = durable_mock();
    durable.expect_load().never();

    let memory_tier: Arc<dyn StorageTier> = memory.clone();
    let storage = LayeredStorage::new(Some(memory_tier), Some(Arc::new(durable)), Arc::new(Clock::new()))
        .with_skip_load(true);
    storage.start().unwrap();
    assert!(memory.is_empty());
}

#[tokio::test]
async fn test_durable_failure_aborts_write() {
    let memory = Arc::new(MemoryTier::new());
    let mut durable = durable_mock();
    durable.expect_load().returning(|| Ok(HashMap::new()));
    durable.expect_get().returning(|_| Ok(None));
    durable
        .expect_set()
        .returning(|_, _| Err(StorageError::DbError("disk full".to_string()).into()));

    let memory_tier: Arc<dyn StorageTier> = memory.clone();
    let storage = LayeredStorage::new(Some(memory_tier), Some(Arc::new(durable)), Arc::new(Clock::new()));
    storage.start().unwrap();

    let err = storage.set("doc", b"{}".to_vec()).await.unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::DbError(_))));
    assert!(memory.get("doc").unwrap().is_none());
}

#[tokio::test]
async fn test_mutations_are_broadcast() {
    let (storage, bus, recorder) = storage_with_bus(vec!["private/*".to_string()]);

    storage.set("doc", br#"{"v":1}"#.to_vec()).await.unwrap();
    storage.set("private/x", b"{}".to_vec()).await.unwrap();
    assert!(storage.patch("doc", br#"{"v":1}"#.to_vec()).await.unwrap_err().is_noop());
    storage.del("doc").await.unwrap();
    storage.push("list/*", b"{}".to_vec()).await.unwrap();
    storage.del_silent("list/*").await.unwrap();
    storage.del("list/*").await.unwrap();
    bus.close().await.unwrap();

    let events = recorder.events.lock();
    let summary: Vec<(&str, Operation)> = events.iter().map(|e| (e.key.as_str(), e.operation)).collect();
    assert_eq!(summary.len(), 4);
    assert_eq!(summary[0], ("doc", Operation::Set));
    assert_eq!(summary[1], ("doc", Operation::Del));
    assert_eq!(summary[3], ("list/*", Operation::Del));
    assert_eq!(summary[2].1, Operation::Set);
    assert!(summary[2].0.starts_with("list/"));

    // Exact delete carries the object as it was, glob delete carries nothing.
    assert_eq!(events[1].object.as_ref().unwrap().data, br#"{"v":1}"#.to_vec());
    assert!(events[3].object.is_none());
}

#[tokio::test]
async fn test_sequential_sets_broadcast_non_decreasing_updated() {
    let (storage, bus, recorder) = storage_with_bus(Vec::new());
    for i in 0..10 {
        storage.set("ticker", format!(r#"{{"i":{i}}}"#).into_bytes()).await.unwrap();
    }
    bus.close().await.unwrap();

    let updated: Vec<u64> = recorder
        .events
        .lock()
        .iter()
        .map(|e| e.object.as_ref().unwrap().updated)
        .collect();
    assert_eq!(updated.len(), 10);
    assert!(updated.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_writes_agree_on_created() {
    let (storage, bus, recorder) = storage_with_bus(Vec::new());
    let storage = Arc::new(storage);

    let writers: Vec<_> = (0..16)
        .map(|i| {
            let storage = storage.clone();
            tokio::spawn(async move {
                storage
                    .set("doc", format!(r#"{{"writer":{i}}}"#).into_bytes())
                    .await
                    .unwrap();
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }
    bus.close().await.unwrap();

    let events = recorder.events.lock();
    assert_eq!(events.len(), 16);
    let created: HashSet<u64> = events.iter().map(|e| e.object.as_ref().unwrap().created).collect();
    assert_eq!(created.len(), 1);
    assert_eq!(storage.get("doc").unwrap().created, *created.iter().next().unwrap());
}
