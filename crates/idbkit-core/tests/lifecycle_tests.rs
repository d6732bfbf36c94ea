//! Open, upgrade, recovery, close and delete tests for Database over MemoryEngine

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use idbkit_core::{
    Database, DatabaseSchema, DiagnosticSink, EngineError, EngineErrorKind, EngineResult, Error,
    IndexSchema, InitOptions, Level, MemoryEngine, MemoryHandle, Recovery, Request, Response,
    State, StorageEngine, StoreOptions, StoreSchema, TransactionMode, UpgradeFn,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn pis_schema(version: u32) -> DatabaseSchema {
    DatabaseSchema::new("pis", version).store(
        StoreSchema::new("test")
            .options(StoreOptions::key_path("name"))
            .index(IndexSchema::new("age")),
    )
}

/// Sink that records every message it receives
#[derive(Default)]
struct Recorder(RefCell<Vec<(Level, String)>>);

impl Recorder {
    fn levels(&self) -> Vec<Level> {
        self.0.borrow().iter().map(|(level, _)| *level).collect()
    }
}

impl DiagnosticSink for Recorder {
    fn emit(&self, label: &str, level: Level, message: &str) {
        assert_eq!(label, "DB");
        self.0.borrow_mut().push((level, message.to_string()));
    }
}

#[tokio::test]
async fn test_operations_before_initialize_are_unavailable() {
    let db = Database::new(MemoryEngine::new(), pis_schema(1)).without_sink();
    assert_eq!(db.state(), State::Uninitialized);

    assert_eq!(db.get("test", "a").await.unwrap_err(), Error::Unavailable);
    assert_eq!(
        db.add("test", json!({ "name": "a" }), None).await.unwrap_err(),
        Error::Unavailable
    );
    assert_eq!(db.count("test", None).await.unwrap_err(), Error::Unavailable);
    assert_eq!(
        db.remove_index("test", "age", 1).await.unwrap_err(),
        Error::Unavailable
    );
    assert_eq!(db.close().await.unwrap_err(), Error::Unavailable);

    // Nothing was opened on the engine's side either
    assert!(db.engine().database_names().is_empty());
}

#[tokio::test]
async fn test_initialize_twice_is_idempotent() {
    let engine = MemoryEngine::new();
    let db = Database::new(engine.clone(), pis_schema(1)).without_sink();
    db.initialize(InitOptions::default()).await.unwrap();
    db.put("test", json!({ "name": "keep" }), None).await.unwrap();

    db.initialize(InitOptions::default()).await.unwrap();
    assert!(db.is_open());
    assert_eq!(engine.store_names("pis"), vec!["test"]);
    assert_eq!(engine.connection_count("pis"), 1);
    assert_eq!(
        db.get("test", "keep").await.unwrap(),
        Some(json!({ "name": "keep" }))
    );
}

#[tokio::test]
async fn test_version_bump_adds_new_stores_only() {
    let engine = MemoryEngine::new();
    let v1 = Database::new(engine.clone(), pis_schema(1)).without_sink();
    v1.initialize(InitOptions::default()).await.unwrap();
    v1.put("test", json!({ "name": "old" }), None).await.unwrap();
    v1.close().await.unwrap();

    let v2 = Database::new(
        engine.clone(),
        pis_schema(2).store(StoreSchema::new("extra").index(IndexSchema::new("kind"))),
    )
    .without_sink();
    v2.initialize(InitOptions::default()).await.unwrap();

    assert_eq!(engine.version("pis"), Some(2));
    assert_eq!(engine.store_names("pis"), vec!["extra", "test"]);
    assert_eq!(engine.index_names("pis", "extra"), vec!["kind"]);
    assert_eq!(
        v2.get("test", "old").await.unwrap(),
        Some(json!({ "name": "old" }))
    );
}

#[tokio::test]
async fn test_lower_version_fails_to_open() {
    let engine = MemoryEngine::new();
    let v2 = Database::new(engine.clone(), pis_schema(2)).without_sink();
    v2.initialize(InitOptions::default()).await.unwrap();
    v2.close().await.unwrap();

    let v1 = Database::new(engine.clone(), pis_schema(1)).without_sink();
    let err = v1.initialize(InitOptions::default()).await.unwrap_err();
    assert_eq!(err.engine_error().unwrap().kind, EngineErrorKind::Version);
    assert!(!v1.is_open());
    // Recovery is off by default, so the data survives
    assert_eq!(engine.version("pis"), Some(2));
}

#[tokio::test]
async fn test_failed_upgrade_leaves_nothing_behind() {
    let engine = MemoryEngine::new();
    // A key generator cannot feed a compound key path
    let schema = DatabaseSchema::new("broken", 1).store(
        StoreSchema::new("ok").options(StoreOptions::key_path(vec!["a", "b"]).auto_increment()),
    );
    let db = Database::new(engine.clone(), schema).without_sink();

    assert!(db.initialize(InitOptions::default()).await.is_err());
    assert_eq!(engine.version("broken"), None);
    assert_eq!(db.state(), State::Uninitialized);
}

#[tokio::test]
async fn test_invalid_schema_is_rejected() {
    let schema = DatabaseSchema::new("dup", 1)
        .store(StoreSchema::new("a"))
        .store(StoreSchema::new("a"));
    let db = Database::new(MemoryEngine::new(), schema).without_sink();

    let err = db.initialize(InitOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidSchema(_)));
}

#[tokio::test]
async fn test_open_failure_without_recovery() {
    let engine = MemoryEngine::new();
    engine.fail_next_open(EngineError::unknown("disk on fire"));
    let db = Database::new(engine.clone(), pis_schema(1)).without_sink();

    let err = db.initialize(InitOptions::default()).await.unwrap_err();
    assert_eq!(err.engine_error().unwrap().kind, EngineErrorKind::Unknown);
    assert_eq!(db.state(), State::Uninitialized);
}

#[tokio::test]
async fn test_recovery_deletes_and_reopens() {
    let engine = MemoryEngine::new();
    let setup = Database::new(engine.clone(), pis_schema(1)).without_sink();
    setup.initialize(InitOptions::default()).await.unwrap();
    setup.put("test", json!({ "name": "stale" }), None).await.unwrap();
    setup.close().await.unwrap();

    engine.fail_next_open(EngineError::unknown("corrupt"));
    let db = Database::new(engine.clone(), pis_schema(1)).without_sink();
    let options = InitOptions::default().with_recovery(Recovery::DeleteAndReopen);

    // The caller gets the open error before anything is deleted
    let err = db.initialize(options).await.unwrap_err();
    assert_eq!(err.engine_error().unwrap().message, "corrupt");
    assert!(!db.is_open());
    assert!(db.recovery_pending());

    // The pending pass recreates the database from scratch
    db.recover().await.unwrap();
    assert!(!db.recovery_pending());
    assert!(db.is_open());
    assert_eq!(db.get("test", "stale").await.unwrap(), None);
    assert_eq!(engine.store_names("pis"), vec!["test"]);
}

#[tokio::test]
async fn test_recovery_runs_once() {
    let engine = MemoryEngine::new();
    engine.fail_next_open(EngineError::unknown("first"));
    engine.fail_next_open(EngineError::unknown("second"));
    let db = Database::new(engine.clone(), pis_schema(1)).without_sink();
    let options = InitOptions::default().with_recovery(Recovery::DeleteAndReopen);

    let err = db.initialize(options).await.unwrap_err();
    assert_eq!(err.engine_error().unwrap().message, "first");

    // The reopen fails once and is not retried
    let err = db.recover().await.unwrap_err();
    assert_eq!(err.engine_error().unwrap().message, "second");
    assert!(!db.recovery_pending());
    db.recover().await.unwrap();
    assert!(!db.is_open());

    // The queue is drained, so a later attempt goes through
    db.initialize(options).await.unwrap();
    assert!(db.is_open());
}

#[tokio::test]
async fn test_recovery_not_pending_without_opt_in() {
    let engine = MemoryEngine::new();
    engine.fail_next_open(EngineError::unknown("corrupt"));
    let db = Database::new(engine.clone(), pis_schema(1)).without_sink();

    db.initialize(InitOptions::default()).await.unwrap_err();
    assert!(!db.recovery_pending());
    db.recover().await.unwrap();
    assert!(!db.is_open());
}

/// MemoryEngine whose deletes never settle, like a delete blocked by another tab
#[derive(Clone, Default)]
struct BlockedDelete(MemoryEngine);

impl StorageEngine for BlockedDelete {
    type Handle = MemoryHandle;

    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: UpgradeFn,
    ) -> EngineResult<MemoryHandle> {
        self.0.open(name, version, upgrade).await
    }

    async fn execute(
        &self,
        handle: &MemoryHandle,
        store: &str,
        mode: TransactionMode,
        request: Request,
    ) -> EngineResult<Response> {
        self.0.execute(handle, store, mode, request).await
    }

    async fn close(&self, handle: &MemoryHandle) -> EngineResult<()> {
        self.0.close(handle).await
    }

    async fn delete_database(&self, _name: &str) -> EngineResult<()> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_failed_open_settles_while_delete_is_blocked() {
    let engine = BlockedDelete::default();
    engine.0.fail_next_open(EngineError::unknown("boom"));
    let db = Database::new(engine, pis_schema(1)).without_sink();
    let options = InitOptions::default().with_recovery(Recovery::DeleteAndReopen);

    let settled = tokio::time::timeout(Duration::from_millis(500), db.initialize(options)).await;
    let err = settled.expect("initialize must settle").unwrap_err();
    assert_eq!(err.engine_error().unwrap().message, "boom");

    // Only the recovery itself waits on the delete
    let recovery = tokio::time::timeout(Duration::from_millis(50), db.recover()).await;
    assert!(recovery.is_err());
}

#[tokio::test]
async fn test_close_invalidates_handle() {
    let engine = MemoryEngine::new();
    let db = Database::new(engine.clone(), pis_schema(1)).without_sink();
    let handle = db.initialize(InitOptions::default()).await.unwrap();
    assert_eq!(handle.name(), "pis");

    db.close().await.unwrap();
    assert_eq!(db.state(), State::Closed);
    assert_eq!(engine.connection_count("pis"), 0);
    assert_eq!(db.get("test", "a").await.unwrap_err(), Error::Unavailable);
    assert_eq!(db.count("test", None).await.unwrap_err(), Error::Unavailable);
    assert_eq!(db.close().await.unwrap_err(), Error::Unavailable);

    // Initializing again reopens
    db.initialize(InitOptions::default()).await.unwrap();
    assert!(db.is_open());
}

#[tokio::test]
async fn test_delete_missing_database_succeeds() {
    let db = Database::new(MemoryEngine::new(), pis_schema(1)).without_sink();
    db.delete_db("pis").await.unwrap();
    db.delete_db("never-created").await.unwrap();
}

#[tokio::test]
async fn test_delete_own_database_closes_handle() {
    let engine = MemoryEngine::new();
    let db = Database::new(engine.clone(), pis_schema(1)).without_sink();
    db.initialize(InitOptions::default()).await.unwrap();
    db.put("test", json!({ "name": "x" }), None).await.unwrap();

    db.delete_db("pis").await.unwrap();
    assert_eq!(db.state(), State::Closed);
    assert!(engine.database_names().is_empty());
    assert_eq!(db.get("test", "x").await.unwrap_err(), Error::Unavailable);
}

#[tokio::test]
async fn test_delete_other_database_keeps_handle() {
    let engine = MemoryEngine::new();
    let other = Database::new(engine.clone(), DatabaseSchema::new("other", 1)).without_sink();
    other.initialize(InitOptions::default()).await.unwrap();
    other.close().await.unwrap();

    let db = Database::new(engine.clone(), pis_schema(1)).without_sink();
    db.initialize(InitOptions::default()).await.unwrap();
    db.delete_db("other").await.unwrap();

    assert!(db.is_open());
    assert_eq!(engine.database_names(), vec!["pis"]);
}

#[tokio::test]
async fn test_diagnostics_follow_debug_flag() {
    let recorder = Rc::new(Recorder::default());
    let db = Database::new(MemoryEngine::new(), pis_schema(1)).with_shared_sink(recorder.clone());

    db.initialize(InitOptions::default()).await.unwrap();
    db.put("test", json!({ "name": "quiet" }), None).await.unwrap();
    assert!(recorder.0.borrow().is_empty());

    db.initialize(InitOptions::debug()).await.unwrap();
    assert!(db.debug());
    db.put("test", json!({ "name": "a" }), None).await.unwrap();
    db.get("test", "missing").await.unwrap();
    db.count("nope", None).await.unwrap();
    db.close().await.unwrap();

    assert_eq!(
        recorder.levels(),
        vec![
            Level::Success, // opened
            Level::Success, // updated
            Level::Warning, // no record
            Level::Danger,  // count failed
            Level::Danger,  // closed
        ]
    );
    let messages = recorder.0.borrow();
    assert!(messages[1].1.contains("test_a"));
    assert!(messages[2].1.contains("no record"));
}

#[tokio::test]
async fn test_upgrade_emits_primary_diagnostic() {
    let recorder = Rc::new(Recorder::default());
    let db = Database::new(MemoryEngine::new(), pis_schema(3)).with_shared_sink(recorder.clone());

    db.initialize(InitOptions::debug()).await.unwrap();
    let messages = recorder.0.borrow();
    assert_eq!(messages[0].0, Level::Primary);
    assert!(messages[0].1.contains("from version 0 to 3"));
    assert_eq!(messages[1].0, Level::Success);
}

#[tokio::test]
async fn test_failed_index_count_logs_once() {
    let recorder = Rc::new(Recorder::default());
    let db = Database::new(MemoryEngine::new(), pis_schema(1)).with_shared_sink(recorder.clone());
    db.initialize(InitOptions::debug()).await.unwrap();
    db.put("test", json!({ "name": "a", "age": 1 }), None).await.unwrap();
    recorder.0.borrow_mut().clear();

    assert_eq!(db.get_index_count("test", "missing", 1).await.unwrap(), 0);
    assert_eq!(recorder.levels(), vec![Level::Danger]);
    assert!(recorder.0.borrow()[0].1.contains("test_missing_1: count failed"));

    recorder.0.borrow_mut().clear();
    assert_eq!(db.get_index_count("test", "age", 1).await.unwrap(), 1);
    assert_eq!(recorder.levels(), vec![Level::Success]);
}
