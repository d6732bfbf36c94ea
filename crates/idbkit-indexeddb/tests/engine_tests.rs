//! Browser tests for Database over IndexedDbEngine
//!
//! Run with `wasm-pack test --headless --firefox crates/idbkit-indexeddb`.

use idbkit_core::{
    Database, DatabaseSchema, EngineErrorKind, Error, IndexSchema, InitOptions, Key, Query,
    StoreOptions, StoreSchema,
};
use idbkit_indexeddb::IndexedDbEngine;
use serde_json::json;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

/// Open a fresh database with a unique name so tests don't share state
async fn open_fresh(name: &str) -> Database<IndexedDbEngine> {
    let schema = DatabaseSchema::new(name, 1).store(
        StoreSchema::new("test")
            .options(StoreOptions::key_path("name"))
            .index(IndexSchema::new("age"))
            .index(IndexSchema::new("email").unique()),
    );
    let db = Database::new(IndexedDbEngine::new(), schema).without_sink();
    db.delete_db(name).await.unwrap();
    db.initialize(InitOptions::default()).await.unwrap();
    db
}

#[wasm_bindgen_test]
async fn test_pis_scenario() {
    let db = open_fresh("idbkit-test-pis").await;

    db.add("test", json!({ "name": "a", "v": 1 }), None)
        .await
        .unwrap();
    assert_eq!(
        db.get("test", "a").await.unwrap(),
        Some(json!({ "name": "a", "v": 1 }))
    );

    db.put("test", json!({ "name": "a", "v": 2 }), None)
        .await
        .unwrap();
    assert_eq!(
        db.get("test", "a").await.unwrap(),
        Some(json!({ "name": "a", "v": 2 }))
    );

    db.remove("test", "a").await.unwrap();
    assert_eq!(db.get("test", "a").await.unwrap(), None);

    db.delete_db("idbkit-test-pis").await.unwrap();
}

#[wasm_bindgen_test]
async fn test_constraint_error_keeps_dom_name() {
    let db = open_fresh("idbkit-test-constraint").await;
    db.add("test", json!({ "name": "a" }), None).await.unwrap();

    let err = db.add("test", json!({ "name": "a" }), None).await.unwrap_err();
    assert_eq!(
        err.engine_error().unwrap().kind,
        EngineErrorKind::Constraint
    );

    db.delete_db("idbkit-test-constraint").await.unwrap();
}

#[wasm_bindgen_test]
async fn test_lenient_aggregates_on_missing_store() {
    let db = open_fresh("idbkit-test-lenient").await;

    assert_eq!(db.count("missing", None).await.unwrap(), 0);
    assert!(db.get_all("missing", None, None).await.unwrap().is_empty());
    assert!(db.get_all_keys("missing", None, None).await.unwrap().is_empty());

    let err = db.get("missing", "a").await.unwrap_err();
    assert_eq!(err.engine_error().unwrap().kind, EngineErrorKind::NotFound);

    db.delete_db("idbkit-test-lenient").await.unwrap();
}

#[wasm_bindgen_test]
async fn test_index_queries_and_remove_index() {
    let db = open_fresh("idbkit-test-index").await;
    for (name, age) in [("a", 3), ("b", 5), ("c", 3)] {
        db.add("test", json!({ "name": name, "age": age }), None)
            .await
            .unwrap();
    }

    assert_eq!(db.get_index("test", "age", 3).await.unwrap().len(), 2);
    assert_eq!(db.get_index_count("test", "age", 3).await.unwrap(), 2);

    assert_eq!(db.remove_index("test", "age", 3).await.unwrap(), 2);
    assert_eq!(
        db.get_all_keys("test", None, None).await.unwrap(),
        vec![Key::from("b")]
    );

    db.delete_db("idbkit-test-index").await.unwrap();
}

#[wasm_bindgen_test]
async fn test_add_or_put() {
    let db = open_fresh("idbkit-test-add-or-put").await;

    db.add_or_put("test", json!({ "name": "n", "v": 1 }), Some(Query::from("n")), None)
        .await
        .unwrap();
    db.add_or_put("test", json!({ "name": "n", "v": 2 }), Some(Query::from("n")), None)
        .await
        .unwrap();
    assert_eq!(
        db.get("test", "n").await.unwrap(),
        Some(json!({ "name": "n", "v": 2 }))
    );

    db.delete_db("idbkit-test-add-or-put").await.unwrap();
}

#[wasm_bindgen_test]
async fn test_close_and_delete() {
    let db = open_fresh("idbkit-test-close").await;

    db.close().await.unwrap();
    assert_eq!(db.get("test", "a").await.unwrap_err(), Error::Unavailable);

    // Missing databases delete fine
    db.delete_db("idbkit-test-close").await.unwrap();
    db.delete_db("idbkit-test-never-created").await.unwrap();
}

#[wasm_bindgen_test]
async fn test_upgrade_adds_store() {
    let name = "idbkit-test-upgrade";
    let v1 = open_fresh(name).await;
    v1.put("test", json!({ "name": "old" }), None).await.unwrap();
    v1.close().await.unwrap();

    let v2 = Database::new(
        IndexedDbEngine::new(),
        DatabaseSchema::new(name, 2)
            .store(StoreSchema::new("test").options(StoreOptions::key_path("name")))
            .store(StoreSchema::new("extra").options(StoreOptions::default().auto_increment())),
    )
    .without_sink();
    v2.initialize(InitOptions::default()).await.unwrap();

    assert_eq!(
        v2.get("test", "old").await.unwrap(),
        Some(json!({ "name": "old" }))
    );
    let stored = v2.add("extra", json!("free text"), None).await.unwrap();
    assert_eq!(stored.key, Key::from(1));

    v2.delete_db(name).await.unwrap();
}
