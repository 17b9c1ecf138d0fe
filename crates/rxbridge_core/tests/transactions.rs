//! Transaction lifecycle.

mod common;

use rxbridge_core::{DataFormat, ErrorCode, ItemArgs, ItemMode};
use rxbridge_testkit::{assert_no_leaks, codes, item, json_items};
use serde_json::json;

fn upsert() -> ItemArgs {
    ItemArgs::new("items", ItemMode::Upsert).format(DataFormat::Json)
}

#[test]
fn commit_applies_queued_items() {
    let engine = common::engine();
    let db = common::open_items(&engine);

    let mut tx = db.begin_tx("items").unwrap();
    assert_eq!(tx.namespace(), "items");
    assert_eq!(db.open_transactions(), 1);
    assert_eq!(engine.live_transactions(), 1);

    let queued = tx.modify_item(&upsert(), &item(1, "a")).unwrap();
    assert!(queued.result_set().is_none());
    assert!(queued.payload().is_empty());
    tx.modify_item(&upsert(), &item(2, "b")).unwrap();
    assert_eq!(engine.item_count(db.raw(), "items"), Some(0));

    tx.commit().unwrap();
    assert_eq!(db.open_transactions(), 0);
    assert_eq!(engine.item_count(db.raw(), "items"), Some(2));

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn rollback_discards_queued_items() {
    let engine = common::engine();
    let db = common::open_items(&engine);

    let mut tx = db.begin_tx("items").unwrap();
    tx.modify_item(&upsert(), &item(1, "a")).unwrap();
    tx.rollback().unwrap();

    assert_eq!(engine.item_count(db.raw(), "items"), Some(0));
    assert_eq!(db.open_transactions(), 0);
    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn dropping_an_open_transaction_rolls_back() {
    let engine = common::engine();
    let db = common::open_items(&engine);

    {
        let mut tx = db.begin_tx("items").unwrap();
        tx.modify_item(&upsert(), &item(1, "a")).unwrap();
    }

    assert_eq!(engine.live_transactions(), 0);
    assert_eq!(engine.item_count(db.raw(), "items"), Some(0));
    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn transaction_keeps_instance_alive() {
    let engine = common::engine();
    let db = common::open_items(&engine);
    let mut tx = db.begin_tx("items").unwrap();
    drop(db);

    assert_eq!(engine.live_instances(), 1);
    tx.modify_item(&upsert(), &item(1, "a")).unwrap();
    tx.commit().unwrap();
    assert_eq!(engine.live_instances(), 0);
    assert_no_leaks(&engine);
}

#[test]
fn failed_commit_still_releases_the_transaction() {
    let engine = common::engine();
    let db = common::open_items(&engine);
    engine.inject_failure("commit_transaction", codes::CONFLICT, "concurrent schema change");

    let mut tx = db.begin_tx("items").unwrap();
    tx.modify_item(&upsert(), &item(1, "a")).unwrap();
    let err = tx.commit().unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(err.to_string(), "native error (code 7): concurrent schema change");
    assert_eq!(db.open_transactions(), 0);
    assert_eq!(engine.item_count(db.raw(), "items"), Some(0));
    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn queries_inside_a_transaction() {
    let engine = common::engine();
    let db = common::open_items(&engine);
    for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
        db.modify_item(&upsert(), &item(id, name)).unwrap();
    }

    let mut tx = db.begin_tx("items").unwrap();
    tx.delete_query(b"DELETE FROM items WHERE id = 1").unwrap();
    tx.update_query(b"UPDATE items SET name = 'z' WHERE id = 3").unwrap();
    // Nothing visible before commit.
    assert_eq!(engine.item_count(db.raw(), "items"), Some(3));
    tx.commit().unwrap();

    let results = db.select(b"SELECT * FROM items", true, &[]).unwrap();
    let items = json_items(results.payload()).unwrap();
    assert_eq!(items, vec![json!({"id": 2, "name": "b"}), json!({"id": 3, "name": "z"})]);
    drop(results);

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn query_for_another_namespace_is_rejected() {
    let engine = common::engine();
    let db = common::open_items(&engine);
    let mut tx = db.begin_tx("items").unwrap();

    let err = tx.delete_query(b"DELETE FROM other").unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::Params));
    tx.rollback().unwrap();

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn begin_on_missing_namespace() {
    let engine = common::engine();
    let db = common::open(&engine);

    let err = db.begin_tx("missing").unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(db.open_transactions(), 0);

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn bad_item_leaves_transaction_usable() {
    let engine = common::engine();
    let db = common::open_items(&engine);
    let mut tx = db.begin_tx("items").unwrap();

    let err = tx.modify_item(&upsert(), b"{not json").unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ParseJson));

    tx.modify_item(&upsert(), &item(5, "e")).unwrap();
    tx.commit().unwrap();
    assert_eq!(engine.item_count(db.raw(), "items"), Some(1));

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn transaction_arguments_omit_the_namespace() {
    let engine = common::engine();
    let db = common::open_items(&engine);
    let mut tx = db.begin_tx("items").unwrap();

    // Namespace in the arguments is ignored inside a transaction.
    let args = ItemArgs::new("somewhere-else", ItemMode::Insert);
    tx.modify_item(&args, &item(1, "a")).unwrap();
    tx.modify_item_raw(&ItemArgs::new("", ItemMode::Delete).encode_tx(), &item(1, ""))
        .unwrap();
    tx.modify_item(&args, &item(2, "b")).unwrap();
    tx.commit().unwrap();

    let results = db.select(b"SELECT * FROM items", true, &[]).unwrap();
    assert_eq!(json_items(results.payload()).unwrap(), vec![json!({"id": 2, "name": "b"})]);
    drop(results);

    drop(db);
    assert_no_leaks(&engine);
}
