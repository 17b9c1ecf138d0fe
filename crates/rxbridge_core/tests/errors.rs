//! Error reporting and error-text ownership.

mod common;

use rxbridge_core::{BridgeConfig, Error, ErrorCode, ItemArgs, ItemMode, Reindexer, StorageOptions};
use rxbridge_testkit::{assert_no_leaks, codes, item, select_all};

#[test]
fn unparsable_query() {
    let engine = common::engine();
    let db = common::open_items(&engine);

    let err = db.select(b"SELEKT everything", false, &[]).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ParseSql));
    assert!(err.to_string().contains("SELEKT everything"));

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn engine_message_is_kept_verbatim() {
    let engine = common::engine();
    let db = common::open_items(&engine);
    engine.inject_failure("select_query", 2, "boom");

    let err = db.select(&select_all("items"), false, &[]).unwrap_err();
    match &err {
        Error::Native { code, message } => {
            assert_eq!(*code, ErrorCode::QueryExec);
            assert_eq!(message, "boom");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(db.open_result_sets(), 0);

    // One-shot: the next call goes through.
    db.select(&select_all("items"), false, &[]).unwrap();

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn empty_message_is_filled_in() {
    let engine = common::engine();
    let db = common::open(&engine);
    engine.inject_failure("open_namespace", codes::LOGIC, "");

    let err = db.open_namespace("items", StorageOptions::default()).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::Logic));
    assert_eq!(err.to_string(), "native error (code 4): native call failed with code 4");

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn unknown_codes_are_kept() {
    let engine = common::engine();
    let db = common::open(&engine);
    engine.inject_failure("drop_namespace", 42, "custom");

    let err = db.drop_namespace("items").unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::Other(42)));

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn queued_failures_fire_in_order() {
    let engine = common::engine();
    let db = common::open_items(&engine);
    engine.inject_failure("modify_item_packed", codes::CONFLICT, "first");
    engine.inject_failure("modify_item_packed", codes::PARAMS, "second");
    let args = ItemArgs::new("items", ItemMode::Upsert);

    assert!(db.modify_item(&args, &item(1, "a")).unwrap_err().is_conflict());
    assert_eq!(db.modify_item(&args, &item(1, "a")).unwrap_err().code(), Some(ErrorCode::Params));
    db.modify_item(&args, &item(1, "a")).unwrap();

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn modify_without_primary_key() {
    let engine = common::engine();
    let db = common::open(&engine);
    db.open_namespace("plain", StorageOptions::default()).unwrap();

    let err = db
        .modify_item(&ItemArgs::new("plain", ItemMode::Upsert), &item(1, "a"))
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::Params));

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn operations_need_a_connected_instance() {
    let engine = common::engine();
    let db = Reindexer::init(engine.clone(), BridgeConfig::default()).unwrap();

    let err = db.open_namespace("items", StorageOptions::default()).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NotValid));

    drop(db);
    assert_eq!(engine.live_instances(), 0);
    assert_no_leaks(&engine);
}

#[test]
fn closed_namespace_is_not_found() {
    let engine = common::engine();
    let db = common::open_items(&engine);
    db.close_namespace("items").unwrap();

    let err = db.select(&select_all("items"), false, &[]).unwrap_err();
    assert!(err.is_not_found());

    drop(db);
    assert_no_leaks(&engine);
}
