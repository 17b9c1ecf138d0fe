//! Namespace metadata.

mod common;

use rxbridge_core::ErrorCode;
use rxbridge_testkit::{assert_no_leaks, codes};

#[test]
fn put_then_get() {
    let engine = common::engine();
    let db = common::open_items(&engine);

    db.put_meta("items", "schema", "v3");
    assert_eq!(&db.get_meta("items", "schema").unwrap()[..], b"v3");
    assert_eq!(db.get_meta_string("items", "schema").unwrap(), "v3");

    db.put_meta("items", "schema", "v4");
    assert_eq!(db.get_meta_string("items", "schema").unwrap(), "v4");
    assert_eq!(db.open_result_sets(), 0);

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn empty_value() {
    let engine = common::engine();
    let db = common::open_items(&engine);

    db.put_meta("items", "empty", "");
    assert!(db.get_meta("items", "empty").unwrap().is_empty());

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn missing_key_is_not_found() {
    let engine = common::engine();
    let db = common::open_items(&engine);

    let err = db.get_meta("items", "never-set").unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("never-set"));

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn failed_put_is_not_returned() {
    let engine = common::engine();
    let db = common::open(&engine);

    // No such namespace: logged and swallowed.
    db.put_meta("missing", "key", "value");
    assert_eq!(engine.live_error_texts(), 0);

    engine.inject_failure("put_meta", codes::PARAMS, "rejected");
    db.open_namespace("items", Default::default()).unwrap();
    db.put_meta("items", "key", "value");
    let err = db.get_meta("items", "key").unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NotFound));

    drop(db);
    assert_no_leaks(&engine);
}

#[test]
fn dropping_a_namespace_drops_its_meta() {
    let engine = common::engine();
    let db = common::open_items(&engine);
    db.put_meta("items", "key", "value");

    db.drop_namespace("items").unwrap();
    db.open_namespace("items", Default::default()).unwrap();
    assert!(db.get_meta("items", "key").unwrap_err().is_not_found());

    drop(db);
    assert_no_leaks(&engine);
}
