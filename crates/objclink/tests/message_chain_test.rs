//! Integration tests for message lists.

mod common;

use common::sim_client;
use objclink::{Coercion, Error, Handle, Peerable, Value};

// ============================================================================
// Building
// ============================================================================

#[test]
fn test_groups_split_on_null() {
    let (_, client) = sim_client();
    let messages = client
        .build_message_chain(vec![
            "NSString".into(),
            "stringWithUTF8String:".into(),
            "a".into(),
            Value::Null,
            "NSMutableArray".into(),
            "array".into(),
            Value::Null,
            "_".into(),
            "count".into(),
        ])
        .unwrap();

    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].receiver, client.class("NSString").unwrap());
    assert_eq!(messages[0].selector, client.selector("stringWithUTF8String:"));
    assert_eq!(messages[0].args, [Value::from("a")]);
    assert_eq!(messages[1].arg_count(), 0);
    assert!(messages[2].receiver.is_null());
    assert!(messages.iter().all(|m| std::ptr::eq(m.coercion, Coercion::all())));
}

#[test]
fn test_repeated_separators_are_skipped() {
    let (_, client) = sim_client();
    let messages = client
        .build_message_chain(vec![
            Value::Null,
            "NSArray".into(),
            "array".into(),
            Value::Null,
            Value::Null,
            "NSArray".into(),
            "array".into(),
            Value::Null,
        ])
        .unwrap();
    assert_eq!(messages.len(), 2);
}

#[test]
fn test_nil_arguments_are_null_pointers() {
    let (_, client) = sim_client();
    let messages = client
        .build_message_chain(vec![
            "NSMutableArray".into(),
            "addObject:".into(),
            Value::Pointer(Handle::NULL),
            Value::Null,
        ])
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].args, [Value::Pointer(Handle::NULL)]);
}

#[test]
fn test_handles_and_proxies_as_targets() {
    let (_, client) = sim_client();
    let array = unsafe { client.send_proxy("NSArray", "array", &[]) }.unwrap();
    let count = client.selector("count");

    let messages = client
        .build_message_chain(vec![
            Value::from(&array),
            Value::Pointer(count),
            Value::Null,
            Value::Pointer(array.peer()),
            "count".into(),
        ])
        .unwrap();
    assert_eq!(messages[0].receiver, array.peer());
    assert_eq!(messages[0].selector, count);
    assert_eq!(messages[1], messages[0]);
}

#[test]
fn test_bad_groups() {
    let (_, client) = sim_client();

    let err = client
        .build_message_chain(vec![
            "NSArray".into(),
            "array".into(),
            Value::Null,
            "NSArray".into(),
            Value::Null,
        ])
        .unwrap_err();
    assert_eq!(err.to_string(), "Cannot marshal message 1: no selector");

    let err = client
        .build_message_chain(vec!["NSArray".into(), Value::Float(1.0)])
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { expected: "selector", .. }));

    let err = client
        .build_message_chain(vec![Value::Bool(true), "count".into()])
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { expected: "receiver", .. }));
}

// ============================================================================
// Sending
// ============================================================================

#[test]
fn test_send_messages_returns_every_result() {
    let (_, client) = sim_client();
    let messages = client
        .build_message_chain(vec![
            "NSString".into(),
            "stringWithUTF8String:".into(),
            "Test String".into(),
            Value::Null,
            "NSNumber".into(),
            "numberWithInt:".into(),
            Value::Int(5),
            Value::Null,
            "_".into(),
            "count".into(),
        ])
        .unwrap();

    let results = unsafe { client.send_messages(&messages) }.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], Value::from("Test String"));
    let number = results[1].clone().into_proxy().unwrap();
    assert_eq!(unsafe { number.send_int("intValue", &[]) }.unwrap(), 5);
    assert_eq!(results[2], Value::Null);
}

#[test]
fn test_send_messages_stops_at_first_failure() {
    let (rt, client) = sim_client();
    let array = unsafe { client.send_proxy("NSMutableArray", "array", &[]) }.unwrap();
    let messages = client
        .build_message_chain(vec![
            Value::from(&array),
            "addObject:".into(),
            "first".into(),
            Value::Null,
            Value::from(&array),
            "frobnicate".into(),
            Value::Null,
            Value::from(&array),
            "addObject:".into(),
            "never".into(),
        ])
        .unwrap();

    let err = unsafe { client.send_messages(&messages) }.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    assert_eq!(unsafe { array.send_int("count", &[]) }.unwrap(), 1);
    assert!(rt.sends() > 0);
}

#[test]
fn test_each_message_uses_its_own_coercion() {
    let (_, client) = sim_client();
    let raw = client.to_raw();

    let mut messages = raw
        .build_message_chain(vec!["NSArray".into(), "array".into()])
        .unwrap();
    messages.extend(
        client
            .build_message_chain(vec!["NSString".into(), "string".into()])
            .unwrap(),
    );

    let results = unsafe { raw.send_messages(&messages) }.unwrap();
    assert!(matches!(results[0], Value::Pointer(h) if !h.is_null()));
    assert_eq!(results[1], Value::from(""));
}

#[test]
fn test_nil_receiver_message_is_sent() {
    let (rt, client) = sim_client();
    let messages = client
        .build_message_chain(vec!["_".into(), "anything:".into(), Value::Int(1)])
        .unwrap();
    let before = rt.sends();
    let results = unsafe { client.send_messages(&messages) }.unwrap();
    assert_eq!(results, [Value::Null]);
    assert_eq!(rt.sends(), before + 1);
    assert_eq!(messages[0].receiver, Handle::NULL);
}
