//! Nested frames reaching the CMP through the locator and message relay

use cmp_api::{
    CmpEngine, CmpStub, EngineSettings, EventStatus, LazyCodec, RemoteCallback, RemoteCmpClient,
    TcData,
};
use frame_messaging::{MessageEvent, Window};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tcf_types::VendorList;

const FIXTURE: &str = include_str!("../../../fixtures/vendor-list-v3.json");

type Replies = mpsc::UnboundedReceiver<(Value, bool)>;

fn engine() -> Arc<CmpEngine> {
    let list: VendorList = serde_json::from_str(FIXTURE).unwrap();
    let settings = EngineSettings {
        cmp_id: 42,
        cmp_version: 3,
        gdpr_applies: Some(true),
        is_service_specific: true,
        publisher_cc: "DE".to_string(),
    };
    CmpEngine::new(settings, Arc::new(list), Arc::new(LazyCodec::default()))
}

fn remote_channel() -> (RemoteCallback, Replies) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: RemoteCallback = Arc::new(move |value: Value, success: bool| {
        let _ = tx.send((value, success));
    });
    (callback, rx)
}

async fn next(rx: &mut Replies) -> (Value, bool) {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("reply timed out")
        .expect("reply channel closed")
}

/// Publisher page with the stub, an ad slot and a creative inside it
fn page() -> (Window, Arc<CmpStub>, Window) {
    let top = Window::top("publisher");
    let stub = CmpStub::install(&top, Some(true)).unwrap();
    let ad = top.create_child("ad-slot").unwrap();
    let creative = ad.create_child("creative").unwrap();
    (top, stub, creative)
}

#[tokio::test]
async fn test_nested_frame_pings_the_stub() {
    let (_top, _stub, creative) = page();
    let client = RemoteCmpClient::connect(&creative).unwrap();
    assert_eq!(client.cmp_window().name(), "publisher");

    let (callback, mut rx) = remote_channel();
    client.call("ping", 2, callback, None).unwrap();

    let (value, success) = next(&mut rx).await;
    assert!(success);
    assert_eq!(value["cmpStatus"], json!("stub"));
    assert_eq!(value["cmpLoaded"], json!(false));
    assert_eq!(value["gdprApplies"], json!(true));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_queued_remote_call_answered_after_hand_off() {
    let (top, stub, creative) = page();
    let client = RemoteCmpClient::connect(&creative).unwrap();

    let (callback, mut rx) = remote_channel();
    client.call("getTCData", 2, callback, None).unwrap();
    top.settle().await.unwrap();
    assert_eq!(stub.queued_len(), 1);

    let engine = engine();
    engine.attach(&top);
    stub.hand_off(&top, engine.clone());
    engine.mark_loaded(None);

    let (value, success) = next(&mut rx).await;
    assert!(success);
    let data: TcData = serde_json::from_value(value).unwrap();
    assert_eq!(data.cmp_id, 42);
    assert_eq!(data.tc_string, "");
}

#[tokio::test]
async fn test_remote_listener_keeps_receiving_events() {
    let (top, stub, creative) = page();
    let engine = engine();
    engine.attach(&top);
    stub.hand_off(&top, engine.clone());

    let client = RemoteCmpClient::connect(&creative).unwrap();
    let (callback, mut rx) = remote_channel();
    let call_id = client.call("addEventListener", 2, callback, None).unwrap();

    let (loaded, _) = next(&mut rx).await;
    let loaded: TcData = serde_json::from_value(loaded).unwrap();
    assert_eq!(loaded.event_status, Some(EventStatus::TcLoaded));
    let listener_id = loaded.listener_id.unwrap();

    engine
        .set_display_status(cmp_api::DisplayStatus::Visible)
        .await;
    let (shown, _) = next(&mut rx).await;
    let shown: TcData = serde_json::from_value(shown).unwrap();
    assert_eq!(shown.event_status, Some(EventStatus::CmpUiShown));
    assert_eq!(shown.listener_id, Some(listener_id));
    assert_eq!(client.pending_count(), 1);

    // Removal is its own one-shot call
    let (callback, mut removal) = remote_channel();
    client
        .call("removeEventListener", 2, callback, Some(json!(listener_id)))
        .unwrap();
    assert_eq!(next(&mut removal).await, (json!(true), true));
    assert!(client.forget(&call_id));
    assert_eq!(engine.listener_count(), 0);
}

#[tokio::test]
async fn test_text_encoded_call_gets_text_reply() {
    let (top, _stub, creative) = page();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    creative.add_message_listener(Arc::new(move |event: &MessageEvent| {
        let _ = tx.send(event.data.clone());
    }));

    let call = json!({
        "__tcfapiCall": { "command": "ping", "version": 2, "callId": 7 }
    });
    top.post_message(Value::String(call.to_string()), &creative)
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let text = reply.as_str().expect("reply should be JSON text");
    let parsed: Value = serde_json::from_str(text).unwrap();
    assert_eq!(parsed["__tcfapiReturn"]["callId"], json!(7));
    assert_eq!(parsed["__tcfapiReturn"]["success"], json!(true));
    assert_eq!(parsed["__tcfapiReturn"]["returnValue"]["cmpStatus"], json!("stub"));
}

#[tokio::test]
async fn test_relay_reports_failure_once_function_is_gone() {
    let (top, stub, creative) = page();
    stub.abandon(&top);

    let client = RemoteCmpClient::connect(&creative).unwrap();
    let (callback, mut rx) = remote_channel();
    client.call("getTCData", 2, callback, None).unwrap();

    assert_eq!(next(&mut rx).await, (Value::Null, false));
}

#[tokio::test]
async fn test_unrelated_messages_are_ignored() {
    let (top, stub, creative) = page();
    top.post_message(json!({ "hello": "world" }), &creative).unwrap();
    top.post_message(json!("not json"), &creative).unwrap();
    top.settle().await.unwrap();
    assert_eq!(stub.queued_len(), 0);
}
