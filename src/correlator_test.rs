use super::*;
use crate::connection::ConnectionState;
use crate::memory_sink::{drain, memory_sink, parse};
use serde_json::json;
use std::collections::HashSet;

const TIMEOUT: Duration = Duration::from_secs(30);

fn issue(
    correlator: &mut Correlator,
    link: &dyn FrameSink,
    kind: RequestKind,
    method: &str,
    params: Option<Value>,
) -> (Option<String>, oneshot::Receiver<Result<Value, RpcError>>) {
    let (tx, rx) = oneshot::channel();
    let id = correlator.issue(link, kind, method.to_owned(), params, tx);
    (id, rx)
}

#[tokio::test]
async fn issue_sends_query_envelope() {
    let (sink, mut frames) = memory_sink(ConnectionState::Open);
    let (mut correlator, _expired) = Correlator::new(TIMEOUT);

    let (id, _rx) = issue(&mut correlator, sink.as_ref(), RequestKind::Query, "get_profiles", None);
    let id = id.expect("issued");

    let sent = drain(&mut frames);
    assert_eq!(sent, vec![json!({"type": "query", "id": id, "method": "get_profiles"})]);
    assert!(correlator.is_pending(&id));
}

#[tokio::test]
async fn issue_sends_command_with_params() {
    let (sink, mut frames) = memory_sink(ConnectionState::Open);
    let (mut correlator, _expired) = Correlator::new(TIMEOUT);

    let params = json!({"name": "X"});
    let (id, _rx) = issue(&mut correlator, sink.as_ref(), RequestKind::Command, "activate_profile", Some(params.clone()));

    let frame = parse(&frames.try_recv().expect("frame"));
    assert_eq!(frame["type"], "command");
    assert_eq!(frame["id"], id.expect("issued"));
    assert_eq!(frame["params"], params);
}

#[tokio::test]
async fn not_open_fails_immediately_without_pending() {
    let (sink, mut frames) = memory_sink(ConnectionState::Connecting);
    let (mut correlator, _expired) = Correlator::new(TIMEOUT);

    let (id, rx) = issue(&mut correlator, sink.as_ref(), RequestKind::Query, "get_config", None);

    assert!(id.is_none());
    assert_eq!(rx.await.expect("reply"), Err(RpcError::NotConnected(ConnectionState::Connecting)));
    assert!(correlator.is_empty());
    assert!(frames.try_recv().is_err());
}

#[tokio::test]
async fn failed_send_removes_pending() {
    let (sink, _frames) = memory_sink(ConnectionState::Open);
    sink.fail_next_send();
    let (mut correlator, _expired) = Correlator::new(TIMEOUT);

    let (id, rx) = issue(&mut correlator, sink.as_ref(), RequestKind::Command, "clear_events", None);

    assert!(id.is_none());
    assert_eq!(rx.await.expect("reply"), Err(RpcError::NotConnected(ConnectionState::Closed)));
    assert_eq!(correlator.len(), 0);
}

#[tokio::test]
async fn ids_are_unique() {
    let (sink, _frames) = memory_sink(ConnectionState::Open);
    let (mut correlator, _expired) = Correlator::new(TIMEOUT);

    let mut ids = HashSet::new();
    let mut receivers = Vec::new();
    for _ in 0..100 {
        let (id, rx) = issue(&mut correlator, sink.as_ref(), RequestKind::Query, "get_layers", None);
        ids.insert(id.expect("issued"));
        receivers.push(rx);
    }
    assert_eq!(ids.len(), 100);
    assert_eq!(correlator.len(), 100);
}

#[tokio::test]
async fn responses_settle_by_id_not_arrival_order() {
    let (sink, _frames) = memory_sink(ConnectionState::Open);
    let (mut correlator, _expired) = Correlator::new(TIMEOUT);

    let (a, rx_a) = issue(&mut correlator, sink.as_ref(), RequestKind::Query, "get_profiles", None);
    let (b, rx_b) = issue(&mut correlator, sink.as_ref(), RequestKind::Query, "get_devices", None);

    assert!(correlator.settle(&b.expect("b"), Some(json!("devices")), None));
    assert!(correlator.settle(&a.expect("a"), Some(json!("profiles")), None));

    assert_eq!(rx_a.await.expect("a reply"), Ok(json!("profiles")));
    assert_eq!(rx_b.await.expect("b reply"), Ok(json!("devices")));
}

#[tokio::test]
async fn error_body_rejects_with_remote_error() {
    let (sink, _frames) = memory_sink(ConnectionState::Open);
    let (mut correlator, _expired) = Correlator::new(TIMEOUT);

    let (id, rx) = issue(&mut correlator, sink.as_ref(), RequestKind::Command, "delete_profile", None);
    let error = RemoteError::new(envelopes::INVALID_PARAMS, "profile not found");
    correlator.settle(&id.expect("issued"), Some(json!("ignored")), Some(error));

    let err = rx.await.expect("reply").expect_err("rejected");
    assert_eq!(err, RpcError::Remote { code: -32602, message: "profile not found".to_owned(), data: None });
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn missing_result_resolves_null() {
    let (sink, _frames) = memory_sink(ConnectionState::Open);
    let (mut correlator, _expired) = Correlator::new(TIMEOUT);

    let (id, rx) = issue(&mut correlator, sink.as_ref(), RequestKind::Command, "reset_simulator", None);
    correlator.settle(&id.expect("issued"), None, None);

    assert_eq!(rx.await.expect("reply"), Ok(Value::Null));
}

#[tokio::test]
async fn unknown_id_is_dropped() {
    let (mut correlator, _expired) = Correlator::new(TIMEOUT);
    assert!(!correlator.settle("no-such-id", Some(json!(1)), None));
}

#[tokio::test(start_paused = true)]
async fn timeout_rejects_and_clears_entry() {
    let (sink, _frames) = memory_sink(ConnectionState::Open);
    let (mut correlator, mut expired) = Correlator::new(TIMEOUT);
    let started = tokio::time::Instant::now();

    let (id, rx) = issue(
        &mut correlator,
        sink.as_ref(),
        RequestKind::Command,
        "activate_profile",
        Some(json!({"name": "X"})),
    );
    let id = id.expect("issued");

    let fired = expired.recv().await.expect("timer fired");
    assert_eq!(fired, id);
    assert!(started.elapsed() >= TIMEOUT);
    assert!(correlator.expire(&fired));

    let err = rx.await.expect("reply").expect_err("timed out");
    assert_eq!(err, RpcError::Timeout { method: "activate_profile".to_owned(), after: TIMEOUT });
    assert!(err.is_retryable());
    assert!(!correlator.is_pending(&id));

    // A response that shows up after the timeout settles nothing.
    assert!(!correlator.settle(&id, Some(json!(1)), None));
    assert!(correlator.is_empty());
}

#[tokio::test(start_paused = true)]
async fn settled_request_never_times_out() {
    let (sink, _frames) = memory_sink(ConnectionState::Open);
    let (mut correlator, mut expired) = Correlator::new(TIMEOUT);

    let (id, rx) = issue(&mut correlator, sink.as_ref(), RequestKind::Query, "get_latency", None);
    let id = id.expect("issued");
    correlator.settle(&id, Some(json!({"avg": 1})), None);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(expired.try_recv().is_err());
    // A timer that raced the response still finds nothing to expire.
    assert!(!correlator.expire(&id));
    assert_eq!(rx.await.expect("reply"), Ok(json!({"avg": 1})));
}

#[tokio::test]
async fn reject_all_settles_every_pending_request() {
    let (sink, _frames) = memory_sink(ConnectionState::Open);
    let (mut correlator, _expired) = Correlator::new(TIMEOUT);

    let mut receivers = Vec::new();
    let mut ids = Vec::new();
    for _ in 0..5 {
        let (id, rx) = issue(&mut correlator, sink.as_ref(), RequestKind::Query, "get_events", None);
        ids.push(id.expect("issued"));
        receivers.push(rx);
    }

    assert_eq!(correlator.reject_all(&RpcError::ConnectionClosed), 5);
    assert!(correlator.is_empty());
    for rx in receivers {
        assert_eq!(rx.await.expect("reply"), Err(RpcError::ConnectionClosed));
    }

    // A late response after the close has nothing to settle.
    assert!(!correlator.settle(&ids[0], Some(json!(1)), None));
}
