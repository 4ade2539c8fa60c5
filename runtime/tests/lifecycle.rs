//! Integration tests for the lifecycle of a logical send
//!
//! Event ordering, multicast delivery, listeners, descriptor inheritance,
//! transport failures and cancellation, against the scripted transport.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use requester_core::environment::Clock;
use requester_core::event::{EventKind, LifecycleEvent};
use requester_core::http::{Body, Method};
use requester_core::operator::{ErrorHandler, Interceptor, OnEnd, OnStart, PreRequest};
use requester_core::{Error, ErrorKind};
use requester_runtime::SendOptions;
use requester_testing::helpers::{count_of, init_test_tracing, kinds, test_requester, CallCounter};
use requester_testing::{test_clock, MockTransport, Reply};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const HOST: &str = "https://api.test";

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_get_without_operators_end_to_end() {
    let transport = MockTransport::new().respond("/users", Reply::json(json!({})));
    let requester = test_requester(&transport);

    let stream = requester.get("/users", None);
    let promise = stream.clone();
    let events = stream.collect_events().await;

    assert_eq!(
        kinds(&events),
        vec![
            EventKind::ProcessStarted,
            EventKind::PassedGuards,
            EventKind::RequestFired,
            EventKind::Responded,
            EventKind::ProcessFinished,
        ]
    );
    let outcome = events.last().and_then(LifecycleEvent::outcome).cloned();
    assert_eq!(outcome.unwrap().unwrap().body, Body::Json(json!({})));
    assert_eq!(promise.await.unwrap(), Body::Json(json!({})));
}

#[tokio::test]
async fn test_events_share_process_id_and_clock() {
    let transport = MockTransport::new().fallback(Reply::text("ok"));
    let requester = test_requester(&transport);

    let first = requester.get("/a", None);
    let second = requester.get("/b", None);
    assert_ne!(first.process_id(), second.process_id());

    let id = first.process_id();
    let events = first.collect_events().await;
    assert!(events.iter().all(|event| event.process_id == id));
    let at = test_clock().now();
    assert!(events.iter().all(|event| event.at == at));
    assert!(events.iter().all(|event| event.cycle == 0));
    drop(second);
}

#[tokio::test]
async fn test_error_status_is_a_normal_response() {
    let transport =
        MockTransport::new().respond("/missing", Reply::status(404, json!({ "error": "nope" })));
    let requester = test_requester(&transport);

    let response = requester.get("/missing", None).response().await.unwrap();
    assert_eq!(response.status, 404);
    assert!(!response.is_success());
    assert_eq!(response.body, Body::Json(json!({ "error": "nope" })));
}

#[tokio::test]
async fn test_progress_events_precede_response() {
    let transport = MockTransport::new().respond_to(
        Method::Post,
        "/upload",
        Reply::json(json!({ "stored": true }))
            .upload(512, 1024)
            .upload(1024, 1024)
            .download(10, 10),
    );
    let requester = test_requester(&transport);

    let events = requester
        .post("/upload", Some(SendOptions::new().body("payload")))
        .collect_events()
        .await;

    assert_eq!(
        kinds(&events),
        vec![
            EventKind::ProcessStarted,
            EventKind::PassedGuards,
            EventKind::RequestFired,
            EventKind::OnUpload,
            EventKind::OnUpload,
            EventKind::OnDownload,
            EventKind::Responded,
            EventKind::ProcessFinished,
        ]
    );
    assert_eq!(transport.fired()[0].body, Body::Text("payload".to_string()));
}

// ============================================================================
// Multicast and listeners
// ============================================================================

#[tokio::test]
async fn test_every_subscriber_sees_the_same_sequence() {
    let transport = MockTransport::new()
        .respond("/slow", Reply::json(json!([1, 2])).after(Duration::from_millis(20)));
    let requester = test_requester(&transport);

    let stream = requester.get("/slow", None);
    let early = stream.clone();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let late = stream.clone();

    let (a, b, c) = tokio::join!(
        stream.collect_events(),
        early.collect_events(),
        late.collect_events()
    );
    assert_eq!(kinds(&a), kinds(&b));
    assert_eq!(kinds(&a), kinds(&c));
    assert_eq!(transport.fired_count(), 1);
}

#[tokio::test]
async fn test_listeners_are_inherited_and_called_per_kind() {
    let transport = MockTransport::new().fallback(Reply::json(json!(null)));
    let parent_calls = CallCounter::new();
    let child_calls = CallCounter::new();

    let parent = {
        let calls = parent_calls.clone();
        test_requester(&transport).add_listener(EventKind::Responded, move |_| {
            calls.hit();
        })
    };
    let child = {
        let calls = child_calls.clone();
        parent.clone().add_listener(EventKind::ProcessFinished, move |event| {
            assert!(event.is_terminal());
            calls.hit();
        })
    };

    child.get("/x", None).await.unwrap();
    assert_eq!(parent_calls.count(), 1);
    assert_eq!(child_calls.count(), 1);

    parent.get("/x", None).await.unwrap();
    assert_eq!(parent_calls.count(), 2);
    assert_eq!(child_calls.count(), 1);
}

// ============================================================================
// Descriptor inheritance
// ============================================================================

#[tokio::test]
async fn test_clone_inherits_configuration_and_operators() {
    let transport = MockTransport::new().fallback(Reply::json(json!({})));
    let base = test_requester(&transport)
        .set_host(HOST)
        .configure_headers(|h| h.append("accept", "application/json"))
        .add_operator(PreRequest::map(|o| o.with_header("x-base", "1")));
    let child = base
        .clone()
        .add_operator(PreRequest::map(|o| o.with_header("x-child", "1")));

    child.get("/items", None).await.unwrap();
    base.get("/items", None).await.unwrap();

    let fired = transport.fired();
    assert_eq!(fired[0].url, "https://api.test/items");
    assert_eq!(fired[0].headers.get("accept"), Some("application/json"));
    assert_eq!(fired[0].headers.get("x-base"), Some("1"));
    assert_eq!(fired[0].headers.get("x-child"), Some("1"));
    assert_eq!(fired[1].headers.get("x-base"), Some("1"));
    assert!(!fired[1].headers.contains_key("x-child"));
}

#[tokio::test]
async fn test_send_options_extend_inherited_maps() {
    let transport = MockTransport::new().fallback(Reply::json(json!({})));
    let requester = test_requester(&transport)
        .set_host(HOST)
        .configure_params(|p| p.append("page", "1"));

    requester
        .put(
            "/items/7",
            Some(
                SendOptions::new()
                    .param("page", "2")
                    .header("if-match", "abc")
                    .body(json!({ "name": "seven" })),
            ),
        )
        .await
        .unwrap();

    let fired = transport.fired();
    let request = &fired[0];
    assert_eq!(request.method, Method::Put);
    assert_eq!(request.params.get_all("page"), ["1", "2"]);
    assert_eq!(request.headers.get("if-match"), Some("abc"));
    assert_eq!(request.body, Body::Json(json!({ "name": "seven" })));
    assert!(requester.descriptor().body().is_empty());
}

// ============================================================================
// Failures and side-effect operators
// ============================================================================

#[tokio::test]
async fn test_transport_failure_is_terminal() {
    init_test_tracing();
    let transport = MockTransport::new().respond("/down", Reply::fail("connection refused"));
    let handled = Arc::new(Mutex::new(Vec::new()));
    let started = CallCounter::new();
    let ended = CallCounter::new();

    let requester = {
        let handled = Arc::clone(&handled);
        let started = started.clone();
        let ended = ended.clone();
        test_requester(&transport).add_operators([
            OnStart::new(move |_| {
                started.hit();
            })
            .into(),
            ErrorHandler::new(move |error| handled.lock().unwrap().push(error.kind())).into(),
            OnEnd::new(move |_| {
                ended.hit();
            })
            .into(),
        ])
    };

    let stream = requester.get("/down", None);
    let promise = stream.clone();
    let events = stream.collect_events().await;

    assert_eq!(
        kinds(&events),
        vec![
            EventKind::ProcessStarted,
            EventKind::PassedGuards,
            EventKind::RequestFired,
            EventKind::Aborted,
            EventKind::ProcessFinished,
        ]
    );
    let error = promise.await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert_eq!(error.cause().to_string(), "connection refused");
    assert_eq!(*handled.lock().unwrap(), vec![ErrorKind::Transport]);
    assert_eq!(started.count(), 1);
    assert_eq!(ended.count(), 1);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_mid_flight_emits_cancelled_once() {
    // No route: the call hangs until torn down
    let transport = MockTransport::new();
    let handled = Arc::new(Mutex::new(Vec::new()));
    let ended = CallCounter::new();

    let requester = {
        let handled = Arc::clone(&handled);
        let ended = ended.clone();
        test_requester(&transport)
            .add_operator(ErrorHandler::new(move |error| {
                handled.lock().unwrap().push(error.kind());
            }))
            .add_operator(OnEnd::new(move |_| {
                ended.hit();
            }))
    };

    let stream = requester.get("/hang", None);
    let observer = stream.clone();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.cancel();
    stream.cancel();

    let events = observer.collect_events().await;
    assert_eq!(count_of(&events, EventKind::Cancelled), 1);
    assert_eq!(count_of(&events, EventKind::ProcessFinished), 0);
    assert_eq!(kinds(&events).last(), Some(&EventKind::Cancelled));

    assert_eq!(transport.cancelled_count(), 1);
    assert_eq!(*handled.lock().unwrap(), vec![ErrorKind::Cancelled]);
    assert_eq!(ended.count(), 1);

    let outcome = stream.await;
    assert!(outcome.is_err_and(|error| error.is(ErrorKind::Cancelled)));
}

#[tokio::test]
async fn test_dropping_every_handle_cancels_the_send() {
    let transport = MockTransport::new();
    let ended = CallCounter::new();
    let requester = {
        let ended = ended.clone();
        test_requester(&transport).add_operator(OnEnd::new(move |_| {
            ended.hit();
        }))
    };

    let stream = requester.get("/hang", None);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.fired_count(), 1);

    drop(stream);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(transport.cancelled_count(), 1);
    assert_eq!(ended.count(), 1);
}

#[tokio::test]
async fn test_cancel_during_interceptor_recovery_ends_with_cancelled() {
    let transport = MockTransport::new();
    let handled = Arc::new(Mutex::new(Vec::new()));
    let requester = {
        let handled = Arc::clone(&handled);
        test_requester(&transport)
            .add_operator(
                Interceptor::new(|| async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Err(Error::custom("connection dropped"))
                })
                .retry_with(|| async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok(())
                }),
            )
            .add_operator(ErrorHandler::new(move |error| {
                handled.lock().unwrap().push(error.kind());
            }))
    };

    let stream = requester.get("/hang", None);
    let observer = stream.clone();
    tokio::time::sleep(Duration::from_millis(60)).await;
    stream.cancel();

    let events = observer.collect_events().await;
    assert_eq!(
        kinds(&events),
        vec![
            EventKind::ProcessStarted,
            EventKind::PassedGuards,
            EventKind::RequestFired,
            EventKind::Intercepted,
            EventKind::Cancelled,
            EventKind::Restarted,
            EventKind::Cancelled,
        ]
    );
    let cycles: Vec<u32> = events.iter().map(|event| event.cycle).collect();
    assert_eq!(cycles, vec![0, 0, 0, 0, 0, 0, 1]);

    assert_eq!(transport.fired_count(), 1);
    assert_eq!(*handled.lock().unwrap(), vec![ErrorKind::Cancelled]);
    assert!(stream.await.is_err_and(|error| error.is(ErrorKind::Cancelled)));
}

#[tokio::test]
async fn test_cancel_after_finish_is_a_no_op() {
    let transport = MockTransport::new().fallback(Reply::text("done"));
    let requester = test_requester(&transport);

    let stream = requester.get("/x", None);
    let events = stream.clone().collect_events().await;
    stream.cancel();

    assert_eq!(kinds(&events).last(), Some(&EventKind::ProcessFinished));
    assert_eq!(count_of(&stream.history(), EventKind::Cancelled), 0);
    assert_eq!(stream.await.unwrap(), Body::Text("done".to_string()));
}
