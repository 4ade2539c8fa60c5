//! Integration tests for guards
//!
//! Gating, error tagging and guard-originated restarts.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use requester_core::error::{Error, ErrorKind};
use requester_core::event::EventKind;
use requester_core::operator::{ErrorHandler, Guard, PreRequest};
use requester_runtime::backoff::{BackoffExhausted, BackoffPolicy};
use requester_testing::helpers::{count_of, kinds, test_requester, CallCounter};
use requester_testing::{MockTransport, Reply};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("session expired")]
struct SessionExpired;

fn ok_transport() -> MockTransport {
    MockTransport::new().fallback(Reply::json(json!({ "ok": true })))
}

#[tokio::test]
async fn test_false_guard_prevents_request() {
    let transport = ok_transport();
    let transformed = CallCounter::new();
    let requester = {
        let transformed = transformed.clone();
        test_requester(&transport)
            .add_operator(Guard::allow_if(|| true))
            .add_operator(Guard::allow_if(|| false))
            .add_operator(PreRequest::map(move |options| {
                transformed.hit();
                options
            }))
    };

    let stream = requester.get("/secret", None);
    let promise = stream.clone();
    let events = stream.collect_events().await;

    assert_eq!(
        kinds(&events),
        vec![
            EventKind::ProcessStarted,
            EventKind::Aborted,
            EventKind::ProcessFinished
        ]
    );
    assert_eq!(promise.await.unwrap_err().kind(), ErrorKind::GuardRejected);
    assert_eq!(transformed.count(), 0);
    assert_eq!(transport.fired_count(), 0);
}

#[tokio::test]
async fn test_failing_guard_is_tagged_and_keeps_cause() {
    let transport = ok_transport();
    let handled = Arc::new(Mutex::new(None));
    let requester = {
        let handled = Arc::clone(&handled);
        test_requester(&transport)
            .add_operator(Guard::new(|| async { Err(Error::custom(SessionExpired)) }))
            .add_operator(ErrorHandler::new(move |error| {
                *handled.lock().unwrap() = Some(error.clone());
            }))
    };

    let error = requester.get("/me", None).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::GuardRejected);
    assert!(error.downcast_ref::<SessionExpired>().is_some());
    let handled = handled.lock().unwrap().clone().unwrap();
    assert_eq!(handled.to_string(), "GuardRejected: session expired");
}

#[tokio::test]
async fn test_typed_guard_error_passes_through() {
    let transport = ok_transport();
    let requester = test_requester(&transport).add_operator(Guard::new(|| async {
        Err(Error::new(ErrorKind::Transport, "dns lookup failed"))
    }));

    let error = requester.get("/me", None).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn test_guards_are_evaluated_concurrently() {
    let transport = ok_transport();
    let slow_guard = || {
        Guard::new(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(true)
        })
    };
    let requester = test_requester(&transport)
        .add_operator(slow_guard())
        .add_operator(slow_guard())
        .add_operator(slow_guard());

    let started = Instant::now();
    requester.get("/x", None).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(250));
}

#[tokio::test]
async fn test_guard_retry_restarts_whole_cycle() {
    let transport = ok_transport();
    let checks = CallCounter::new();
    let refreshed = Arc::new(AtomicBool::new(false));
    let transformed = CallCounter::new();

    let requester = {
        let checks = checks.clone();
        let refreshed_check = Arc::clone(&refreshed);
        let refreshed_set = Arc::clone(&refreshed);
        let transformed = transformed.clone();
        test_requester(&transport)
            .add_operator(
                Guard::new(move || {
                    checks.hit();
                    let valid = refreshed_check.load(Ordering::SeqCst);
                    async move { Ok(valid) }
                })
                .retry_with(move || {
                    let refreshed = Arc::clone(&refreshed_set);
                    async move {
                        refreshed.store(true, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .add_operator(PreRequest::map(move |options| {
                transformed.hit();
                options
            }))
    };

    let stream = requester.get("/profile", None);
    let promise = stream.clone();
    let events = stream.collect_events().await;

    assert_eq!(
        kinds(&events),
        vec![
            EventKind::ProcessStarted,
            EventKind::Restarted,
            EventKind::PassedGuards,
            EventKind::RequestFired,
            EventKind::Responded,
            EventKind::ProcessFinished,
        ]
    );
    assert_eq!(events[1].cycle, 0);
    assert_eq!(events[2].cycle, 1);
    assert!(promise.await.is_ok());
    assert_eq!(checks.count(), 2);
    assert_eq!(transformed.count(), 1);
    assert_eq!(transport.fired_count(), 1);
}

#[tokio::test]
async fn test_exhausted_backoff_is_retrying_rejected() {
    let transport = ok_transport();
    let checks = CallCounter::new();
    let policy = BackoffPolicy::builder()
        .max_retries(2)
        .initial_delay(Duration::from_millis(1))
        .build();

    let requester = {
        let checks = checks.clone();
        test_requester(&transport).add_operator(
            Guard::allow_if(move || {
                checks.hit();
                false
            })
            .retry_with(policy.recovery()),
        )
    };

    let stream = requester.get("/never", None);
    let promise = stream.clone();
    let events = stream.collect_events().await;

    assert_eq!(count_of(&events, EventKind::Restarted), 3);
    assert_eq!(count_of(&events, EventKind::Aborted), 1);
    assert_eq!(checks.count(), 3);

    let error = promise.await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::RetryingRejected);
    let recovery_error = error.downcast_ref::<Error>().unwrap();
    assert!(recovery_error.downcast_ref::<BackoffExhausted>().is_some());
    assert_eq!(transport.fired_count(), 0);
}
