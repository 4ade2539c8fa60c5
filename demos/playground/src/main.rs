//! Requester playground
//!
//! Runs a few logical sends against the scripted transport and prints every
//! lifecycle event they publish.

use futures::StreamExt;
use requester_core::error::Error;
use requester_core::event::{EventKind, EventPayload, LifecycleEvent};
use requester_core::operator::{Guard, Interceptor, OnEnd, PostRequest, PreRequest};
use requester_runtime::backoff::BackoffPolicy;
use requester_runtime::metrics::describe_metrics;
use requester_runtime::{Requester, RequesterConfig, SendOptions};
use requester_testing::{MockTransport, Reply};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HOST: &str = "https://playground.test";

fn describe(event: &LifecycleEvent) -> String {
    let detail = match &event.payload {
        EventPayload::RequestFired { request } => format!("{} {}", request.method, request.url),
        EventPayload::OnUpload { progress } | EventPayload::OnDownload { progress } => {
            format!("{}/{:?}", progress.loaded, progress.total)
        },
        EventPayload::Responded { response } => format!("status {}", response.status),
        EventPayload::ProcessFinished { outcome: Ok(response) } => format!("ok {}", response.status),
        EventPayload::ProcessFinished { outcome: Err(error) }
        | EventPayload::Aborted { error }
        | EventPayload::Intercepted { error } => error.to_string(),
        EventPayload::Restarted { cause } => format!("after {cause}"),
        _ => String::new(),
    };
    format!("  [{} #{}] {} {detail}", event.process_id, event.cycle, event.kind())
}

async fn print_events(title: &str, stream: requester_runtime::EventStream) {
    println!("\n>>> {title}");
    let mut events = stream;
    while let Some(event) = events.next().await {
        println!("{}", describe(&event));
    }
}

fn backend() -> MockTransport {
    MockTransport::new()
        .respond(
            format!("{HOST}/users"),
            Reply::json(json!([{ "id": 1, "name": "ada" }])).download(64, 64),
        )
        .respond_once(format!("{HOST}/upload"), Reply::status(401, json!({ "error": "expired" })))
        .respond(
            format!("{HOST}/upload"),
            Reply::json(json!({ "stored": true })).upload(512, 1024).upload(1024, 1024),
        )
        .respond(
            format!("{HOST}/reports"),
            Reply::json(json!({})).after(Duration::from_secs(2)),
        )
        .fallback(Reply::status(404, json!({ "error": "not found" })))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "playground=info,requester_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    describe_metrics();

    println!("=== Requester Playground ===");

    let config = RequesterConfig::from_env()?.with_max_restarts(5);
    let api = Requester::with_config(Arc::new(backend()), config)?
        .set_host(HOST)
        .configure_headers(|headers| headers.append("accept", "application/json"))
        .add_operator(OnEnd::new(|process| tracing::info!(%process, "Send ended")))
        .add_listener(EventKind::ProcessFinished, |event| {
            tracing::info!(process = %event.process_id, "Listener saw the outcome");
        });

    // Plain request
    print_events("GET /users", api.get("/users", None)).await;

    // The first upload is answered with 401; the retry backs off and the
    // second cycle succeeds.
    let policy = BackoffPolicy::builder()
        .initial_delay(Duration::from_millis(50))
        .build();
    let uploads = api
        .add_operator(PreRequest::map(|options| options.with_header("x-client", "playground")))
        .add_operator(
            PostRequest::new(|response| async move {
                if response.status == 401 {
                    Err(Error::custom("session expired"))
                } else {
                    Ok(response)
                }
            })
            .retry_with(policy.recovery()),
        );
    print_events(
        "POST /upload (retry on 401)",
        uploads.post("/upload", Some(SendOptions::new().body("payload"))),
    )
    .await;

    // Interception: a deadline beats the slow report endpoint
    let reports = api.add_operator(Interceptor::new(|| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Err(Error::custom("deadline exceeded"))
    }));
    print_events("GET /reports (deadline)", reports.get("/reports", None)).await;

    // Guard rejection
    let offline = api.add_operator(Guard::allow_if(|| false));
    match offline.get("/users", None).await {
        Ok(body) => println!("\nUnexpected body: {body:?}"),
        Err(error) => println!("\n>>> Guarded send failed: {error}"),
    }

    // Promise form
    let body = api.get("/users", None).await?;
    println!("\n>>> Awaited body: {body:?}");

    println!("\n=== Playground Complete ===");
    Ok(())
}
