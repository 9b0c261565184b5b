//! `HttpReadinessProbe` against a stub axum status server.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;

use previewd::application::ReadinessProbe;
use previewd::infra::HttpReadinessProbe;

fn probe() -> HttpReadinessProbe {
    HttpReadinessProbe::new("/status", Duration::from_millis(500), Duration::from_millis(50))
}

/// Serve `/status`, answering 503 for the first `failures` requests.
async fn status_server(failures: usize) -> (u16, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/status",
            get(move |State(hits): State<Arc<AtomicUsize>>| async move {
                if hits.fetch_add(1, Ordering::SeqCst) < failures {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::OK
                }
            }),
        )
        .with_state(Arc::clone(&hits));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (port, hits)
}

async fn unused_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_ready_on_first_success() {
    let (port, hits) = status_server(0).await;

    assert!(probe().wait_ready(port, 5).await);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retries_until_server_reports_ready() {
    let (port, hits) = status_server(2).await;

    assert!(probe().wait_ready(port, 5).await);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts_on_error_status() {
    let (port, hits) = status_server(usize::MAX).await;

    assert!(!probe().wait_ready(port, 3).await);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_connection_refused_counts_as_not_ready() {
    let port = unused_port().await;

    let started = Instant::now();
    assert!(!probe().wait_ready(port, 3).await);
    // Two sleeps between three attempts.
    assert!(started.elapsed() >= Duration::from_millis(100));
}
