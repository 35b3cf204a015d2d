//! HTTP client tests against local axum servers.
//!
//! The source and sink services are stood up on ephemeral ports, so these
//! run without any external infrastructure.
//!
//! Run with: `cargo test --test http`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};

use sync_pipeline::{
    Domain, HttpSink, HttpSourceClient, MergeBuffer, PipelineConfig, RecordSource, RetryConfig,
    Sink, SinkError, SourceError,
};

// =============================================================================
// Server helpers
// =============================================================================

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[derive(Debug, Clone, Deserialize)]
struct PageQuery {
    page: usize,
    size: usize,
    #[serde(rename = "updatedAfter")]
    updated_after: Option<String>,
}

#[derive(Default)]
struct MockSource {
    records: Vec<Value>,
    /// Respond with `fail_status` to this many requests before serving data
    failures: AtomicUsize,
    fail_status: u16,
    requests: Mutex<Vec<PageQuery>>,
}

async fn list_page(
    State(source): State<Arc<MockSource>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>, (StatusCode, String)> {
    source.requests.lock().push(query.clone());

    let remaining = source.failures.load(Ordering::SeqCst);
    if remaining > 0 {
        source.failures.store(remaining - 1, Ordering::SeqCst);
        let status = StatusCode::from_u16(source.fail_status).unwrap();
        return Err((status, "injected failure".to_string()));
    }

    let data: Vec<Value> = source
        .records
        .iter()
        .skip(query.page * query.size)
        .take(query.size)
        .cloned()
        .collect();
    Ok(Json(json!({
        "data": data,
        "page": query.page,
        "size": query.size,
        "total": source.records.len(),
    })))
}

async fn source_server(source: Arc<MockSource>) -> String {
    let app = Router::new()
        .route("/api/customers", get(list_page))
        .route("/api/products", get(list_page))
        .with_state(source);
    serve(app).await
}

fn customers(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({ "id": format!("C{i}"), "createdDate": format!("2024-01-01T09:0{i}:00") }))
        .collect()
}

fn client(base_url: &str, page_size: usize) -> HttpSourceClient {
    HttpSourceClient::new(base_url, page_size, Duration::from_secs(5), RetryConfig::immediate(3)).unwrap()
}

// =============================================================================
// Source client
// =============================================================================

#[tokio::test]
async fn source_walks_every_page() {
    let source = Arc::new(MockSource {
        records: customers(5),
        ..Default::default()
    });
    let base = source_server(source.clone()).await;

    let records = client(&base, 2).fetch_all(&Domain::customers()).await.unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records[4]["id"], "C4");

    let pages: Vec<usize> = source.requests.lock().iter().map(|q| q.page).collect();
    assert_eq!(pages, vec![0, 1, 2]);
}

#[tokio::test]
async fn source_empty_listing_is_one_request() {
    let source = Arc::new(MockSource::default());
    let base = source_server(source.clone()).await;

    let records = client(&base, 100).fetch_all(&Domain::products()).await.unwrap();
    assert!(records.is_empty());
    assert_eq!(source.requests.lock().len(), 1);
}

#[tokio::test]
async fn source_retries_transient_failures() {
    let source = Arc::new(MockSource {
        records: customers(3),
        failures: AtomicUsize::new(2),
        fail_status: 503,
        ..Default::default()
    });
    let base = source_server(source.clone()).await;

    let records = client(&base, 10).fetch_all(&Domain::customers()).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(source.requests.lock().len(), 3);
}

#[tokio::test]
async fn source_gives_up_after_max_attempts() {
    let source = Arc::new(MockSource {
        records: customers(3),
        failures: AtomicUsize::new(10),
        fail_status: 502,
        ..Default::default()
    });
    let base = source_server(source.clone()).await;

    let err = client(&base, 10).fetch_all(&Domain::customers()).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(source.requests.lock().len(), 3);
}

#[tokio::test]
async fn source_client_error_is_not_retried() {
    let source = Arc::new(MockSource {
        failures: AtomicUsize::new(1),
        fail_status: 404,
        ..Default::default()
    });
    let base = source_server(source.clone()).await;

    let err = client(&base, 10).fetch_all(&Domain::customers()).await.unwrap_err();
    assert!(matches!(err, SourceError::Rejected { status: 404, .. }));
    assert_eq!(source.requests.lock().len(), 1);
}

#[tokio::test]
async fn source_incremental_scan_filters_locally() {
    let source = Arc::new(MockSource {
        records: customers(5),
        ..Default::default()
    });
    let base = source_server(source.clone()).await;
    let since = Utc.with_ymd_and_hms(2024, 1, 1, 9, 2, 0).unwrap();

    let records = client(&base, 10).fetch_since(&Domain::customers(), since).await.unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["C3", "C4"]);
    assert!(source.requests.lock()[0].updated_after.is_none());
}

#[tokio::test]
async fn source_server_side_filter_sends_updated_after() {
    let source = Arc::new(MockSource {
        records: customers(5),
        ..Default::default()
    });
    let base = source_server(source.clone()).await;
    let since = Utc.with_ymd_and_hms(2024, 1, 1, 9, 2, 0).unwrap();

    let records = client(&base, 10)
        .with_server_side_filter(true)
        .fetch_since(&Domain::customers(), since)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(
        source.requests.lock()[0].updated_after.as_deref(),
        Some("2024-01-01T09:02:00Z")
    );
}

// =============================================================================
// Sink client
// =============================================================================

#[derive(Default)]
struct MockSink {
    bodies: Mutex<Vec<Value>>,
    status: Mutex<Option<u16>>,
}

async fn receive(State(sink): State<Arc<MockSink>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if let Some(status) = *sink.status.lock() {
        return (StatusCode::from_u16(status).unwrap(), Json(json!({ "error": "nope" })));
    }
    let count = body["metadata"]["customerCount"].as_u64().unwrap_or(0)
        + body["metadata"]["productCount"].as_u64().unwrap_or(0);
    sink.bodies.lock().push(body);
    (
        StatusCode::OK,
        Json(json!({ "status": "success", "message": "stored", "recordsProcessed": count })),
    )
}

async fn sink_server(sink: Arc<MockSink>) -> PipelineConfig {
    let app = Router::new()
        .route("/api/analytics/data", post(receive))
        .route("/actuator/health", get(|| async { Json(json!({ "status": "UP" })) }))
        .with_state(sink);
    PipelineConfig {
        sink_base_url: serve(app).await,
        ..Default::default()
    }
}

fn payload() -> sync_pipeline::MergedPayload {
    let buffer = MergeBuffer::new(vec![Domain::customers(), Domain::products()], 100);
    buffer.append("customer", vec![json!({ "id": "C1" })]).unwrap();
    buffer
        .append("product", vec![json!({ "id": "P1" }), json!({ "id": "P2" })])
        .unwrap();
    buffer.drain_to_payload().unwrap()
}

#[tokio::test]
async fn sink_posts_merged_payload() {
    let mock = Arc::new(MockSink::default());
    let config = sink_server(mock.clone()).await;
    let sink = HttpSink::from_config(&config).unwrap();

    assert!(sink.health_check().await);
    let ack = sink.send(&payload()).await.unwrap();
    assert_eq!(ack.status, "success");
    assert_eq!(ack.records_processed, 3);

    let bodies = mock.bodies.lock();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["customers"][0]["id"], "C1");
    assert_eq!(bodies[0]["products"].as_array().unwrap().len(), 2);
    assert_eq!(bodies[0]["metadata"]["productCount"], 2);
    assert!(bodies[0]["eventId"].as_str().unwrap().starts_with("EVT-"));
}

#[tokio::test]
async fn sink_errors_are_classified() {
    let mock = Arc::new(MockSink::default());
    let config = sink_server(mock.clone()).await;
    let sink = HttpSink::from_config(&config).unwrap();

    *mock.status.lock() = Some(500);
    let err = sink.send(&payload()).await.unwrap_err();
    assert!(err.is_retryable());

    *mock.status.lock() = Some(422);
    let err = sink.send(&payload()).await.unwrap_err();
    assert!(matches!(err, SinkError::Rejected { status: 422, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn sink_health_check_fails_when_unreachable() {
    let sink = HttpSink::new(
        "http://127.0.0.1:9/api/analytics/data",
        "http://127.0.0.1:9/actuator/health",
        Duration::from_millis(500),
    )
    .unwrap();
    assert!(!sink.health_check().await);

    let err = sink.send(&payload()).await.unwrap_err();
    assert!(err.is_retryable());
}
