//! HttpUpstream against a local axum server

use axum::body::Body;
use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream;
use gvr_cache::client::TransportError;
use gvr_cache::{
    DataSource, DetailOutcome, HttpUpstream, LoadError, LoadOutcome, PartitionedStore,
    SessionController, SessionId, UpstreamSource,
};
use gvr_common::CacheLimits;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;

const METADATA: &str = "{\"type\":\"metadata\",\"total_genes\":3,\"total_variants\":7,\"impact_matrix\":{\"pathogenic\":{\"HIGH\":2}}}\n";

async fn summary(Path(session): Path<String>) -> Response {
    match session.as_str() {
        "abc123" => {
            // Chunk boundaries fall mid-record
            let chunks = vec![
                METADATA.to_string(),
                "{\"type\":\"gene\",\"gene\":\"BRCA1\",\"counts\":{\"pathogenic\":2}}\n{\"type\":\"ge".to_string(),
                "ne\",\"gene\":\"TP53\",\"counts\":{\"vus\":3}}\r\n".to_string(),
                "{\"type\":\"gene\",\"gene\":\"MLH1\",\"counts\":{\"benign\":2}}".to_string(),
            ];
            let body = Body::from_stream(stream::iter(
                chunks.into_iter().map(Ok::<_, Infallible>),
            ));
            ([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "pipeline failed").into_response(),
    }
}

async fn gene_detail(Path((_session, gene)): Path<(String, String)>) -> Response {
    match gene.as_str() {
        "BRCA1" => Json(json!({
            "gene": "BRCA1",
            "variants": [
                { "id": "17-43044295-G-A", "hgvs_c": "c.5266dupC", "acmg_class": "pathogenic" },
                { "variant_id": "17-43045712-T-C", "impact": "MODERATE" }
            ]
        }))
        .into_response(),
        "ALIAS" => Json(json!({ "gene": "OTHER", "variants": [] })).into_response(),
        _ => (StatusCode::NOT_FOUND, "no such gene").into_response(),
    }
}

/// Serve the fixtures on an ephemeral port and return the base URL
async fn spawn_upstream() -> String {
    let app = Router::new()
        .route("/sessions/:session/variants/summary", get(summary))
        .route("/sessions/:session/genes/:gene/variants", get(gene_detail));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn controller(base_url: &str) -> SessionController {
    SessionController::new(
        Arc::new(HttpUpstream::new(base_url).unwrap()),
        Arc::new(PartitionedStore::disabled()),
        CacheLimits::default(),
    )
}

#[tokio::test]
async fn test_streams_session_over_http() {
    let base_url = spawn_upstream().await;
    let controller = controller(&base_url);

    let outcome = controller.load(SessionId::new("abc123")).await.unwrap();

    assert_eq!(outcome, LoadOutcome::Loaded(DataSource::Network));
    let dataset = controller.snapshot().dataset.unwrap();
    let genes: Vec<_> = dataset.genes.iter().map(|g| g.gene.as_str()).collect();
    assert_eq!(genes, vec!["BRCA1", "TP53", "MLH1"]);
    assert_eq!(dataset.total_variants, 7);
    assert_eq!(dataset.gene("TP53").unwrap().counts.uncertain_significance, 3);
}

#[tokio::test]
async fn test_gene_detail_over_http() {
    let base_url = spawn_upstream().await;
    let controller = controller(&base_url);
    controller.load(SessionId::new("abc123")).await.unwrap();

    let outcome = controller.load_gene_detail("BRCA1").await;

    assert_eq!(outcome, DetailOutcome::Merged(2));
    let dataset = controller.snapshot().dataset.unwrap();
    let variants = &dataset.gene("BRCA1").unwrap().variants;
    assert_eq!(variants[0].hgvs_c.as_deref(), Some("c.5266dupC"));
    assert_eq!(variants[1].id, "17-43045712-T-C");
    assert!(dataset.gene("TP53").unwrap().variants.is_empty());
}

#[tokio::test]
async fn test_server_error_fails_load() {
    let base_url = spawn_upstream().await;
    let controller = controller(&base_url);

    let result = controller.load(SessionId::new("broken")).await;

    match result {
        Err(LoadError::Transport { session, message }) => {
            assert_eq!(session, SessionId::new("broken"));
            assert!(message.contains("500"), "unexpected message: {}", message);
            assert!(message.contains("pipeline failed"));
        }
        other => panic!("expected transport error, got {:?}", other),
    }
    assert!(controller.snapshot().error.is_some());
}

#[tokio::test]
async fn test_fetch_gene_variants_errors() {
    let base_url = spawn_upstream().await;
    let upstream = HttpUpstream::new(&base_url).unwrap();
    let session = SessionId::new("abc123");

    let missing = upstream.fetch_gene_variants(&session, "NOPE").await;
    assert!(matches!(missing, Err(TransportError::Status { status: 404, .. })));

    let mismatched = upstream.fetch_gene_variants(&session, "ALIAS").await;
    assert!(matches!(mismatched, Err(TransportError::Decode(_))));
}

#[tokio::test]
async fn test_unreachable_upstream_is_a_network_error() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let upstream = HttpUpstream::new(&format!("http://{}", addr)).unwrap();
    let url = upstream.summary_url(&SessionId::new("abc123"));
    let result = upstream.open_stream(&url).await;

    assert!(matches!(result, Err(TransportError::Network(_))));
}
