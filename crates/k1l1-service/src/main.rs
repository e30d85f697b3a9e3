use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use k1l1_api::{
    K1l1Api, NextOpponentRequest, SeedResult, VoteRequest, VoteResult, WordPairRequest,
    WordPairResponse, SERVICE_NAME,
};
use k1l1_core::{Opponent, RankingEntry, SelectionConfig};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

mod config;
mod error;

use config::{cors_layer, init_tracing, Args};
use error::ServiceError;

const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: K1l1Api,
}

#[derive(Debug, Clone, Serialize)]
struct MessageResponse {
    message: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/openapi", get(openapi))
        .route("/api/word-pair", get(word_pair))
        .route("/api/next-opponent", get(next_opponent))
        .route("/api/vote", post(vote))
        .route("/api/rankings", get(rankings))
        .route("/api/seed", get(seed))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_filter);

    let selection = SelectionConfig::with_pool_size(args.pool_size)?;
    let api = K1l1Api::with_config(args.db.clone(), selection, args.max_sessions);
    let migration = api.migrate(false)?;
    tracing::info!(
        db = %args.db.display(),
        schema_version = ?migration.after_version,
        "database ready"
    );

    let router = app(ServiceState { api })
        .layer(cors_layer(&args.cors_origins)?)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "k1l1 service listening");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;
    tracing::info!("k1l1 service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
        tracing::info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("received terminate signal, shutting down");
            }
            Err(err) => {
                tracing::warn!("failed to install terminate handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn root() -> Json<MessageResponse> {
    Json(MessageResponse { message: SERVICE_NAME })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn word_pair(
    State(state): State<ServiceState>,
    Query(request): Query<WordPairRequest>,
) -> Result<Json<WordPairResponse>, ServiceError> {
    let pair = state.api.word_pair(request)?;
    Ok(Json(pair))
}

async fn next_opponent(
    State(state): State<ServiceState>,
    Query(request): Query<NextOpponentRequest>,
) -> Result<Json<Option<Opponent>>, ServiceError> {
    let opponent = state.api.next_opponent(request)?;
    Ok(Json(opponent))
}

async fn vote(
    State(state): State<ServiceState>,
    Json(request): Json<VoteRequest>,
) -> Result<Json<VoteResult>, ServiceError> {
    let result = state.api.vote(request)?;
    Ok(Json(result))
}

async fn rankings(
    State(state): State<ServiceState>,
) -> Result<Json<Vec<RankingEntry>>, ServiceError> {
    let ranked = state.api.rankings()?;
    Ok(Json(ranked))
}

async fn seed(State(state): State<ServiceState>) -> Result<Json<SeedResult>, ServiceError> {
    let result = state.api.seed_defaults()?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::response::Response;
    use http::Request;
    use k1l1_core::DEFAULT_SEED_WORDS;
    use tower::ServiceExt;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("k1l1-service-{}.sqlite3", ulid::Ulid::new()))
    }

    fn cleanup(db_path: &std::path::Path) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", db_path.display(), suffix));
        }
    }

    fn test_state(db_path: &std::path::Path) -> ServiceState {
        ServiceState { api: K1l1Api::new(db_path.to_path_buf()) }
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("GET")
            .body(Body::empty())
            .unwrap_or_else(|err| panic!("failed to build request: {err}"))
    }

    fn vote_request(winner_id: i64, loser_id: i64) -> Request<Body> {
        let payload = serde_json::json!({ "winner_id": winner_id, "loser_id": loser_id });
        Request::builder()
            .uri("/api/vote")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap_or_else(|err| panic!("failed to build vote request: {err}"))
    }

    fn as_i64(value: &serde_json::Value, key: &str) -> i64 {
        value
            .get(key)
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
    }

    // Test IDs: TSVC-001
    #[tokio::test]
    async fn root_and_health_report_liveness() {
        let db_path = unique_temp_db_path();
        let router = app(test_state(&db_path));

        let root = send(&router, get_request("/")).await;
        assert_eq!(root.status(), StatusCode::OK);
        assert_eq!(response_json(root).await, serde_json::json!({ "message": "K1L1 API" }));

        let health = send(&router, get_request("/api/health")).await;
        assert_eq!(health.status(), StatusCode::OK);
        assert_eq!(response_json(health).await, serde_json::json!({ "status": "ok" }));

        cleanup(&db_path);
    }

    // Test IDs: TSVC-002
    #[tokio::test]
    async fn openapi_endpoint_lists_routes() {
        let db_path = unique_temp_db_path();
        let router = app(test_state(&db_path));

        let response = send(&router, get_request("/api/openapi")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = String::from_utf8_lossy(&bytes);
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("/api/next-opponent"));
        assert!(body.contains("/api/vote"));

        cleanup(&db_path);
    }

    // Test IDs: TSVC-003
    #[tokio::test]
    async fn seed_is_idempotent_over_http() {
        let db_path = unique_temp_db_path();
        let router = app(test_state(&db_path));

        let first = response_json(send(&router, get_request("/api/seed")).await).await;
        assert_eq!(
            first.get("message").and_then(serde_json::Value::as_str),
            Some(format!("Added {} new words to database", DEFAULT_SEED_WORDS.len()).as_str())
        );

        let second = response_json(send(&router, get_request("/api/seed")).await).await;
        assert_eq!(
            second.get("message").and_then(serde_json::Value::as_str),
            Some("Added 0 new words to database")
        );

        let rankings = response_json(send(&router, get_request("/api/rankings")).await).await;
        assert_eq!(rankings.as_array().map(Vec::len), Some(DEFAULT_SEED_WORDS.len()));

        cleanup(&db_path);
    }

    // Test IDs: TSVC-004
    #[tokio::test]
    async fn fish_beats_whales_flow() {
        let db_path = unique_temp_db_path();
        let state = test_state(&db_path);
        if let Err(err) = state.api.seed(&["fish", "whales"]) {
            panic!("seed failed: {err}");
        }
        let router = app(state);

        let pair = response_json(send(&router, get_request("/api/word-pair")).await).await;
        let (fish_id, whales_id) = if pair.get("word1").and_then(serde_json::Value::as_str)
            == Some("fish")
        {
            (as_i64(&pair, "word1_id"), as_i64(&pair, "word2_id"))
        } else {
            (as_i64(&pair, "word2_id"), as_i64(&pair, "word1_id"))
        };
        assert!(pair.get("session_id").and_then(serde_json::Value::as_str).is_some());

        let voted = send(&router, vote_request(fish_id, whales_id)).await;
        assert_eq!(voted.status(), StatusCode::OK);
        assert_eq!(
            response_json(voted).await,
            serde_json::json!({ "message": "Vote recorded", "winner": "fish", "loser": "whales" })
        );

        let rankings = response_json(send(&router, get_request("/api/rankings")).await).await;
        assert_eq!(
            rankings,
            serde_json::json!([
                { "word": "fish", "wins": 1, "losses": 0, "win_rate": 1.0, "times_shown": 1 },
                { "word": "whales", "wins": 0, "losses": 1, "win_rate": 0.0, "times_shown": 1 }
            ])
        );

        cleanup(&db_path);
    }

    // Test IDs: TSVC-005
    #[tokio::test]
    async fn vote_errors_map_to_status_codes() {
        let db_path = unique_temp_db_path();
        let state = test_state(&db_path);
        if let Err(err) = state.api.seed(&["fish"]) {
            panic!("seed failed: {err}");
        }
        let router = app(state);

        let missing = send(&router, vote_request(1, 4_242)).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let body = response_json(missing).await;
        assert!(body.get("error").and_then(serde_json::Value::as_str).is_some());

        let self_vote = send(&router, vote_request(1, 1)).await;
        assert_eq!(self_vote.status(), StatusCode::BAD_REQUEST);

        let rankings = response_json(send(&router, get_request("/api/rankings")).await).await;
        assert_eq!(rankings[0]["wins"], serde_json::json!(0));

        cleanup(&db_path);
    }

    // Test IDs: TSVC-006
    #[tokio::test]
    async fn next_opponent_returns_null_for_unknown_winner() {
        let db_path = unique_temp_db_path();
        let state = test_state(&db_path);
        if let Err(err) = state.api.seed(&["fish", "whales", "tea"]) {
            panic!("seed failed: {err}");
        }
        let api = state.api.clone();
        let router = app(state);

        let response =
            send(&router, get_request("/api/next-opponent?winner_id=999&loser_id=2&session_id=s1"))
                .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await, serde_json::Value::Null);
        assert_eq!(api.sessions().excluded_ids("s1"), vec![k1l1_core::WordId(2)]);

        let malformed = send(&router, get_request("/api/next-opponent?winner_id=abc")).await;
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

        cleanup(&db_path);
    }

    // Test IDs: TSVC-007
    #[tokio::test]
    async fn next_opponent_never_returns_winner_or_session_losers() {
        let db_path = unique_temp_db_path();
        let state = test_state(&db_path);
        if let Err(err) = state.api.seed_defaults() {
            panic!("seed failed: {err}");
        }
        let router = app(state);

        let pair = response_json(send(&router, get_request("/api/word-pair")).await).await;
        let session_id = pair
            .get("session_id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_else(|| panic!("missing session_id in {pair}"))
            .to_string();
        let winner = as_i64(&pair, "word1_id");
        let mut loser = as_i64(&pair, "word2_id");
        let mut seen_losers = vec![loser];

        let voted = send(&router, vote_request(winner, loser)).await;
        assert_eq!(voted.status(), StatusCode::OK);

        for _ in 0..10 {
            let uri = format!(
                "/api/next-opponent?winner_id={winner}&loser_id={loser}&session_id={session_id}"
            );
            let opponent = response_json(send(&router, get_request(&uri)).await).await;
            if opponent.is_null() {
                break;
            }
            let opponent_id = as_i64(&opponent, "word_id");
            assert_ne!(opponent_id, winner);
            assert!(!seen_losers.contains(&opponent_id), "{opponent_id} was already excluded");

            let voted = send(&router, vote_request(winner, opponent_id)).await;
            assert_eq!(voted.status(), StatusCode::OK);
            loser = opponent_id;
            seen_losers.push(loser);
        }

        cleanup(&db_path);
    }

    // Test IDs: TSVC-008
    #[tokio::test]
    async fn cors_preflight_allows_configured_origin() {
        let db_path = unique_temp_db_path();
        let cors = match cors_layer(&["http://localhost:3000".to_string()]) {
            Ok(layer) => layer,
            Err(err) => panic!("cors layer failed: {err}"),
        };
        let router = app(test_state(&db_path)).layer(cors);

        let request = Request::builder()
            .uri("/api/vote")
            .method("OPTIONS")
            .header("origin", "http://localhost:3000")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type")
            .body(Body::empty())
            .unwrap_or_else(|err| panic!("failed to build preflight request: {err}"));
        let response = send(&router, request).await;

        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .and_then(|value| value.to_str().ok()),
            Some("http://localhost:3000")
        );
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-credentials")
                .and_then(|value| value.to_str().ok()),
            Some("true")
        );

        cleanup(&db_path);
    }
}
