use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use clap::Parser;
use k1l1_api::DEFAULT_MAX_SESSIONS;
use k1l1_core::DEFAULT_POOL_SIZE;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "k1l1-service")]
#[command(about = "Local HTTP service for pairwise word ranking")]
pub struct Args {
    #[arg(long, env = "K1L1_DB", default_value = "./k1l1.sqlite3")]
    pub db: PathBuf,
    #[arg(long, env = "K1L1_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,
    /// Browser origins allowed to call the API (comma separated).
    #[arg(
        long = "cors-origin",
        env = "K1L1_CORS_ORIGIN",
        value_delimiter = ',',
        default_value = "http://localhost:3000"
    )]
    pub cors_origins: Vec<String>,
    #[arg(
        long,
        env = "K1L1_POOL_SIZE",
        default_value_t = DEFAULT_POOL_SIZE,
        value_parser = parse_pool_size
    )]
    pub pool_size: usize,
    #[arg(long, env = "K1L1_MAX_SESSIONS", default_value_t = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,
    /// Used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}

fn parse_pool_size(raw: &str) -> Result<usize, String> {
    let pool_size = raw.parse::<usize>().map_err(|err| format!("invalid pool size: {err}"))?;
    if pool_size == 0 {
        return Err("pool size must be at least 1".to_string());
    }
    Ok(pool_size)
}

pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Credentialed CORS for the configured frontend origins.
///
/// # Errors
/// Returns an error when an origin is not a valid header value.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin.trim())
                .with_context(|| format!("invalid CORS origin: {origin}"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .max_age(Duration::from_secs(60 * 60)))
}
