//! The status HTTP server (C13, server half): a single read-only
//! `GET /status` resource with a per-IP sliding-window rate limit and
//! echo-or-wildcard CORS (§4.11, §6).

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::Mutex;
use vaultbot_core::config::Config;
use vaultbot_core::store::Store;

const RATE_LIMIT_WINDOW_SECS: i64 = 60;
const RATE_LIMIT_MAX_REQUESTS: usize = 30;

pub(crate) struct RouterState {
    store: Store,
    config: Config,
    hits: Mutex<std::collections::HashMap<IpAddr, VecDeque<i64>>>,
}

impl RouterState {
    pub(crate) fn new(store: Store, config: Config) -> Self {
        RouterState {
            store,
            config,
            hits: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

pub(crate) fn router(state: Arc<RouterState>) -> Router<()> {
    Router::new()
        .route("/status", get(status).options(status_options))
        .with_state(state)
}

/// Evicts entries older than twice the rate-limit window and returns
/// whether the new request at `now` is allowed under the 30-req/60s
/// sliding window (§4.11).
async fn check_rate_limit(state: &RouterState, ip: IpAddr, now: i64) -> bool {
    let mut hits = state.hits.lock().await;
    let entry = hits.entry(ip).or_default();
    entry.retain(|ts| now - *ts < RATE_LIMIT_WINDOW_SECS * 2);

    let recent = entry
        .iter()
        .filter(|ts| now - **ts < RATE_LIMIT_WINDOW_SECS)
        .count();
    if recent >= RATE_LIMIT_MAX_REQUESTS {
        return false;
    }
    entry.push_back(now);
    true
}

fn cors_headers(state: &RouterState, origin: Option<&HeaderValue>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let configured = &state.config.cors_allowed_origin;

    if configured == "*" {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
    } else if let Some(origin) = origin {
        if origin.to_str().ok() == Some(configured.as_str()) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        }
    }

    headers
}

async fn status_options(
    State(state): State<Arc<RouterState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let mut response_headers = cors_headers(&state, headers.get(header::ORIGIN));
    response_headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    (StatusCode::NO_CONTENT, response_headers)
}

async fn status(
    State(state): State<Arc<RouterState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let now = vaultbot_core::clock::now_secs();

    if !check_rate_limit(&state, addr.ip(), now).await {
        let mut response_headers = cors_headers(&state, headers.get(header::ORIGIN));
        response_headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate"),
        );
        return (
            StatusCode::TOO_MANY_REQUESTS,
            response_headers,
            Json(json!({"error": "rate limit exceeded", "retryAfterSeconds": 60})),
        )
            .into_response();
    }

    let mut response_headers = cors_headers(&state, headers.get(header::ORIGIN));
    response_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );

    match vaultbot_core::status::build_snapshot(&state.store, &state.config, now) {
        Ok(snapshot) =>
            (StatusCode::OK, response_headers, Json(snapshot)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to build status snapshot");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                response_headers,
                Json(json!({"error": "internal error"})),
            )
                .into_response()
        }
    }
}

/// Returns the bound HTTP methods so the caller can assert 405 behavior is
/// covered by axum's own method routing without duplicating it here.
pub(crate) fn supported_methods() -> &'static [Method] {
    &[Method::GET, Method::OPTIONS]
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_state() -> Arc<RouterState> {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let config = Config::validate(vaultbot_core::config::ConfigInput {
            rpc_url: Some("https://rpc".into()),
            indexer_api_key: Some("k".into()),
            token_mint: Some("MINT".into()),
            treasury_address: Some("treasury".into()),
            treasury_key_path: Some("/secrets/key.json".into()),
            ..Default::default()
        })
        .unwrap();
        Arc::new(RouterState::new(store, config))
    }

    #[tokio::test]
    async fn rate_limit_allows_up_to_the_window_cap() {
        let state = test_state();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..RATE_LIMIT_MAX_REQUESTS {
            assert!(check_rate_limit(&state, ip, 1_000).await);
        }
        assert!(!check_rate_limit(&state, ip, 1_000).await);
    }

    #[tokio::test]
    async fn rate_limit_resets_after_the_window_elapses() {
        let state = test_state();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..RATE_LIMIT_MAX_REQUESTS {
            assert!(check_rate_limit(&state, ip, 1_000).await);
        }
        assert!(check_rate_limit(&state, ip, 1_000 + RATE_LIMIT_WINDOW_SECS + 1).await);
    }

    #[tokio::test]
    async fn different_ips_have_independent_windows() {
        let state = test_state();
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();
        for _ in 0..RATE_LIMIT_MAX_REQUESTS {
            assert!(check_rate_limit(&state, a, 1_000).await);
        }
        assert!(check_rate_limit(&state, b, 1_000).await);
    }

    #[test]
    fn wildcard_cors_is_sent_when_configured_as_star() {
        let state = test_state();
        let headers = cors_headers(&state, None);
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }

    #[test]
    fn supported_methods_are_get_and_options() {
        assert_eq!(supported_methods(), &[Method::GET, Method::OPTIONS]);
    }
}
