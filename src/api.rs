//! Read-only HTTP API over the pool.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ApiServerConfig;
use crate::pool::{ProxyStore, StoreError};

#[derive(Clone)]
struct AppState {
    store: Arc<dyn ProxyStore>,
    token: String,
}

#[derive(Serialize)]
struct ProxyResponse {
    code: u16,
    message: String,
    data: Vec<String>,
    count: usize,
    total: usize,
}

#[derive(Serialize)]
struct StatusResponse {
    code: u16,
    message: String,
    total: usize,
    timestamp: i64,
}

#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    message: String,
}

pub async fn serve(store: Arc<dyn ProxyStore>, cfg: ApiServerConfig) -> anyhow::Result<()> {
    let state = AppState {
        store,
        token: cfg.token,
    };
    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();

    let make_svc = make_service_fn(move |_| {
        let state = state.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let state = state.clone();
                async move { handle(req, state).await }
            }))
        }
    });

    info!(%addr, "api server listening");
    hyper::Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}

async fn handle(req: Request<Body>, state: AppState) -> Result<Response<Body>, hyper::Error> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let res = route(req, state).await;
    debug!(%method, %path, elapsed = ?started.elapsed(), "api request");
    res
}

async fn route(req: Request<Body>, state: AppState) -> Result<Response<Body>, hyper::Error> {
    let query = parse_query(&req);
    let path = req.uri().path();

    // auth gates every api path before any method handling
    if matches!(path, "/api/proxies" | "/api/status") {
        if let Some(resp) = check_token(&query, &state) {
            return Ok(resp);
        }
    }

    match (req.method(), path) {
        (&Method::GET, "/api/proxies") => handle_proxies(&query, &state).await,
        (&Method::GET, "/api/status") => handle_status(&state).await,
        (_, "/api/proxies" | "/api/status") => Ok(error(405, "only GET is supported")),
        _ => Ok(error(404, "not found")),
    }
}

fn parse_query(req: &Request<Body>) -> HashMap<String, String> {
    req.uri()
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

fn check_token(query: &HashMap<String, String>, state: &AppState) -> Option<Response<Body>> {
    match query.get("token") {
        None => Some(error(401, "missing token")),
        Some(token) if *token != state.token => Some(error(401, "invalid token")),
        Some(_) => None,
    }
}

async fn handle_proxies(
    query: &HashMap<String, String>,
    state: &AppState,
) -> Result<Response<Body>, hyper::Error> {
    let mut count = 10usize;
    if let Some(raw) = query.get("count") {
        match raw.parse::<usize>() {
            Ok(n) if (1..=100).contains(&n) => count = n,
            _ => return Ok(error(400, "count must be an integer between 1 and 100")),
        }
    }
    let proxy_type = query.get("type").map(String::as_str).unwrap_or("");

    let total = match state.store.len().await {
        Ok(total) => total,
        Err(e) => return Ok(store_error(&e)),
    };
    if total == 0 {
        return Ok(json(&ProxyResponse {
            code: 200,
            message: "ok, pool is empty".into(),
            data: Vec::new(),
            count: 0,
            total: 0,
        }));
    }
    if total < count {
        count = total.min(100);
    }

    let mut data = Vec::with_capacity(count);
    let max_attempts = count * 3;
    let mut attempts = 0usize;
    while data.len() < count && attempts < max_attempts {
        let proxy = match state.store.get_next().await {
            Ok(proxy) => proxy,
            Err(_) => break,
        };
        attempts += 1;
        if !proxy_type.is_empty() && !proxy.starts_with(&format!("{proxy_type}://")) {
            continue;
        }
        data.push(proxy);
    }

    let count = data.len();
    Ok(json(&ProxyResponse {
        code: 200,
        message: "ok".into(),
        data,
        count,
        total,
    }))
}

async fn handle_status(state: &AppState) -> Result<Response<Body>, hyper::Error> {
    match state.store.len().await {
        Ok(total) => Ok(json(&StatusResponse {
            code: 200,
            message: "ok".into(),
            total,
            timestamp: chrono::Utc::now().timestamp(),
        })),
        Err(e) => Ok(store_error(&e)),
    }
}

fn store_error(e: &StoreError) -> Response<Body> {
    debug!(error = %e, "pool read failed");
    error(500, "failed to read proxy pool")
}

fn json<T: Serialize>(data: &T) -> Response<Body> {
    let body = serde_json::to_string(data).unwrap();
    Response::builder()
        .header("Content-Type", "application/json; charset=utf-8")
        .body(Body::from(body))
        .unwrap()
}

fn error(code: u16, message: &str) -> Response<Body> {
    let body = serde_json::to_string(&ErrorResponse {
        code,
        message: message.to_string(),
    })
    .unwrap();
    Response::builder()
        .status(StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header("Content-Type", "application/json; charset=utf-8")
        .body(Body::from(body))
        .unwrap()
}
