//! Inbound webhook calls for both lifecycles.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use nodes::HttpMethod;
use webhooks::{WebhookError, WebhookRequest, WebhookScope};

use crate::{ApiError, AppState};

pub async fn production(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    dispatch(WebhookScope::Production, &state, method, path, query, headers, body).await
}

pub async fn test(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    dispatch(WebhookScope::Test, &state, method, path, query, headers, body).await
}

async fn dispatch(
    scope: WebhookScope,
    state: &AppState,
    method: Method,
    path: String,
    query: BTreeMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let registry = match scope {
        WebhookScope::Production => state.active.registry(),
        WebhookScope::Test => state.tests.registry(),
    };

    if method == Method::OPTIONS {
        let methods = registry.find_methods(scope, &path);
        if methods.is_empty() {
            return Err(WebhookError::NotRegistered { method: HttpMethod::Options, path }.into());
        }
        let mut allow: Vec<&str> = methods.iter().map(HttpMethod::as_str).collect();
        allow.push("OPTIONS");
        return Ok((StatusCode::NO_CONTENT, [(header::ALLOW, allow.join(", "))]).into_response());
    }

    let method: HttpMethod = method
        .as_str()
        .parse()
        .map_err(|e: String| ApiError::new(StatusCode::METHOD_NOT_ALLOWED, e))?;

    let request = WebhookRequest {
        method,
        path,
        headers: headers
            .iter()
            .map(|(k, v)| (k.as_str().to_owned(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect(),
        query,
        body: parse_body(&body),
    };

    let response = match scope {
        WebhookScope::Production => state.active.execute_webhook(request).await?,
        WebhookScope::Test => state.tests.execute_webhook(request).await?,
    };
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    Ok((status, Json(response.body)).into_response())
}

/// JSON when it parses, the raw text otherwise.
fn parse_body(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}
