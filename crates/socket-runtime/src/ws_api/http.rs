use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use socketry_api_types::{HealthCheckResponse, HttpRequest};
use tracing::warn;

use crate::runtime::Runtime;

/// 单次 HTTP 请求转发路由的前缀。
pub const HTTP_BRIDGE_PREFIX: &str = "/http";

pub async fn health_handler(State(runtime): State<Arc<Runtime>>) -> Json<HealthCheckResponse> {
    let delivery = runtime.broadcaster().stats().into();
    Json(HealthCheckResponse::ok(runtime.registry().len()).with_delivery(delivery))
}

/// 将 `/http/<endpoint path>` 请求交给单次桥接。
pub async fn http_bridge_handler(
    State(runtime): State<Arc<Runtime>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let path = uri
        .path()
        .strip_prefix(HTTP_BRIDGE_PREFIX)
        .unwrap_or(uri.path())
        .to_string();
    let headers: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    let request = HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    };
    let response = runtime.dispatch_http(request).await;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut out = (status, response.body).into_response();
    for (name, value) in &response.headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                out.headers_mut().insert(name, value);
            }
            _ => warn!(header = %name, "dropping invalid response header"),
        }
    }
    out
}
