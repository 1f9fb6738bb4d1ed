//! Shared request/response types used by API-facing crates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
    #[serde(default)]
    pub open_connections: usize,
    #[serde(default)]
    pub delivery: DeliveryCounters,
}

impl HealthCheckResponse {
    #[must_use]
    pub fn ok(open_connections: usize) -> Self {
        Self {
            status: "ok".to_string(),
            open_connections,
            delivery: DeliveryCounters::default(),
        }
    }

    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliveryCounters) -> Self {
        self.delivery = delivery;
        self
    }
}

/// Outbound delivery totals since the runtime started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCounters {
    pub delivered: u64,
    /// Messages discarded under the drop backpressure policy.
    pub dropped: u64,
    /// Connections closed because they could not keep up.
    pub forced_closes: u64,
}

/// Convenience alias for handlers that prefer a shorter type name.
pub type HealthResponse = HealthCheckResponse;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A single HTTP-shaped request handed over by adapters that cannot hold a
/// persistent socket (cloud functions and the like).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl HttpRequest {
    #[must_use]
    pub fn post(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            path: path.into(),
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub const CONTENT_TYPE: &'static str = "content-type";

    #[must_use]
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(Self::CONTENT_TYPE.to_string(), "application/json".to_string());
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
