//! 单次请求桥接：供无法保持长连接的适配层使用。
//!
//! 在请求路径上登记一个临时连接，执行 on-open，把请求体作为一条文本帧
//! 分发，收集该连接在处理期间收到的全部消息，最后关闭连接。

use std::sync::Arc;

use socketry_api_types::{ErrorResponse, HttpRequest, HttpResponse};
use socketry_core::CloseReason;
use tracing::{debug, warn};

use crate::connection::{Connection, Message, Outbound, OutboundReceiver};
use crate::dispatcher::InvocationOutcome;
use crate::error::RuntimeError;
use crate::runtime::Runtime;

#[tracing::instrument(skip(runtime, request), fields(method = %request.method, path = %request.path))]
pub async fn dispatch_http(runtime: &Runtime, request: HttpRequest) -> HttpResponse {
    let (descriptor, params) = match runtime.resolve(&request.path) {
        Ok(resolved) => resolved,
        Err(err) => return error_response(404, "endpoint_not_found", &err),
    };

    let connection = match runtime.registry().admit(&descriptor, params) {
        Ok(connection) => connection,
        Err(err) => return error_response(500, "admit_failed", &err),
    };
    let Some(mut outbound) = connection.take_outbound() else {
        runtime.on_disconnect(&connection).await;
        return error_response(500, "admit_failed", &"send queue already taken");
    };

    if let Err(err) = runtime.dispatcher().open(&connection).await {
        runtime
            .on_disconnect_with(&connection, CloseReason::handler_failed(err.to_string()))
            .await;
        return error_response(500, "handler_failed", &err);
    }

    let timeout = runtime.config().http_bridge_timeout();
    let exchanged = tokio::time::timeout(
        timeout,
        exchange(runtime, &connection, &mut outbound, request.body),
    )
    .await;

    let response = match exchanged {
        Err(_) => {
            warn!(connection_id = %connection.id(), ?timeout, "http bridge timed out");
            runtime
                .on_disconnect_with(&connection, CloseReason::going_away())
                .await;
            return error_response(504, "timeout", &"handler did not complete in time");
        }
        Ok(Err(err)) => error_response(500, "handler_failed", &err),
        Ok(Ok(mut replies)) => {
            while let Ok(message) = outbound.try_recv() {
                replies.push(message);
            }
            replies_response(&replies)
        }
    };

    runtime.on_disconnect(&connection).await;
    debug!(status = response.status, "http bridge completed");
    response
}

/// 分发请求体并在等待结果的同时收集出站消息，避免阻塞在满队列上。
async fn exchange(
    runtime: &Runtime,
    connection: &Arc<Connection>,
    outbound: &mut OutboundReceiver,
    body: String,
) -> Result<Vec<Outbound>, RuntimeError> {
    let mut replies = Vec::new();
    if body.is_empty() {
        return Ok(replies);
    }

    let outcome = runtime
        .on_frame(connection, Message::Text(body))?
        .outcome();
    tokio::pin!(outcome);
    let outcome = loop {
        tokio::select! {
            outcome = &mut outcome => break outcome,
            Some(message) = outbound.recv() => replies.push(message),
        }
    };

    match outcome {
        InvocationOutcome::Completed => Ok(replies),
        InvocationOutcome::Failed(message) => Err(RuntimeError::HandlerInvocation {
            connection_id: connection.id(),
            message,
        }),
        InvocationOutcome::Cancelled => Err(RuntimeError::ConnectionClosed(connection.id())),
    }
}

fn replies_response(replies: &[Outbound]) -> HttpResponse {
    let bodies: Vec<String> = replies
        .iter()
        .map(|message| match message.as_ref() {
            Message::Text(text) => text.clone(),
            Message::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        })
        .collect();
    match serde_json::to_string(&bodies) {
        Ok(body) => HttpResponse::json(200, body),
        Err(err) => error_response(500, "serialize_failed", &err),
    }
}

fn error_response(status: u16, code: &str, err: &dyn std::fmt::Display) -> HttpResponse {
    let payload = ErrorResponse::new(code, err.to_string());
    let body = serde_json::to_string(&payload).unwrap_or_default();
    HttpResponse::json(status, body)
}
