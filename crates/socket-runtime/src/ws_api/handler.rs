use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use socketry_api_types::ErrorResponse;
use socketry_core::{CloseReason, PathParams};
use tracing::{debug, info, warn};

use super::adapter::{close_frame, from_ws_message, to_ws_message};
use crate::endpoint::EndpointDescriptor;
use crate::runtime::Runtime;

/// Axum WebSocket 升级 handler；未注册的路径在升级前返回 404。
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    uri: Uri,
    State(runtime): State<Arc<Runtime>>,
) -> Response {
    let (descriptor, params) = match runtime.resolve(uri.path()) {
        Ok(resolved) => resolved,
        Err(err) => {
            debug!(path = uri.path(), "rejecting upgrade for unknown endpoint");
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("endpoint_not_found", err.to_string())),
            )
                .into_response();
        }
    };

    info!(path = uri.path(), "new WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, runtime, descriptor, params))
}

async fn handle_socket(
    mut socket: WebSocket,
    runtime: Arc<Runtime>,
    descriptor: Arc<EndpointDescriptor>,
    params: PathParams,
) {
    let connection = match runtime.accept_resolved(&descriptor, params).await {
        Ok(connection) => connection,
        Err(err) => {
            warn!(error = %err, "failed to accept WebSocket connection");
            let frame = close_frame(&CloseReason::handler_failed(err.to_string()));
            let _ = socket.send(WsMessage::Close(Some(frame))).await;
            return;
        }
    };
    let Some(mut outbound) = connection.take_outbound() else {
        runtime.on_disconnect(&connection).await;
        return;
    };
    let connection_id = connection.id();
    info!(%connection_id, path = connection.path(), "WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();

    let writer_connection = Arc::clone(&connection);
    let writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = writer_connection.closed() => break,
                message = outbound.recv() => match message {
                    Some(message) => {
                        if sender.send(to_ws_message(&message)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        let reason = writer_connection
            .close_reason()
            .unwrap_or_else(CloseReason::normal);
        let _ = sender.send(WsMessage::Close(Some(close_frame(&reason)))).await;
    });

    loop {
        let frame = tokio::select! {
            biased;
            _ = connection.closed() => break,
            frame = receiver.next() => frame,
        };
        match frame {
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(frame)) => {
                let Some(message) = from_ws_message(frame) else {
                    continue;
                };
                if let Err(err) = runtime.on_frame(&connection, message) {
                    debug!(%connection_id, error = %err, "inbound frame rejected");
                }
            }
            Some(Err(err)) => {
                warn!(%connection_id, error = %err, "WebSocket receive error");
                break;
            }
        }
    }

    runtime.on_disconnect(&connection).await;
    if let Err(err) = writer_task.await {
        warn!(error = %err, "WebSocket writer task exited with join error");
    }

    info!(%connection_id, "WebSocket connection closed");
}
