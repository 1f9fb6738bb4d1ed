use axum::extract::ws::{CloseFrame, Message as WsMessage};
use socketry_core::CloseReason;

use crate::connection::Message;

/// 关闭帧 reason 的协议上限（字节）。
const MAX_CLOSE_REASON_BYTES: usize = 123;

/// 将出站消息转换为 axum WebSocket 帧。
pub fn to_ws_message(message: &Message) -> WsMessage {
    match message {
        Message::Text(text) => WsMessage::Text(text.clone().into()),
        Message::Binary(bytes) => WsMessage::Binary(bytes.clone().into()),
    }
}

/// 将入站帧转换为运行时消息；控制帧返回 `None`。
pub fn from_ws_message(message: WsMessage) -> Option<Message> {
    match message {
        WsMessage::Text(text) => Some(Message::Text(text.to_string())),
        WsMessage::Binary(bytes) => Some(Message::Binary(bytes.to_vec())),
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) => None,
    }
}

pub fn close_frame(reason: &CloseReason) -> CloseFrame {
    CloseFrame {
        code: reason.code.as_u16(),
        reason: truncate_reason(&reason.reason).into(),
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON_BYTES {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}
