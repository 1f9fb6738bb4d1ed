use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// WebSocket 关闭码（RFC 6455 §7.4）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloseCode(pub u16);

impl CloseCode {
    pub const NORMAL: Self = Self(1000);
    pub const GOING_AWAY: Self = Self(1001);
    /// 慢消费者被强制断开。
    pub const POLICY_VIOLATION: Self = Self(1008);
    /// handler 执行失败。
    pub const INTERNAL_ERROR: Self = Self(1011);
    /// 入站队列已满。
    pub const TRY_AGAIN_LATER: Self = Self(1013);

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

/// 连接关闭原因，随关闭帧一起发送给客户端。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReason {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(CloseCode::NORMAL, "")
    }

    pub fn going_away() -> Self {
        Self::new(CloseCode::GOING_AWAY, "")
    }

    pub fn handler_failed(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::INTERNAL_ERROR, reason)
    }

    pub fn slow_consumer() -> Self {
        Self::new(CloseCode::POLICY_VIOLATION, "send queue saturated")
    }

    pub fn inbound_overflow() -> Self {
        Self::new(CloseCode::TRY_AGAIN_LATER, "inbound queue saturated")
    }

    pub fn is_error(&self) -> bool {
        !matches!(self.code, CloseCode::NORMAL | CloseCode::GOING_AWAY)
    }
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code.0)
        } else {
            write!(f, "{} ({})", self.code.0, self.reason)
        }
    }
}
