use serde::{Deserialize, Serialize};

/// 单个连接上入站消息的执行模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// 串行处理，保证到达顺序。
    #[default]
    Serial,
    /// 并发处理，不保证顺序。
    Concurrent,
}

impl ExecutionMode {
    pub fn is_serial(self) -> bool {
        matches!(self, Self::Serial)
    }
}
