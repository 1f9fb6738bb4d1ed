/// 连接生命周期状态。
///
/// 状态只会单向推进：`Connecting -> Open -> Closing -> Closed`，
/// 其中 `Connecting` 可以直接进入 `Closing`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// 是否仍可作为投递目标。
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// 是否已进入关闭流程（含已关闭）。
    pub fn is_closing_or_closed(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}
