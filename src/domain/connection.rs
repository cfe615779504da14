use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One gateway session/account. Its status gates whether the poll
/// synchronizer sweeps it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub label: String,
    /// Instance name the upstream gateway knows this session by.
    pub instance: String,
    pub status: ConnectionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    WaitingQr,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::WaitingQr => "waiting_qr",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "waiting_qr" => Self::WaitingQr,
            "connecting" => Self::Connecting,
            "connected" => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}
