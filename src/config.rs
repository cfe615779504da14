use clap::{Args, Parser, ValueEnum};

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Database connection URL
    #[arg(long, env = "COURIER_DATABASE_URL")]
    pub database_url: String,

    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub gateway: GatewayConfig,

    #[command(flatten)]
    pub sync: SyncConfig,

    #[command(flatten)]
    pub events: EventsConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host to listen on
    #[arg(long, env = "COURIER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "COURIER_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Port for the management server (liveness/readiness)
    #[arg(long, env = "COURIER_MGMT_PORT", default_value_t = 3001)]
    pub mgmt_port: u16,

    /// Seconds to wait for background tasks during shutdown
    #[arg(long, env = "COURIER_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct GatewayConfig {
    /// Base URL of the upstream WhatsApp gateway
    #[arg(long, env = "COURIER_GATEWAY_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// API key sent with every gateway request
    #[arg(long, env = "COURIER_GATEWAY_API_KEY", default_value = "")]
    pub api_key: String,

    /// Per-request timeout for gateway calls, in milliseconds
    #[arg(long, env = "COURIER_GATEWAY_TIMEOUT_MS", default_value_t = 5000)]
    pub request_timeout_ms: u64,

    /// Timeout for an outbound send before the message is marked failed
    #[arg(long, env = "COURIER_SEND_TIMEOUT_MS", default_value_t = 10_000)]
    pub send_timeout_ms: u64,
}

#[derive(Clone, Debug, Args)]
pub struct SyncConfig {
    /// How often the poll synchronizer wakes up
    #[arg(long, env = "COURIER_SYNC_INTERVAL_SECS", default_value_t = 5)]
    pub interval_secs: u64,

    /// Minimum quiet period between two sweeps of the same connection
    #[arg(long, env = "COURIER_SYNC_QUIET_SECS", default_value_t = 3)]
    pub quiet_secs: u64,

    /// Upper bound on one sweep before it is abandoned for the cycle
    #[arg(long, env = "COURIER_SYNC_BUDGET_SECS", default_value_t = 30)]
    pub sweep_budget_secs: u64,

    /// Most-recently-active chats examined per sweep
    #[arg(long, env = "COURIER_SYNC_CHAT_LIMIT", default_value_t = 10)]
    pub chat_limit: usize,

    /// Most-recent messages fetched per chat
    #[arg(long, env = "COURIER_SYNC_MESSAGE_LIMIT", default_value_t = 20)]
    pub message_limit: usize,
}

#[derive(Clone, Debug, Args)]
pub struct EventsConfig {
    /// Capacity of the realtime broadcast channel
    #[arg(long, env = "COURIER_EVENTS_CAPACITY", default_value_t = 256)]
    pub channel_capacity: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryConfig {
    /// Log output format
    #[arg(long, env = "COURIER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}
