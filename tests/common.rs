#![allow(dead_code, clippy::unwrap_used, clippy::panic, clippy::missing_panics_doc, clippy::must_use_candidate)]

use async_trait::async_trait;
use courier_server::api::{self, AppState};
use courier_server::config::{
    Config, EventsConfig, GatewayConfig, LogFormat, ServerConfig, SyncConfig, TelemetryConfig,
};
use courier_server::domain::connection::{Connection, ConnectionStatus};
use courier_server::error::{AppError, Result};
use courier_server::services::broadcast::Broadcaster;
use courier_server::services::gateway::{DeliveryReceipt, GatewayChat, GatewayClient, GatewayMessage};
use courier_server::services::ingest::IngestService;
use courier_server::services::send::SendService;
use courier_server::storage::{ConnectionStore, MemoryConnectionStore, MemoryMessageStore, MessageStore};
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message as TungsteniteMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn setup_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into())
            .add_directive("courier_server=debug".parse().unwrap())
            .add_directive("tower=warn".parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap())
            .add_directive("tungstenite=warn".parse().unwrap());

        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}

#[derive(Debug, Clone)]
pub enum SendBehavior {
    Succeed { gateway_id: Option<String> },
    Fail,
    Hang,
}

/// Scripted stand-in for the upstream gateway.
#[derive(Debug, Default)]
pub struct MockGateway {
    chats: Mutex<HashMap<String, Vec<GatewayChat>>>,
    messages: Mutex<HashMap<(String, String), Vec<GatewayMessage>>>,
    failing_chats: Mutex<HashSet<(String, String)>>,
    hanging_chats: Mutex<HashSet<(String, String)>>,
    failing_instances: Mutex<HashSet<String>>,
    send_behavior: Mutex<Option<SendBehavior>>,
    pub sent: Mutex<Vec<(String, String, String)>>,
    pub chat_list_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chat(&self, instance: &str, jid: &str, last_activity: i64) {
        self.chats.lock().unwrap().entry(instance.to_string()).or_default().push(GatewayChat {
            id: None,
            remote_jid: Some(jid.to_string()),
            last_activity: Some(last_activity),
        });
    }

    pub fn add_message(&self, instance: &str, jid: &str, message: GatewayMessage) {
        self.messages
            .lock()
            .unwrap()
            .entry((instance.to_string(), jid.to_string()))
            .or_default()
            .push(message);
    }

    pub fn fail_chat(&self, instance: &str, jid: &str) {
        self.failing_chats.lock().unwrap().insert((instance.to_string(), jid.to_string()));
    }

    pub fn hang_chat(&self, instance: &str, jid: &str) {
        self.hanging_chats.lock().unwrap().insert((instance.to_string(), jid.to_string()));
    }

    pub fn unhang_chat(&self, instance: &str, jid: &str) {
        self.hanging_chats.lock().unwrap().remove(&(instance.to_string(), jid.to_string()));
    }

    pub fn fail_instance(&self, instance: &str) {
        self.failing_instances.lock().unwrap().insert(instance.to_string());
    }

    pub fn set_send_behavior(&self, behavior: SendBehavior) {
        *self.send_behavior.lock().unwrap() = Some(behavior);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl GatewayClient for MockGateway {
    async fn send_message(&self, instance: &str, to: &str, body: &str) -> Result<DeliveryReceipt> {
        let behavior = self.send_behavior.lock().unwrap().clone();
        match behavior {
            None => {
                self.sent.lock().unwrap().push((instance.to_string(), to.to_string(), body.to_string()));
                Ok(DeliveryReceipt::default())
            }
            Some(SendBehavior::Succeed { gateway_id }) => {
                self.sent.lock().unwrap().push((instance.to_string(), to.to_string(), body.to_string()));
                Ok(DeliveryReceipt { gateway_id, timestamp: None })
            }
            Some(SendBehavior::Fail) => Err(AppError::Gateway("mock send failure".to_string())),
            Some(SendBehavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(DeliveryReceipt::default())
            }
        }
    }

    async fn list_recent_chats(&self, instance: &str) -> Result<Vec<GatewayChat>> {
        self.chat_list_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_instances.lock().unwrap().contains(instance) {
            return Err(AppError::Gateway("mock instance outage".to_string()));
        }
        Ok(self.chats.lock().unwrap().get(instance).cloned().unwrap_or_default())
    }

    async fn list_chat_messages(&self, instance: &str, chat_id: &str, limit: usize) -> Result<Vec<GatewayMessage>> {
        if self.hanging_chats.lock().unwrap().contains(&(instance.to_string(), chat_id.to_string())) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.failing_chats.lock().unwrap().contains(&(instance.to_string(), chat_id.to_string())) {
            return Err(AppError::Gateway("mock chat outage".to_string()));
        }
        let mut messages = self
            .messages
            .lock()
            .unwrap()
            .get(&(instance.to_string(), chat_id.to_string()))
            .cloned()
            .unwrap_or_default();
        messages.truncate(limit);
        Ok(messages)
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        server: ServerConfig { host: "127.0.0.1".to_string(), port: 0, mgmt_port: 0, shutdown_timeout_secs: 5 },
        gateway: GatewayConfig {
            base_url: "http://localhost:0".to_string(),
            api_key: String::new(),
            request_timeout_ms: 1000,
            send_timeout_ms: 200,
        },
        sync: SyncConfig {
            interval_secs: 3600,
            quiet_secs: 3600,
            sweep_budget_secs: 5,
            chat_limit: 10,
            message_limit: 20,
        },
        events: EventsConfig { channel_capacity: 64 },
        telemetry: TelemetryConfig { log_format: LogFormat::Text },
    }
}

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestApp {
    pub server_url: String,
    pub ws_url: String,
    pub client: reqwest::Client,
    pub store: Arc<dyn MessageStore>,
    pub connections: Arc<MemoryConnectionStore>,
    pub ingest: IngestService,
    pub broadcaster: Broadcaster,
    pub gateway: Arc<MockGateway>,
    shutdown_tx: watch::Sender<bool>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_config(test_config()).await
    }

    pub async fn spawn_with_config(config: Config) -> Self {
        setup_tracing();

        let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        let connections = Arc::new(MemoryConnectionStore::new());
        let gateway = Arc::new(MockGateway::new());
        let broadcaster = Broadcaster::new(config.events.channel_capacity);
        let ingest = IngestService::new(Arc::clone(&store), broadcaster.clone());
        let send_service = SendService::new(
            Arc::clone(&store),
            Arc::clone(&gateway) as Arc<dyn GatewayClient>,
            broadcaster.clone(),
            Duration::from_millis(config.gateway.send_timeout_ms),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = AppState {
            config,
            connections: Arc::clone(&connections) as Arc<dyn ConnectionStore>,
            store: Arc::clone(&store),
            ingest: ingest.clone(),
            send_service,
            shutdown_rx: shutdown_rx.clone(),
        };

        let router = api::app_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut server_rx = shutdown_rx;
        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move {
                    let _ = server_rx.wait_for(|&s| s).await;
                })
                .await
                .unwrap();
        });

        Self {
            server_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}/v1/events"),
            client: reqwest::Client::new(),
            store,
            connections,
            ingest,
            broadcaster,
            gateway,
            shutdown_tx,
        }
    }

    pub async fn add_connection(&self, instance: &str, status: ConnectionStatus) -> Connection {
        let connection = Connection {
            id: Uuid::new_v4(),
            label: format!("test {instance}"),
            instance: instance.to_string(),
            status,
        };
        self.connections.upsert(connection.clone()).await.unwrap();
        connection
    }

    pub async fn post_webhook(&self, envelope: &serde_json::Value) -> reqwest::Response {
        self.client.post(format!("{}/v1/webhook", self.server_url)).json(envelope).send().await.unwrap()
    }

    pub async fn fetch_history(&self, connection_id: Uuid, counterparty: &str) -> Vec<serde_json::Value> {
        self.client
            .get(format!("{}/v1/connections/{connection_id}/messages", self.server_url))
            .query(&[("counterparty", counterparty)])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    pub async fn connect_ws(&self) -> WsClient {
        let (stream, _) = tokio_tungstenite::connect_async(&self.ws_url).await.expect("ws connect failed");
        stream
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Receives the next JSON event from the stream, or panics after `timeout`.
pub async fn next_event(ws: &mut WsClient, timeout: Duration) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(timeout, ws.next())
            .await
            .expect("timed out waiting for ws event")
            .expect("ws stream ended")
            .expect("ws error");
        match msg {
            TungsteniteMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
            TungsteniteMessage::Ping(payload) => {
                let _ = ws.send(TungsteniteMessage::Pong(payload)).await;
            }
            _ => {}
        }
    }
}

/// Builds a `messages.upsert` webhook envelope in the gateway's shape.
pub fn upsert_envelope(
    instance: &str,
    jid: &str,
    from_me: bool,
    body: &str,
    timestamp: i64,
    gateway_id: Option<&str>,
) -> serde_json::Value {
    let mut key = serde_json::json!({ "remoteJid": jid, "fromMe": from_me });
    if let Some(id) = gateway_id {
        key["id"] = serde_json::Value::String(id.to_string());
    }
    serde_json::json!({
        "event": "messages.upsert",
        "instance": instance,
        "data": {
            "key": key,
            "message": { "conversation": body },
            "messageTimestamp": timestamp,
        }
    })
}
