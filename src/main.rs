#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

use courier_server::api::{AppState, MgmtState};
use courier_server::config::Config;
use courier_server::services::broadcast::Broadcaster;
use courier_server::services::gateway::{GatewayClient, HttpGatewayClient};
use courier_server::services::ingest::IngestService;
use courier_server::services::send::SendService;
use courier_server::storage::{ConnectionStore, MessageStore, PgConnectionStore, PgMessageStore};
use courier_server::workers::PollSyncWorker;
use courier_server::{api, storage, telemetry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    telemetry::init_telemetry(&config.telemetry)?;

    let boot_span = tracing::info_span!("boot_server");
    let (api_listener, mgmt_listener, app_router, mgmt_app, shutdown_tx, shutdown_rx, sync_worker) = async {
        // Phase 1: Infrastructure
        let pool = storage::init_pool(&config.database_url).await?;
        storage::run_migrations(&pool).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        spawn_signal_handler(shutdown_tx.clone());

        // Phase 2: Component wiring
        let store: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(pool.clone()));
        let connections: Arc<dyn ConnectionStore> = Arc::new(PgConnectionStore::new(pool));
        let broadcaster = Broadcaster::new(config.events.channel_capacity);
        let gateway: Arc<dyn GatewayClient> = Arc::new(HttpGatewayClient::new(
            &config.gateway.base_url,
            &config.gateway.api_key,
            Duration::from_millis(config.gateway.request_timeout_ms),
        )?);

        let ingest = IngestService::new(Arc::clone(&store), broadcaster.clone());
        let send_service = SendService::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            broadcaster,
            Duration::from_millis(config.gateway.send_timeout_ms),
        );
        let sync_worker =
            PollSyncWorker::new(Arc::clone(&connections), gateway, ingest.clone(), config.sync.clone());

        // Phase 3: Listeners and routers
        let state = AppState {
            config: config.clone(),
            connections,
            store: Arc::clone(&store),
            ingest,
            send_service,
            shutdown_rx: shutdown_rx.clone(),
        };
        let app_router = api::app_router(state);
        let mgmt_app = api::mgmt_router(MgmtState { store });

        let api_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
        let mgmt_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.mgmt_port).parse()?;

        tracing::info!(address = %api_addr, "listening");
        tracing::info!(address = %mgmt_addr, "management server listening");

        let api_listener = tokio::net::TcpListener::bind(api_addr).await?;
        let mgmt_listener = tokio::net::TcpListener::bind(mgmt_addr).await?;

        Ok::<_, anyhow::Error>((
            api_listener,
            mgmt_listener,
            app_router,
            mgmt_app,
            shutdown_tx,
            shutdown_rx,
            sync_worker,
        ))
    }
    .instrument(boot_span)
    .await?;

    // Phase 4: Runtime
    let worker_task = tokio::spawn(sync_worker.run(shutdown_rx.clone()));

    let mut api_rx = shutdown_rx.clone();
    let api_server = axum::serve(api_listener, app_router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = api_rx.wait_for(|&s| s).await;
        });

    let mut mgmt_rx = shutdown_rx.clone();
    let mgmt_server = axum::serve(mgmt_listener, mgmt_app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = mgmt_rx.wait_for(|&s| s).await;
        });

    if let Err(e) = tokio::try_join!(api_server, mgmt_server) {
        tracing::error!(error = %e, "Server error");
    }

    // Phase 5: Graceful shutdown
    let _ = shutdown_tx.send(true);
    tokio::select! {
        _ = worker_task => {
            tracing::info!("Background tasks finished.");
        }
        () = tokio::time::sleep(Duration::from_secs(config.server.shutdown_timeout_secs)) => {
            tracing::warn!("Timeout waiting for background tasks to finish.");
        }
    }

    Ok(())
}

fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
}
