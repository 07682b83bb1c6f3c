//! orderq - Main Entry Point
//! Order entry point (JSON-RPC) + delivery workers + lease recovery

mod config;
mod logging;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use config::DaemonConfig;
use orderq_api_rpc::{RpcHandler, RpcServer, RpcServerConfig};
use orderq_core::application::{
    shutdown_channel, spawn_workers, BrokerClient, BrokerClientConfig, LeaseRecovery,
    OrderProducer, OrderValidator, RedeliveryPolicy,
};
use orderq_core::domain::Order;
use orderq_core::port::id_provider::UuidProvider;
use orderq_core::port::time_provider::SystemTimeProvider;
use orderq_infra_sqlite::{create_pool, database_url, run_migrations, SqliteMessageStore};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config = DaemonConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    // 2. Initialize logging
    let _log_guard = logging::init(config.log_format, config.log_dir.as_deref());

    info!("orderq v{} starting...", VERSION);
    info!(
        main_queue = %config.destinations.main,
        dlq = %config.destinations.dead_letter,
        max_redeliveries = config.max_redeliveries,
        workers = config.workers,
        "Configuration loaded"
    );

    // 3. Initialize database
    if let Some(parent) = config.db_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| anyhow::anyhow!("Cannot create {}: {}", parent.display(), e))?;
    }
    info!(db_path = %config.db_path.display(), "Initializing database...");

    let pool = create_pool(&database_url(&config.db_path))
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let store = Arc::new(SqliteMessageStore::new(pool.clone()));
    let policy = Arc::new(RedeliveryPolicy::new(
        config.max_redeliveries,
        config.redelivery_delay(),
    ));
    let broker = Arc::new(BrokerClient::new(
        store,
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
        policy,
        BrokerClientConfig {
            dead_letter_destination: config.destinations.dead_letter.clone(),
            lease_ms: config.lease_ms,
        },
    ));
    let producer = Arc::new(OrderProducer::new(
        broker.clone(),
        config.destinations.main.clone(),
    ));

    // 5. Recover deliveries abandoned by a previous run
    let recovery = Arc::new(LeaseRecovery::new(broker.clone(), None));
    match recovery.recover_expired().await {
        Ok(count) => info!(recovered = count, "Startup lease recovery completed"),
        Err(e) => error!(error = %e, "Startup lease recovery failed"),
    }

    // 6. Subscribe the order validator and start workers per subscription
    broker.subscribe_typed::<Order, _>(config.destinations.main.clone(), OrderValidator::new());

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let worker_handles: Vec<_> = broker
        .subscriptions()
        .into_iter()
        .flat_map(|subscription| {
            spawn_workers(broker.clone(), subscription, config.workers, &shutdown_tx)
        })
        .collect();

    let recovery_handle = {
        let recovery = recovery.clone();
        tokio::spawn(async move { recovery.run(shutdown_rx).await })
    };

    // 7. Start JSON-RPC server
    let handler = Arc::new(RpcHandler::new(
        producer,
        broker.clone(),
        config.destinations.clone(),
    ));
    let rpc_config = RpcServerConfig {
        host: config.rpc_host.clone(),
        port: config.rpc_port,
    };
    let (rpc_addr, rpc_handle) = RpcServer::new(rpc_config, handler)
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(rpc_addr = %rpc_addr, "System ready. Waiting for orders...");
    info!("Press Ctrl+C to shutdown");

    // 8. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 9. Graceful shutdown: stop intake, let in-flight deliveries settle
    shutdown_tx.shutdown();
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(worker_handles)).await {
        Ok(results) => {
            for result in results {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(error = %e, "Worker exited with error"),
                    Err(e) => error!(error = %e, "Worker task failed"),
                }
            }
        }
        Err(_) => warn!("Workers did not stop within {:?}", SHUTDOWN_TIMEOUT),
    }
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, recovery_handle).await;

    pool.close().await;
    info!("Shutdown complete.");

    Ok(())
}
