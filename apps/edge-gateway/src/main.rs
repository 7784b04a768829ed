//! 边缘网关进程：串口传感器轮询 + MQTT 总线 + /health、/info。

mod handlers;
mod middleware;
mod routes;

use axum::middleware::from_fn;
use edge_bus::{
    BusClient, BusOptions, TOPIC_CONTAINER_CONFIG_UPDATED, TOPIC_DEVICE_CREATED,
    TOPIC_DEVICE_UPDATED,
};
use edge_config::AppConfig;
use edge_pipeline::ReadingPipeline;
use edge_polling::{
    BusStatusPublisher, DevicePoller, DeviceStatusTracker, OrchestratorSettings,
    PollingOrchestrator,
};
use edge_protocol::{PortPool, SerialSettings, TokioSerialOpener};
use edge_registry::{DeviceRegistry, JsonFileSource};
use edge_storage::{InMemoryContainerConfigStore, InMemoryIdentityStore, InMemoryReadingStore};
use edge_telemetry::init_tracing;
use handlers::backend::{ContainerConfigHandler, DeviceEventHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 单次补发的读数上限
const SYNC_BATCH_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<BusClient>,
    pub orchestrator: Arc<PollingOrchestrator>,
    pub registry: Arc<DeviceRegistry>,
    pub pool: Arc<PortPool>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    // 本地存储（设备身份、容器阈值、读数）
    let identities = Arc::new(InMemoryIdentityStore::new());
    let containers = Arc::new(InMemoryContainerConfigStore::new());
    let readings = Arc::new(InMemoryReadingStore::new());

    let bus = BusClient::new(BusOptions {
        host: config.mqtt.host.clone(),
        port: config.mqtt.port,
        client_id: config.mqtt.client_id.clone(),
        username: config.mqtt.username.clone(),
        password: config.mqtt.password.clone(),
        keep_alive: config.mqtt.keep_alive,
        reconnect_delay: config.mqtt.reconnect_delay,
        qos_subscribe: config.mqtt.qos_subscribe,
        qos_publish: config.mqtt.qos_publish,
    });

    let pipeline = Arc::new(ReadingPipeline::new(
        identities.clone(),
        containers.clone(),
        readings,
        bus.clone(),
    ));
    let registry = Arc::new(DeviceRegistry::new(Box::new(JsonFileSource::new(
        config.polling.devices_file.clone(),
    ))));
    let pool = Arc::new(PortPool::new(
        Arc::new(TokioSerialOpener),
        SerialSettings {
            baud_rate: config.serial.baud_rate,
            timeout: config.serial.timeout,
            write_timeout: config.serial.write_timeout,
            lease_timeout: config.serial.lease_timeout,
        },
    ));
    let tracker = Arc::new(DeviceStatusTracker::new(
        registry.clone(),
        identities.clone(),
        Arc::new(BusStatusPublisher::new(bus.clone())),
    ));
    let poller = Arc::new(DevicePoller::new(
        pool.clone(),
        pipeline.clone(),
        tracker,
        config.serial.timeout,
    ));
    let orchestrator = Arc::new(PollingOrchestrator::new(
        registry.clone(),
        poller,
        Some(identities.clone()),
        OrchestratorSettings {
            interval: config.polling.interval,
            reload_every_cycles: config.polling.reload_every_cycles,
            stop_timeout: config.polling.stop_timeout,
            error_backoff: config.polling.error_backoff,
        },
    ));

    // Backend → Edge 事件（连接成功后统一订阅）
    let device_events = Arc::new(DeviceEventHandler::new(identities.clone()));
    bus.subscribe(TOPIC_DEVICE_CREATED, device_events.clone()).await?;
    bus.subscribe(TOPIC_DEVICE_UPDATED, device_events).await?;
    bus.subscribe(
        TOPIC_CONTAINER_CONFIG_UPDATED,
        Arc::new(ContainerConfigHandler::new(containers, orchestrator.clone())),
    )
    .await?;
    bus.connect();

    orchestrator.start();
    let cancel = CancellationToken::new();
    let sync = spawn_sync_task(pipeline, config.polling.sync_interval, cancel.clone());

    let state = AppState {
        bus: bus.clone(),
        orchestrator: orchestrator.clone(),
        registry,
        pool: pool.clone(),
    };
    let app = routes::create_router()
        .with_state(state)
        .layer(from_fn(middleware::request_context));

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!(target: "edge.gateway", addr = %config.http_addr, "http_listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(target: "edge.gateway", "gateway_shutting_down");
    cancel.cancel();
    if let Err(err) = sync.await {
        error!(target: "edge.gateway", error = %err, "sync_task_join_failed");
    }
    orchestrator.stop().await;
    bus.disconnect().await;
    pool.close_all();
    info!(target: "edge.gateway", "gateway_stopped");
    Ok(())
}

/// 周期补发未同步的读数（总线断开期间积压的部分）。
fn spawn_sync_task(
    pipeline: Arc<ReadingPipeline>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    let synced = pipeline.sync_pending(SYNC_BATCH_LIMIT).await;
                    if synced > 0 {
                        info!(target: "edge.gateway", synced, "pending_readings_synced");
                    }
                }
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(target: "edge.gateway", error = %err, "shutdown_signal_failed");
    }
}
