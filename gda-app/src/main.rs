//! Gateway Device Application
//!
//! Bridges constrained devices and upstream services:
//! - MQTT connector subscribed to the device channels
//! - Message router dispatching decoded device traffic
//! - Local system performance collection
//!
//! Runs until Ctrl-C. Exits with code 1 if the router cannot start.

mod sink;

use anyhow::{Context, Result};
use gda_core::config::{ConfigSource, GatewayDeviceConfig, MemoryConfigSource, MqttConnectorConfig, TomlConfigSource};
use gda_core::telemetry::default_sources;
use gda_core::{
    DataCodec, MessageRouter, MqttClientConnector, PubSubClient, PublishingActuatorExecutor, ResourceName,
    SystemPerformanceCollector, DEVICE_SUBSCRIPTIONS,
};
use sink::LoggingSink;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "gda.toml";

fn load_config() -> Result<Box<dyn ConfigSource>> {
    let path = std::env::var("GDA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    if Path::new(&path).exists() {
        let source = TomlConfigSource::load(&path).with_context(|| format!("Failed to load config from {}", path))?;
        info!("Loaded configuration from {}", path);
        Ok(Box::new(source))
    } else {
        warn!("Config file {} not found, using defaults", path);
        Ok(Box::new(MemoryConfigSource::new()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gda_core=info,gda_app=info")),
        )
        .init();

    info!("Initializing Gateway Device Application v{}", env!("CARGO_PKG_VERSION"));

    let source = load_config()?;
    let device_config = GatewayDeviceConfig::from_source(source.as_ref());
    let mqtt_config = MqttConnectorConfig::from_source(source.as_ref());

    let codec = DataCodec::new();
    let mut router = MessageRouter::new(codec, device_config.default_qos);

    let mqtt_client: Option<Arc<dyn PubSubClient>> = if device_config.enable_mqtt_client {
        let client: Arc<dyn PubSubClient> = Arc::new(MqttClientConnector::new(mqtt_config.clone()));
        router.add_connector(client.clone(), DEVICE_SUBSCRIPTIONS.to_vec(), true);
        Some(client)
    } else {
        info!("MQTT client disabled");
        None
    };

    let sink = Arc::new(LoggingSink::default());
    router.set_upstream_listener(sink.clone());
    router.set_persistence_sink(sink.clone());

    if let Some(client) = &mqtt_client {
        let executor = PublishingActuatorExecutor::new(client.clone(), codec, mqtt_config.default_qos);
        router.set_actuator_data_listener(ResourceName::CDA_ACTUATOR_CMD_RESOURCE, Arc::new(executor));
    }

    let router = Arc::new(router);

    let collector = if device_config.enable_system_performance {
        Some(SystemPerformanceCollector::new(
            default_sources(),
            router.clone(),
            device_config.poll_cycle,
        ))
    } else {
        info!("System performance collection disabled");
        None
    };

    if let Err(e) = router.start_manager().await {
        error!("Failed to start message router: {}", e);
        std::process::exit(1);
    }

    if let Some(collector) = &collector {
        collector.start_collector();
    }

    info!("Gateway Device Application running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    if let Some(collector) = &collector {
        collector.stop_collector().await;
    }
    if let Err(e) = router.stop_manager().await {
        warn!("Message router did not stop cleanly: {}", e);
    }

    info!(
        "Gateway Device Application stopped ({} messages forwarded, {} stored)",
        sink.forwarded(),
        sink.stored()
    );
    Ok(())
}
