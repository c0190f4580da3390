//! Logging stand-in for the upstream bridge and the persistence store

use async_trait::async_trait;
use gda_core::{ActuatorData, PersistenceSink, ResourceName, SensorData, SystemPerformanceData, UpstreamListener};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Debug, Default)]
pub struct LoggingSink {
    forwarded: AtomicU64,
    stored: AtomicU64,
}

impl LoggingSink {
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl UpstreamListener for LoggingSink {
    async fn on_sensor_data(&self, resource: ResourceName, data: &SensorData) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        info!("[upstream] {} {} = {} ({})", resource, data.name, data.value, data.location_id);
    }

    async fn on_system_performance_data(&self, resource: ResourceName, data: &SystemPerformanceData) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        info!(
            "[upstream] {} cpu = {:.1}, mem = {:.1}, disk = {:.1}",
            resource, data.cpu_util, data.mem_util, data.disk_util
        );
    }

    async fn on_actuator_response(&self, resource: ResourceName, data: &ActuatorData) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        info!(
            "[upstream] {} {} status = {} (error = {})",
            resource, data.name, data.status_code, data.has_error
        );
    }
}

#[async_trait]
impl PersistenceSink for LoggingSink {
    async fn store_sensor_data(&self, _resource: ResourceName, _data: &SensorData) -> bool {
        self.stored.fetch_add(1, Ordering::Relaxed);
        true
    }

    async fn store_system_performance_data(&self, _resource: ResourceName, _data: &SystemPerformanceData) -> bool {
        self.stored.fetch_add(1, Ordering::Relaxed);
        true
    }

    async fn store_actuator_data(&self, _resource: ResourceName, _data: &ActuatorData) -> bool {
        self.stored.fetch_add(1, Ordering::Relaxed);
        true
    }
}
