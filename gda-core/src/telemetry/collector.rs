use super::{TelemetryKind, TelemetrySource};
use crate::data::SystemPerformanceData;
use crate::listeners::DataMessageListener;
use crate::resources::ResourceName;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

struct Sampler {
    name: String,
    sources: Vec<Box<dyn TelemetrySource>>,
    listener: Arc<dyn DataMessageListener>,
}

impl Sampler {
    fn collect(&self) -> SystemPerformanceData {
        let mut data = SystemPerformanceData {
            name: self.name.clone(),
            timestamp: Utc::now(),
            ..Default::default()
        };

        // later sources of the same kind overwrite earlier ones
        for source in &self.sources {
            let value = source.produce_measurement();
            match source.kind() {
                TelemetryKind::Cpu => data.cpu_util = value,
                TelemetryKind::Memory => data.mem_util = value,
                TelemetryKind::Disk => data.disk_util = value,
            }
        }
        data
    }

    async fn collect_and_publish(&self) -> bool {
        let data = self.collect();
        debug!(
            "System performance: cpu = {}, mem = {}, disk = {}",
            data.cpu_util, data.mem_util, data.disk_util
        );
        self.listener
            .handle_system_performance_message(ResourceName::GDA_SYSTEM_PERF_MSG_RESOURCE, Some(data))
            .await
    }
}

struct CollectorTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodically samples its telemetry sources and reports the result as a
/// gateway system performance message
pub struct SystemPerformanceCollector {
    sampler: Arc<Sampler>,
    poll_cycle: Duration,
    task: Mutex<Option<CollectorTask>>,
}

impl SystemPerformanceCollector {
    pub fn new(
        sources: Vec<Box<dyn TelemetrySource>>,
        listener: Arc<dyn DataMessageListener>,
        poll_cycle: Duration,
    ) -> Self {
        Self {
            sampler: Arc::new(Sampler {
                name: "GatewaySystemPerformance".to_string(),
                sources,
                listener,
            }),
            poll_cycle: poll_cycle.max(Duration::from_secs(1)),
            task: Mutex::new(None),
        }
    }

    pub fn poll_cycle(&self) -> Duration {
        self.poll_cycle
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Samples every source once without reporting
    pub fn collect_once(&self) -> SystemPerformanceData {
        self.sampler.collect()
    }

    /// Samples every source once and reports the record
    pub async fn publish_once(&self) -> bool {
        self.sampler.collect_and_publish().await
    }

    /// Spawns the periodic task; the first round runs immediately
    pub fn start_collector(&self) -> bool {
        let mut slot = self.task.lock();
        if slot.is_some() {
            warn!("System performance collector already running");
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let sampler = self.sampler.clone();
        let poll_cycle = self.poll_cycle;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_cycle);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if !sampler.collect_and_publish().await {
                            warn!("System performance record was not accepted");
                        }
                    }
                }
            }
        });

        info!("System performance collector started (poll cycle {:?})", poll_cycle);
        *slot = Some(CollectorTask { shutdown, handle });
        true
    }

    pub async fn stop_collector(&self) -> bool {
        let Some(task) = self.task.lock().take() else {
            warn!("System performance collector not running");
            return false;
        };

        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            warn!("System performance collector ended abnormally: {}", e);
        }
        info!("System performance collector stopped");
        true
    }
}
