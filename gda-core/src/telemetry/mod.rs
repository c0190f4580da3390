//! Host telemetry
//!
//! A [`TelemetrySource`] produces one scalar utilisation value on demand. The
//! [`SystemPerformanceCollector`] samples an ordered list of sources and
//! turns each round into a [`crate::data::SystemPerformanceData`] record.

mod collector;
mod sources;

pub use collector::SystemPerformanceCollector;
pub use sources::{CpuUtilSource, DiskUtilSource, MemUtilSource};

use serde::Serialize;

/// Which field of a system performance record a source fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    Cpu,
    Memory,
    Disk,
}

pub trait TelemetrySource: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> TelemetryKind;

    /// Current value in percent; negative when the value is unavailable
    fn produce_measurement(&self) -> f32;
}

/// The default CPU, memory and disk sources, in that order
pub fn default_sources() -> Vec<Box<dyn TelemetrySource>> {
    vec![
        Box::new(CpuUtilSource::new()),
        Box::new(MemUtilSource::new()),
        Box::new(DiskUtilSource::new()),
    ]
}
