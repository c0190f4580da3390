use super::{TelemetryKind, TelemetrySource};
use crate::data::UNAVAILABLE;
use parking_lot::Mutex;
use std::path::Path;
use sysinfo::{Disks, System};
use tracing::debug;

/// Global CPU usage since the previous sample
///
/// The first sample after construction has no baseline and reads 0.
pub struct CpuUtilSource {
    sys: Mutex<System>,
}

impl CpuUtilSource {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self { sys: Mutex::new(sys) }
    }
}

impl Default for CpuUtilSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySource for CpuUtilSource {
    fn name(&self) -> &str {
        "cpu"
    }

    fn kind(&self) -> TelemetryKind {
        TelemetryKind::Cpu
    }

    fn produce_measurement(&self) -> f32 {
        let mut sys = self.sys.lock();
        sys.refresh_cpu_usage();
        let usage = sys.global_cpu_info().cpu_usage();
        if usage.is_finite() {
            usage
        } else {
            UNAVAILABLE
        }
    }
}

/// Memory in use as a share of total memory
pub struct MemUtilSource {
    sys: Mutex<System>,
}

impl MemUtilSource {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl Default for MemUtilSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySource for MemUtilSource {
    fn name(&self) -> &str {
        "mem"
    }

    fn kind(&self) -> TelemetryKind {
        TelemetryKind::Memory
    }

    fn produce_measurement(&self) -> f32 {
        let mut sys = self.sys.lock();
        sys.refresh_memory();

        let total = sys.total_memory();
        if total == 0 {
            debug!("Total memory not reported");
            return UNAVAILABLE;
        }
        let used = total.saturating_sub(sys.available_memory());
        (used as f64 / total as f64 * 100.0) as f32
    }
}

/// Used space on the root filesystem, or the first disk listed
pub struct DiskUtilSource {
    disks: Mutex<Disks>,
}

impl DiskUtilSource {
    pub fn new() -> Self {
        Self {
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        }
    }
}

impl Default for DiskUtilSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySource for DiskUtilSource {
    fn name(&self) -> &str {
        "disk"
    }

    fn kind(&self) -> TelemetryKind {
        TelemetryKind::Disk
    }

    fn produce_measurement(&self) -> f32 {
        let mut disks = self.disks.lock();
        disks.refresh();

        let list = disks.list();
        let disk = list
            .iter()
            .find(|disk| disk.mount_point() == Path::new("/"))
            .or_else(|| list.first());

        let Some(disk) = disk else {
            debug!("No disk reported");
            return UNAVAILABLE;
        };

        let total = disk.total_space();
        if total == 0 {
            return UNAVAILABLE;
        }
        let used = total.saturating_sub(disk.available_space());
        (used as f64 / total as f64 * 100.0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kinds() {
        assert_eq!(CpuUtilSource::new().kind(), TelemetryKind::Cpu);
        assert_eq!(MemUtilSource::new().kind(), TelemetryKind::Memory);
        assert_eq!(DiskUtilSource::new().kind(), TelemetryKind::Disk);
    }

    #[test]
    fn test_measurements_are_non_negative_or_unavailable() {
        let sources: Vec<Box<dyn TelemetrySource>> = super::super::default_sources();
        for source in &sources {
            let value = source.produce_measurement();
            assert!(
                value == UNAVAILABLE || value >= 0.0,
                "{} produced {}",
                source.name(),
                value
            );
        }
    }
}
