use gda_core::telemetry::{SystemPerformanceCollector, TelemetryKind, TelemetrySource};
use gda_core::ResourceName;
use gda_devkit::{RecordedCall, RecordingListener, StaticSource, TestHarness};
use std::sync::Arc;
use std::time::Duration;

fn sources(values: &[(TelemetryKind, f32)]) -> Vec<Box<dyn TelemetrySource>> {
    values
        .iter()
        .map(|(kind, value)| Box::new(StaticSource::new(format!("{:?}", kind), *kind, *value)) as Box<dyn TelemetrySource>)
        .collect()
}

#[test]
fn test_collect_once_fills_known_kinds() {
    let listener = Arc::new(RecordingListener::new());
    let collector = SystemPerformanceCollector::new(
        sources(&[(TelemetryKind::Cpu, 10.0), (TelemetryKind::Memory, 20.0)]),
        listener,
        Duration::from_secs(5),
    );

    let data = collector.collect_once();
    assert_eq!(data.cpu_util, 10.0);
    assert_eq!(data.mem_util, 20.0);
    assert!(!data.is_disk_available());
}

#[test]
fn test_last_source_of_a_kind_wins() {
    let collector = SystemPerformanceCollector::new(
        sources(&[
            (TelemetryKind::Cpu, 10.0),
            (TelemetryKind::Disk, 55.0),
            (TelemetryKind::Cpu, 30.0),
        ]),
        Arc::new(RecordingListener::new()),
        Duration::from_secs(5),
    );

    let data = collector.collect_once();
    assert_eq!(data.cpu_util, 30.0);
    assert_eq!(data.disk_util, 55.0);
    assert_eq!(data.mem_util, -1.0);
}

#[test]
fn test_negative_measurements_are_kept() {
    let collector = SystemPerformanceCollector::new(
        sources(&[(TelemetryKind::Cpu, -3.5)]),
        Arc::new(RecordingListener::new()),
        Duration::ZERO,
    );

    assert_eq!(collector.collect_once().cpu_util, -3.5);
    assert_eq!(collector.poll_cycle(), Duration::from_secs(1));
}

#[tokio::test]
async fn test_publish_once_reports_gateway_resource() {
    let listener = Arc::new(RecordingListener::new());
    let collector = SystemPerformanceCollector::new(
        sources(&[(TelemetryKind::Memory, 42.0)]),
        listener.clone(),
        Duration::from_secs(5),
    );

    assert!(collector.publish_once().await);
    match &listener.calls()[0] {
        RecordedCall::SystemPerformance(resource, data) => {
            assert_eq!(*resource, ResourceName::GDA_SYSTEM_PERF_MSG_RESOURCE);
            assert_eq!(data.mem_util, 42.0);
        }
        other => panic!("unexpected call {:?}", other),
    }
}

#[tokio::test]
async fn test_start_stop_collector() {
    let listener = Arc::new(RecordingListener::new());
    let collector = SystemPerformanceCollector::new(
        sources(&[(TelemetryKind::Cpu, 1.0)]),
        listener.clone(),
        Duration::from_secs(1),
    );

    assert!(collector.start_collector());
    assert!(!collector.start_collector());
    assert!(collector.is_running());

    assert!(
        listener
            .wait_for(1, Duration::from_secs(3), |call| matches!(call, RecordedCall::SystemPerformance(..)))
            .await
    );

    assert!(collector.stop_collector().await);
    assert!(!collector.stop_collector().await);
    assert!(!collector.is_running());
}

#[tokio::test]
async fn test_collector_feeds_router() {
    let harness = TestHarness::new();
    let collector = SystemPerformanceCollector::new(
        sources(&[(TelemetryKind::Cpu, 5.0), (TelemetryKind::Memory, 6.0), (TelemetryKind::Disk, 7.0)]),
        harness.router.clone(),
        Duration::from_secs(30),
    );

    assert!(collector.publish_once().await);
    assert_eq!(
        harness.listener.count(|call| matches!(
            call,
            RecordedCall::UpstreamSystemPerformance(ResourceName::GDA_SYSTEM_PERF_MSG_RESOURCE, data)
                if data.disk_util == 7.0
        )),
        1
    );
}
