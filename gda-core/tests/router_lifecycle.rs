use gda_core::{ConnectionState, ManagerState, PubSubClient, ResourceName, RouterError};
use gda_devkit::{MockCall, MockPubSubClient, TestHarness};
use rumqttc::QoS;
use std::sync::Arc;

fn two_connectors(first: bool, second: bool) -> (TestHarness, Arc<MockPubSubClient>, Arc<MockPubSubClient>) {
    let a = Arc::new(MockPubSubClient::new("a"));
    let b = Arc::new(MockPubSubClient::new("b"));
    let harness = TestHarness::with_connectors(vec![(a.clone(), first), (b.clone(), second)]);
    (harness, a, b)
}

#[tokio::test]
async fn test_start_stop_leaves_nothing_behind() {
    for (first, second) in [(true, true), (true, false), (false, true), (false, false)] {
        let (harness, a, b) = two_connectors(first, second);

        assert_eq!(harness.router.start_manager().await.unwrap(), ManagerState::Running);
        for (client, enabled) in [(&a, first), (&b, second)] {
            assert_eq!(client.is_connected(), enabled);
            assert_eq!(client.active_subscriptions().len(), if enabled { 3 } else { 0 });
            assert_eq!(client.has_handler(), enabled);
        }

        assert_eq!(harness.router.stop_manager().await.unwrap(), ManagerState::Stopped);
        for client in [&a, &b] {
            assert!(client.active_subscriptions().is_empty());
            assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        }
        if !second {
            assert!(b.calls().is_empty());
        }
    }
}

#[tokio::test]
async fn test_lifecycle_call_order() {
    let harness = TestHarness::new();
    harness.router.start_manager().await.unwrap();
    harness.router.stop_manager().await.unwrap();

    assert_eq!(
        harness.client.calls(),
        vec![
            MockCall::Connect,
            MockCall::Subscribe(ResourceName::CDA_SENSOR_MSG_RESOURCE, QoS::AtLeastOnce),
            MockCall::Subscribe(ResourceName::CDA_SYSTEM_PERF_MSG_RESOURCE, QoS::AtLeastOnce),
            MockCall::Subscribe(ResourceName::CDA_ACTUATOR_RESPONSE_RESOURCE, QoS::AtLeastOnce),
            MockCall::Unsubscribe(ResourceName::CDA_ACTUATOR_RESPONSE_RESOURCE),
            MockCall::Unsubscribe(ResourceName::CDA_SYSTEM_PERF_MSG_RESOURCE),
            MockCall::Unsubscribe(ResourceName::CDA_SENSOR_MSG_RESOURCE),
            MockCall::Disconnect,
        ]
    );
}

#[tokio::test]
async fn test_double_start_is_a_no_op() {
    let harness = TestHarness::new();

    assert_eq!(harness.router.start_manager().await.unwrap(), ManagerState::Running);
    assert_eq!(harness.router.start_manager().await.unwrap(), ManagerState::Running);

    let connects = harness
        .client
        .calls()
        .into_iter()
        .filter(|call| *call == MockCall::Connect)
        .count();
    assert_eq!(connects, 1);

    harness.router.stop_manager().await.unwrap();
}

#[tokio::test]
async fn test_stop_requires_running() {
    let harness = TestHarness::new();

    let err = harness.router.stop_manager().await.unwrap_err();
    assert!(matches!(
        err,
        RouterError::InvalidTransition {
            operation: "stop",
            state: ManagerState::Stopped
        }
    ));
    assert_eq!(harness.router.manager_state(), ManagerState::Stopped);

    harness.router.start_manager().await.unwrap();
    harness.router.stop_manager().await.unwrap();
    assert!(harness.router.stop_manager().await.is_err());
}

#[tokio::test]
async fn test_failed_connect_rolls_back() {
    let (harness, a, b) = two_connectors(true, true);
    b.set_fail_connect(true);

    let err = harness.router.start_manager().await.unwrap_err();
    assert!(matches!(err, RouterError::ConnectorUnavailable(ref name) if name == "b"));
    assert_eq!(harness.router.manager_state(), ManagerState::Stopped);
    assert_eq!(a.connection_state(), ConnectionState::Disconnected);
    assert_eq!(b.connection_state(), ConnectionState::Disconnected);
    assert!(a.active_subscriptions().is_empty());
    assert_eq!(
        a.calls()[4..],
        [
            MockCall::Unsubscribe(ResourceName::CDA_ACTUATOR_RESPONSE_RESOURCE),
            MockCall::Unsubscribe(ResourceName::CDA_SYSTEM_PERF_MSG_RESOURCE),
            MockCall::Unsubscribe(ResourceName::CDA_SENSOR_MSG_RESOURCE),
            MockCall::Disconnect,
        ]
    );

    b.set_fail_connect(false);
    assert_eq!(harness.router.start_manager().await.unwrap(), ManagerState::Running);
    harness.router.stop_manager().await.unwrap();
}

#[tokio::test]
async fn test_stop_during_reconnect() {
    let harness = TestHarness::new();
    harness.router.start_manager().await.unwrap();

    harness.client.simulate_connection_loss();
    assert_eq!(harness.client.connection_state(), ConnectionState::Reconnecting);

    harness.router.stop_manager().await.unwrap();
    assert_eq!(harness.client.connection_state(), ConnectionState::Disconnected);
    assert!(harness.client.active_subscriptions().is_empty());
}

#[tokio::test]
async fn test_connect_twice() {
    let client = MockPubSubClient::new("mqtt");
    assert!(client.connect_client().await);
    assert!(!client.connect_client().await);
    assert!(client.disconnect_client().await);
}

#[tokio::test]
async fn test_out_of_range_qos_uses_default() {
    let client = MockPubSubClient::new("mqtt").with_default_qos(2);
    client.connect_client().await;

    assert!(client.subscribe_to_topic(ResourceName::CDA_SENSOR_MSG_RESOURCE, 3).await);
    assert!(client.publish_message(ResourceName::CDA_ACTUATOR_CMD_RESOURCE, "{}", -1).await);

    assert_eq!(
        client.calls()[1],
        MockCall::Subscribe(ResourceName::CDA_SENSOR_MSG_RESOURCE, QoS::ExactlyOnce)
    );
    assert_eq!(client.published()[0].qos, QoS::ExactlyOnce);
}
