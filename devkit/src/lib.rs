/*!
# Gateway DevKit - test doubles and helpers

Library for exercising the gateway core without a real broker:
- Mock pub/sub connector honouring the connector contract
- In-process MQTT broker for the real connector
- Recording listeners and fixed telemetry sources
- Device payload builders
*/

pub mod fake_broker;
pub mod mqtt_stub;
pub mod test_utils;

pub use fake_broker::{BrokerLog, FakeBroker};
pub use mqtt_stub::{GatewayMessageBuilder, MockCall, MockMessage, MockPubSubClient};
pub use test_utils::{init_tracing, RecordedCall, RecordingListener, StaticSource, TestHarness};
