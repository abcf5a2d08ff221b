//! Shadow sync client.
//!
//! Holds one logical session with the shadow endpoint and the actuator state
//! accepted from it. The client is the only writer of `ActuatorState`;
//! everything else reads through an `ActuatorView`.

use super::SyncError;
use super::document::{ActuatorState, ShadowDelta, ShadowReport, ShadowTopics};
use super::transport::ShadowTransport;
use crate::hal::Indicator;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Connecting,
    Subscribed,
}

#[derive(Default)]
struct SharedActuator {
    state: RwLock<ActuatorState>,
    version: AtomicU32,
}

/// Read-only handle on the accepted actuator state.
#[derive(Clone)]
pub struct ActuatorView {
    inner: Arc<SharedActuator>,
}

impl ActuatorView {
    pub fn get(&self) -> ActuatorState {
        *self.inner.state.read()
    }

    /// Incremented each time an applied delta changed the state.
    pub fn version(&self) -> u32 {
        self.inner.version.load(Ordering::SeqCst)
    }
}

pub struct ShadowSyncClient {
    transport: Box<dyn ShadowTransport>,
    topics: ShadowTopics,
    state: SyncState,
    actuator: Arc<SharedActuator>,
    indicator: Option<Box<dyn Indicator>>,
}

impl ShadowSyncClient {
    pub fn new(transport: Box<dyn ShadowTransport>, topics: ShadowTopics) -> Self {
        Self {
            transport,
            topics,
            state: SyncState::Disconnected,
            actuator: Arc::new(SharedActuator::default()),
            indicator: None,
        }
    }

    /// Drive this output whenever the onboard indicator state changes.
    pub fn with_indicator(mut self, indicator: Box<dyn Indicator>) -> Self {
        self.indicator = Some(indicator);
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_subscribed(&self) -> bool {
        self.state == SyncState::Subscribed
    }

    pub fn actuator(&self) -> ActuatorState {
        *self.actuator.state.read()
    }

    pub fn actuator_view(&self) -> ActuatorView {
        ActuatorView {
            inner: self.actuator.clone(),
        }
    }

    /// Open the session and subscribe to this thing's delta topic.
    pub async fn connect(&mut self) -> Result<(), SyncError> {
        self.state = SyncState::Connecting;
        info!("[Shadow] Connecting, delta topic {}", self.topics.delta);

        match self.transport.open(&self.topics.delta).await {
            Ok(()) => {
                self.state = SyncState::Subscribed;
                info!("[Shadow] Subscribed");
                Ok(())
            }
            Err(e) => {
                self.state = SyncState::Disconnected;
                Err(e.into())
            }
        }
    }

    /// Send `report` on the update topic.
    ///
    /// Fails with `NotConnected` without touching the transport unless
    /// subscribed. A transport failure drops the session.
    pub async fn publish_report(&mut self, report: &ShadowReport) -> Result<(), SyncError> {
        if !self.is_subscribed() {
            return Err(SyncError::NotConnected);
        }
        let payload = report.to_payload()?;

        if let Err(e) = self.transport.publish(&self.topics.update, payload).await {
            self.demote();
            return Err(e.into());
        }
        debug!("[Shadow] Reported state (uptime {} ms)", report.uptime_ms);
        Ok(())
    }

    /// Take the next pending delta, if any, and apply it.
    ///
    /// Never waits for a message. Payloads that fail to parse and messages on
    /// other topics are dropped and the next pending one is tried.
    pub async fn poll_incoming(&mut self) -> Result<Option<ShadowDelta>, SyncError> {
        if !self.is_subscribed() {
            return Err(SyncError::NotConnected);
        }

        loop {
            let message = match self.transport.try_recv() {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(None),
                Err(e) => {
                    self.demote();
                    return Err(e.into());
                }
            };

            if message.topic != self.topics.delta {
                debug!("[Shadow] Ignoring message on {}", message.topic);
                continue;
            }

            match ShadowDelta::parse(&message.payload) {
                Ok(delta) => {
                    self.apply(&delta).await;
                    return Ok(Some(delta));
                }
                Err(e) => debug!("[Shadow] Dropping delta: {}", e),
            }
        }
    }

    /// Apply a delta to the actuator state. Returns whether anything changed;
    /// re-applying the current value is a no-op.
    pub async fn apply(&mut self, delta: &ShadowDelta) -> bool {
        let Some(on) = delta.onboard_indicator else {
            return false;
        };

        let changed = {
            let mut state = self.actuator.state.write();
            let changed = state.onboard_indicator != on;
            state.onboard_indicator = on;
            changed
        };
        if !changed {
            debug!("[Shadow] Onboard indicator already {}", on_off(on));
            return false;
        }

        self.actuator.version.fetch_add(1, Ordering::SeqCst);
        info!("[Shadow] Onboard indicator -> {}", on_off(on));
        if let Some(indicator) = self.indicator.as_mut()
            && let Err(e) = indicator.set(on).await
        {
            warn!("[Shadow] Failed to drive onboard indicator: {}", e);
        }
        true
    }

    fn demote(&mut self) {
        if self.state != SyncState::Disconnected {
            warn!("[Shadow] Session lost, will reconnect next cycle");
        }
        self.state = SyncState::Disconnected;
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::simulation::SimulatedIndicator;
    use crate::sensors::SensorSnapshot;
    use crate::shadow::DeviceIdentity;
    use crate::shadow::testing::MockTransport;
    use crate::shadow::{MqttSettings, MqttTransport, TransportError};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn topics() -> ShadowTopics {
        ShadowTopics::new("$aws", "wqm")
    }

    fn client(transport: &MockTransport) -> ShadowSyncClient {
        ShadowSyncClient::new(Box::new(transport.clone()), topics())
    }

    fn report(client: &ShadowSyncClient) -> ShadowReport {
        ShadowReport::new(
            DeviceIdentity {
                client_id: "wqm-01".into(),
                hardware_model: "esp32".into(),
                firmware_version: "1.0.0".into(),
            },
            1000,
            &SensorSnapshot::default(),
            client.actuator(),
        )
    }

    #[tokio::test]
    async fn test_connect_subscribes_to_delta_topic() {
        let transport = MockTransport::new();
        let mut client = client(&transport);
        assert_eq!(client.state(), SyncState::Disconnected);

        assert_ok!(client.connect().await);
        assert_eq!(client.state(), SyncState::Subscribed);
        assert_eq!(
            transport.broker.lock().subscriptions,
            ["$aws/things/wqm/shadow/update/delta"]
        );
    }

    #[tokio::test]
    async fn test_refused_connect_stays_disconnected() {
        let transport = MockTransport::new();
        transport.broker.lock().refuse_opens = 1;
        let mut client = client(&transport);

        let err = assert_err!(client.connect().await);
        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(client.state(), SyncState::Disconnected);

        assert_ok!(client.connect().await);
        assert!(client.is_subscribed());
    }

    #[tokio::test]
    async fn test_publish_while_disconnected_does_no_io() {
        let transport = MockTransport::new();
        let mut client = client(&transport);
        let report = report(&client);

        let err = assert_err!(client.publish_report(&report).await);
        assert!(matches!(err, SyncError::NotConnected));
        assert!(matches!(
            client.poll_incoming().await,
            Err(SyncError::NotConnected)
        ));
        assert!(transport.broker.lock().calls.is_empty());
    }

    #[tokio::test]
    async fn test_publish_goes_to_update_topic() {
        let transport = MockTransport::new();
        let mut client = client(&transport);
        assert_ok!(client.connect().await);

        let report = report(&client);
        assert_ok!(client.publish_report(&report).await);

        let broker = transport.broker.lock();
        assert_eq!(broker.published.len(), 1);
        assert_eq!(broker.published[0].0, "$aws/things/wqm/shadow/update");
        assert_eq!(broker.published_json()[0]["state"]["reported"]["device"]["uptime"], 1000);
    }

    #[tokio::test]
    async fn test_publish_failure_demotes() {
        let transport = MockTransport::new();
        let mut client = client(&transport);
        assert_ok!(client.connect().await);
        transport.broker.lock().fail_next_publish = true;

        let report = report(&client);
        let err = assert_err!(client.publish_report(&report).await);
        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(client.state(), SyncState::Disconnected);

        // No retry until reconnected
        assert!(matches!(
            client.publish_report(&report).await,
            Err(SyncError::NotConnected)
        ));
        assert_ok!(client.connect().await);
        assert_ok!(client.publish_report(&report).await);
    }

    #[tokio::test]
    async fn test_receive_failure_demotes() {
        let transport = MockTransport::new();
        let mut client = client(&transport);
        assert_ok!(client.connect().await);
        transport.broker.lock().fail_next_recv = true;

        assert!(matches!(
            client.poll_incoming().await,
            Err(SyncError::Transport(_))
        ));
        assert_eq!(client.state(), SyncState::Disconnected);
    }

    #[tokio::test]
    async fn test_delta_turns_indicator_on() {
        let transport = MockTransport::new();
        let indicator = SimulatedIndicator::new();
        let lit = indicator.lit_handle();
        let mut client = client(&transport).with_indicator(Box::new(indicator));
        assert_ok!(client.connect().await);

        transport
            .broker
            .lock()
            .push_delta(&topics().delta, r#"{"state":{"led":{"onboard":1}}}"#);

        let delta = assert_ok!(client.poll_incoming().await);
        assert_eq!(delta, Some(ShadowDelta { onboard_indicator: Some(true) }));
        assert!(client.actuator().onboard_indicator);
        assert!(lit.load(Ordering::SeqCst));

        // The next report carries the accepted value
        let report = report(&client);
        assert_ok!(client.publish_report(&report).await);
        assert_eq!(
            transport.broker.lock().published_json()[0]["state"]["reported"]["led"]["onboard"],
            1
        );
    }

    #[tokio::test]
    async fn test_applying_same_delta_twice_is_a_no_op() {
        let transport = MockTransport::new();
        let indicator = SimulatedIndicator::new();
        let writes = indicator.write_counter();
        let mut client = client(&transport).with_indicator(Box::new(indicator));
        let view = client.actuator_view();

        let on = ShadowDelta {
            onboard_indicator: Some(true),
        };
        assert!(client.apply(&on).await);
        let after_first = client.actuator();

        assert!(!client.apply(&on).await);
        assert_eq!(client.actuator(), after_first);
        assert_eq!(view.get(), after_first);
        assert_eq!(view.version(), 1);
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_and_foreign_messages_are_skipped() {
        let transport = MockTransport::new();
        let mut client = client(&transport);
        assert_ok!(client.connect().await);
        {
            let mut broker = transport.broker.lock();
            broker.push_delta(&topics().delta, "{not json");
            broker.push_delta("$aws/things/other/shadow/update/delta", r#"{"state":{"led":{"onboard":1}}}"#);
            broker.push_delta(&topics().delta, r#"{"state":{"led":{"onboard":0}}}"#);
        }

        let delta = assert_ok!(client.poll_incoming().await);
        assert_eq!(delta.and_then(|d| d.onboard_indicator), Some(false));
        assert!(!client.actuator().onboard_indicator);
        assert_eq!(assert_ok!(client.poll_incoming().await), None);
        assert!(client.is_subscribed());
    }

    #[tokio::test]
    async fn test_irrelevant_delta_leaves_state() {
        let transport = MockTransport::new();
        let mut client = client(&transport);
        assert_ok!(client.connect().await);
        transport
            .broker
            .lock()
            .push_delta(&topics().delta, r#"{"state":{"pump":{"on":1}}}"#);

        let delta = assert_ok!(client.poll_incoming().await);
        assert_eq!(delta, Some(ShadowDelta::default()));
        assert_eq!(client.actuator(), ActuatorState::default());
        assert_eq!(client.actuator_view().version(), 0);
    }

    #[tokio::test]
    async fn test_indicator_failure_keeps_accepted_state() {
        let transport = MockTransport::new();
        let mut client = client(&transport).with_indicator(Box::new(SimulatedIndicator::failing()));

        assert!(
            client
                .apply(&ShadowDelta {
                    onboard_indicator: Some(true)
                })
                .await
        );
        assert!(client.actuator().onboard_indicator);
    }

    #[tokio::test]
    async fn test_lost_mqtt_session_demotes_client() {
        let settings = MqttSettings {
            client_id: "wqm-01".into(),
            host: "broker.local".into(),
            port: 8883,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            tls: None,
        };
        let transport = MqttTransport::with_lost_session(settings, "connection reset by peer");
        let mut client = ShadowSyncClient::new(Box::new(transport), topics());
        client.state = SyncState::Subscribed;

        assert!(matches!(
            client.poll_incoming().await,
            Err(SyncError::Transport(TransportError::Lost(_)))
        ));
        assert_eq!(client.state(), SyncState::Disconnected);

        let report = report(&client);
        assert!(matches!(
            client.publish_report(&report).await,
            Err(SyncError::NotConnected)
        ));
    }
}
