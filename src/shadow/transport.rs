//! Session transport for the shadow client.
//!
//! `MqttTransport` wraps a rumqttc client. Its event loop runs on a driver
//! task that forwards connection, subscription and publish events over a
//! channel; the sync client drains that channel without blocking.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS, SubscribeReasonCode,
    TlsConfiguration, Transport,
};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("subscription to {0} rejected")]
    SubscriptionRejected(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("connection lost: {0}")]
    Lost(String),

    #[error("no open session")]
    Closed,

    #[error("client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// CA, client certificate and private key, PEM encoded.
#[derive(Clone)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca", &format_args!("{} bytes", self.ca.len()))
            .field("client_cert", &format_args!("{} bytes", self.client_cert.len()))
            .field("client_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A publish/subscribe session to the shadow endpoint.
#[async_trait]
pub trait ShadowTransport: Send {
    /// Open a session and subscribe to `delta_topic`. Returns once the broker
    /// has acknowledged both. An existing session is replaced.
    async fn open(&mut self, delta_topic: &str) -> Result<(), TransportError>;

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Next received message, if one is already waiting. Never blocks.
    fn try_recv(&mut self) -> Result<Option<InboundMessage>, TransportError>;

    async fn close(&mut self);
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub tls: Option<TlsMaterial>,
}

#[derive(Debug)]
enum SessionEvent {
    Connected,
    Refused(String),
    Subscribed { granted: bool },
    Message(InboundMessage),
    Failed(String),
}

struct Session {
    client: AsyncClient,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    driver: JoinHandle<()>,
    pending: VecDeque<InboundMessage>,
    failure: Option<String>,
}

impl Session {
    /// Move everything the driver has reported so far into `pending`/`failure`.
    fn pump(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(SessionEvent::Message(message)) => self.pending.push_back(message),
                Ok(SessionEvent::Failed(reason)) => {
                    self.failure.get_or_insert(reason);
                }
                Ok(other) => debug!("[MQTT] Ignoring late event {:?}", other),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.failure.get_or_insert_with(|| "event loop stopped".into());
                    break;
                }
            }
        }
    }

    /// Wait for the next session-level event, stashing messages that arrive first.
    async fn wait_for(
        &mut self,
        what: &'static str,
        limit: Duration,
    ) -> Result<SessionEvent, TransportError> {
        loop {
            let event = timeout(limit, self.events.recv())
                .await
                .map_err(|_| TransportError::Timeout(what))?
                .ok_or_else(|| TransportError::Lost("event loop stopped".into()))?;
            match event {
                SessionEvent::Message(message) => self.pending.push_back(message),
                SessionEvent::Failed(reason) => return Err(TransportError::Lost(reason)),
                SessionEvent::Refused(reason) => return Err(TransportError::Refused(reason)),
                other => return Ok(other),
            }
        }
    }
}

#[cfg(test)]
impl Session {
    /// Session whose events are fed by hand instead of by a broker.
    fn detached() -> (Self, mpsc::UnboundedSender<SessionEvent>) {
        let options = MqttOptions::new("wqm-test", "localhost", 1883);
        let (client, _event_loop) = AsyncClient::new(options, 10);
        let (tx, events) = mpsc::unbounded_channel();
        let session = Session {
            client,
            events,
            driver: tokio::spawn(async {}),
            pending: VecDeque::new(),
            failure: None,
        };
        (session, tx)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

pub struct MqttTransport {
    settings: MqttSettings,
    session: Option<Session>,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    /// Transport whose session already saw the connection drop with `reason`.
    #[cfg(test)]
    pub(crate) fn with_lost_session(settings: MqttSettings, reason: &str) -> Self {
        let (session, tx) = Session::detached();
        let _ = tx.send(SessionEvent::Failed(reason.to_string()));
        Self {
            settings,
            session: Some(session),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.settings.client_id, &self.settings.host, self.settings.port);
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);

        if let Some(tls) = &self.settings.tls {
            options.set_transport(Transport::Tls(TlsConfiguration::Simple {
                ca: tls.ca.clone(),
                alpn: None,
                client_auth: Some((tls.client_cert.clone(), tls.client_key.clone())),
            }));
        }
        options
    }

    fn session(&mut self) -> Result<&mut Session, TransportError> {
        let failure = match self.session.as_mut() {
            Some(session) => {
                session.pump();
                session.failure.clone()
            }
            None => return Err(TransportError::Closed),
        };
        if let Some(reason) = failure {
            self.session = None;
            return Err(TransportError::Lost(reason));
        }
        self.session.as_mut().ok_or(TransportError::Closed)
    }
}

/// Drive the event loop until it fails or the session is dropped.
async fn drive(mut event_loop: rumqttc::EventLoop, tx: mpsc::UnboundedSender<SessionEvent>) {
    loop {
        let event = match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    SessionEvent::Connected
                } else {
                    SessionEvent::Refused(format!("{:?}", ack.code))
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => SessionEvent::Subscribed {
                granted: ack
                    .return_codes
                    .iter()
                    .all(|code| !matches!(code, SubscribeReasonCode::Failure)),
            },
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "[MQTT] Received {} bytes on {}",
                    publish.payload.len(),
                    publish.topic
                );
                SessionEvent::Message(InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                })
            }
            Ok(_) => continue,
            Err(e) => {
                error!("[MQTT] Connection error: {}", e);
                // The sync client opens a fresh session on its next cycle
                let _ = tx.send(SessionEvent::Failed(e.to_string()));
                break;
            }
        };
        if tx.send(event).is_err() {
            break;
        }
    }
}

#[async_trait]
impl ShadowTransport for MqttTransport {
    async fn open(&mut self, delta_topic: &str) -> Result<(), TransportError> {
        self.close().await;

        info!(
            "[MQTT] Connecting to {}:{} as {} ({})",
            self.settings.host,
            self.settings.port,
            self.settings.client_id,
            if self.settings.tls.is_some() { "tls" } else { "tcp" }
        );
        let (client, event_loop) = AsyncClient::new(self.options(), 10);
        let (tx, events) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(event_loop, tx));
        let mut session = Session {
            client,
            events,
            driver,
            pending: VecDeque::new(),
            failure: None,
        };

        let limit = self.settings.connect_timeout;
        session.wait_for("connection acknowledgement", limit).await?;

        info!("[MQTT] Subscribing to {}", delta_topic);
        session.client.subscribe(delta_topic, QoS::AtMostOnce).await?;
        match session.wait_for("subscription acknowledgement", limit).await? {
            SessionEvent::Subscribed { granted: true } => {}
            SessionEvent::Subscribed { granted: false } => {
                return Err(TransportError::SubscriptionRejected(delta_topic.to_string()));
            }
            other => {
                warn!("[MQTT] Unexpected event while subscribing: {:?}", other);
                return Err(TransportError::Lost("unexpected event while subscribing".into()));
            }
        }

        self.session = Some(session);
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let session = self.session()?;
        debug!("[MQTT] Publishing {} bytes to {}", payload.len(), topic);
        let result = session
            .client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await;
        if result.is_err() {
            self.session = None;
        }
        Ok(result?)
    }

    fn try_recv(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        let Some(session) = self.session.as_mut() else {
            return Err(TransportError::Closed);
        };
        session.pump();
        if let Some(message) = session.pending.pop_front() {
            return Ok(Some(message));
        }
        match session.failure.clone() {
            Some(reason) => {
                self.session = None;
                Err(TransportError::Lost(reason))
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.client.disconnect().await {
                debug!("[MQTT] Disconnect request failed: {}", e);
            }
        }
    }
}
