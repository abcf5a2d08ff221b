//! In-memory `ShadowTransport` for tests.

use super::transport::{InboundMessage, ShadowTransport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct MockBroker {
    pub open: bool,
    pub opens: u32,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
    pub inbound: VecDeque<InboundMessage>,
    /// Number of upcoming `open` calls that fail
    pub refuse_opens: u32,
    /// The next `publish` fails and drops the session
    pub fail_next_publish: bool,
    /// The next `try_recv` fails and drops the session
    pub fail_next_recv: bool,
    /// Every transport call, in order
    pub calls: Vec<&'static str>,
}

impl MockBroker {
    pub fn push_delta(&mut self, topic: &str, payload: &str) {
        self.inbound.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        });
    }

    pub fn published_json(&self) -> Vec<serde_json::Value> {
        self.published
            .iter()
            .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
            .collect()
    }
}

#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    pub broker: Arc<Mutex<MockBroker>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShadowTransport for MockTransport {
    async fn open(&mut self, delta_topic: &str) -> Result<(), TransportError> {
        let mut broker = self.broker.lock();
        broker.calls.push("open");
        broker.opens += 1;
        if broker.refuse_opens > 0 {
            broker.refuse_opens -= 1;
            broker.open = false;
            return Err(TransportError::Refused("NotAuthorized".into()));
        }
        broker.open = true;
        broker.subscriptions.push(delta_topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut broker = self.broker.lock();
        broker.calls.push("publish");
        if !broker.open {
            return Err(TransportError::Closed);
        }
        if broker.fail_next_publish {
            broker.fail_next_publish = false;
            broker.open = false;
            return Err(TransportError::Lost("connection reset by peer".into()));
        }
        broker.published.push((topic.to_string(), payload));
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        let mut broker = self.broker.lock();
        broker.calls.push("try_recv");
        if !broker.open {
            return Err(TransportError::Closed);
        }
        if broker.fail_next_recv {
            broker.fail_next_recv = false;
            broker.open = false;
            return Err(TransportError::Lost("keep-alive timeout".into()));
        }
        Ok(broker.inbound.pop_front())
    }

    async fn close(&mut self) {
        let mut broker = self.broker.lock();
        broker.calls.push("close");
        broker.open = false;
    }
}
