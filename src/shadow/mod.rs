//! Device shadow synchronisation: reported state out, actuator deltas in.

pub mod client;
pub mod document;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;

pub use client::{ActuatorView, ShadowSyncClient, SyncState};
pub use document::{ActuatorState, DeviceIdentity, ShadowDelta, ShadowReport, ShadowTopics};
pub use transport::{
    InboundMessage, MqttSettings, MqttTransport, ShadowTransport, TlsMaterial, TransportError,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("shadow session is not subscribed")]
    NotConnected,

    #[error("shadow transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed shadow document: {0}")]
    Malformed(#[source] serde_json::Error),
}
