//! Wire envelope carrying one serialized payload for one delivery.
//!
//! Envelopes are transient: created per send, decoded per dispatch, never
//! persisted or retained.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One message in flight: queue name, sender id, and the JSON-encoded
/// payload of the queue's declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Name of the queue this envelope was published on.
    pub queue: String,
    /// Id of the publishing node, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// The payload, encoded with the queue's declared type.
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Encode `payload` into a new envelope for `queue`.
    pub fn seal<T: Serialize>(
        queue: &str,
        sender: Option<&str>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            queue: queue.to_string(),
            sender: sender.map(str::to_string),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Decode the payload as the queue's declared type, consuming the
    /// envelope.
    pub fn open<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload)
    }

    /// Serialize for the broker.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize as received from the broker.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
