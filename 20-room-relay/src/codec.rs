//! The broadcast envelope carried over the relay.
//!
//! Envelopes are JSON objects:
//!
//! ```json
//! {"room":"lobby","event":"chat","args":["hi",{"from":"alice"}],"except":"Vd1x"}
//! ```
//!
//! `except` names a connection that should not receive the message on any
//! process and is left out when unset.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::connection::ConnectionId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub room: String,
    pub event: String,
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except: Option<ConnectionId>,
}

#[derive(Debug, Error)]
#[error("malformed relay envelope: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

impl Envelope {
    pub fn new(room: impl Into<String>, event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            room: room.into(),
            event: event.into(),
            args,
            except: None,
        }
    }

    pub fn except(mut self, connection_id: Option<&str>) -> Self {
        self.except = connection_id.map(str::to_string);
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        // Serializing string keys and `Value`s cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
