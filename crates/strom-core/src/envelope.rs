//! Structured publish envelopes.
//!
//! Producers that publish entity state changes wrap them in an [`Envelope`]:
//! a tagged union over the three lifecycle operations, each carrying the
//! entity id, a caller-supplied version and an opaque JSON payload. The wire
//! form is JSON with an `"operation"` tag, so consumers in any language can
//! dispatch on `operation` without knowing the payload schema:
//!
//! ```json
//! {"operation":"publish","id":"42","payload":{...},"version":1,"time":"..."}
//! ```

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The shared content of every envelope operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeBody {
    /// Entity key the operation applies to
    pub id: String,
    /// Opaque caller payload
    pub payload: serde_json::Value,
    /// Caller-supplied version, for idempotent/ordered application downstream
    pub version: i64,
    /// When the envelope was built
    pub time: DateTime<Utc>,
}

/// A publish/update/unpublish operation on an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum Envelope {
    Publish(EnvelopeBody),
    Update(EnvelopeBody),
    Unpublish(EnvelopeBody),
}

impl Envelope {
    pub fn publish(id: impl Into<String>, payload: serde_json::Value, version: i64) -> Self {
        Self::Publish(EnvelopeBody::new(id, payload, version))
    }

    pub fn update(id: impl Into<String>, payload: serde_json::Value, version: i64) -> Self {
        Self::Update(EnvelopeBody::new(id, payload, version))
    }

    pub fn unpublish(id: impl Into<String>, payload: serde_json::Value, version: i64) -> Self {
        Self::Unpublish(EnvelopeBody::new(id, payload, version))
    }

    /// The operation tag as it appears on the wire.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Publish(_) => "publish",
            Self::Update(_) => "update",
            Self::Unpublish(_) => "unpublish",
        }
    }

    pub fn body(&self) -> &EnvelopeBody {
        match self {
            Self::Publish(body) | Self::Update(body) | Self::Unpublish(body) => body,
        }
    }

    /// Serialize to the JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse an envelope from a fetched record value.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

impl EnvelopeBody {
    fn new(id: impl Into<String>, payload: serde_json::Value, version: i64) -> Self {
        Self {
            id: id.into(),
            payload,
            version,
            time: Utc::now(),
        }
    }
}
