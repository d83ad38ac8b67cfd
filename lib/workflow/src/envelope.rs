//! Versioned envelope for queued messages.
//!
//! Wake-up signals cross process boundaries and may sit in a stream across
//! a deployment, so every message carries a format version. Readers check
//! the version before decoding the payload.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::fmt;

/// The current envelope version.
pub const CURRENT_VERSION: u32 = 1;

/// A versioned message wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// The envelope format version.
    pub version: u32,
    /// The wrapped payload.
    pub payload: T,
}

/// Errors decoding an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The bytes are not an envelope, or the payload has the wrong shape.
    Malformed { message: String },
    /// The envelope was written by a newer version.
    UnsupportedVersion { version: u32 },
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { message } => write!(f, "malformed envelope: {message}"),
            Self::UnsupportedVersion { version } => write!(
                f,
                "unsupported envelope version {version} (current is {CURRENT_VERSION})"
            ),
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl<T> Envelope<T> {
    /// Wraps a payload at the current version.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            payload,
        }
    }

    /// Unwraps the envelope, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Envelope with the payload left undecoded.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    version: u32,
    payload: serde_json::Value,
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Decodes an envelope, rejecting versions newer than this build.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedVersion` before touching the payload if the
    /// version is unknown, otherwise `Malformed` if decoding fails.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed {
            message: e.to_string(),
        })?;
        if raw.version > CURRENT_VERSION {
            return Err(EnvelopeError::UnsupportedVersion {
                version: raw.version,
            });
        }
        let payload = serde_json::from_value(raw.payload).map_err(|e| EnvelopeError::Malformed {
            message: e.to_string(),
        })?;
        Ok(Self {
            version: raw.version,
            payload,
        })
    }
}
