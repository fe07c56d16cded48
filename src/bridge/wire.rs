//! Wire format serialization for the datagram link.
//!
//! Each UDP datagram carries exactly one message, encoded in a
//! self-describing format so the two ends can evolve independently:
//!
//! - **MessagePack** (default): compact binary maps with string keys. Structs
//!   are encoded with named fields (`to_vec_named`), so a decoder can skip
//!   keys it does not know and treat missing keys as absent.
//! - **JSON**: human-readable, for debugging against `nc -u` and friends.
//!
//! There is no length prefix and no version field; one datagram is one frame,
//! and compatibility comes from field presence, not schema negotiation.

use crate::error::{Error, Result};
use crate::types::SensorFrame;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Largest payload we will put in a single datagram. A frame must fit in one
/// datagram; there is no fragmentation or reassembly layer.
pub const MAX_DATAGRAM_SIZE: usize = 60 * 1024;

/// Supported wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Self-describing binary maps - the production format
    #[default]
    Msgpack,
    /// JSON - human-readable for debugging
    Json,
}

/// Serializer that can handle both formats
#[derive(Debug, Clone, Copy)]
pub struct Serializer {
    format: WireFormat,
}

impl Serializer {
    /// Create a new serializer for the given format
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    /// Serialize a message to bytes, refusing anything that would not fit in
    /// a single datagram.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let bytes = match self.format {
            WireFormat::Msgpack => {
                rmp_serde::to_vec_named(value).map_err(|e| Error::Encode(e.to_string()))?
            }
            WireFormat::Json => {
                serde_json::to_vec(value).map_err(|e| Error::Encode(e.to_string()))?
            }
        };

        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(Error::FrameTooLarge {
                size: bytes.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }

        Ok(bytes)
    }

    /// Deserialize bytes to a message
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self.format {
            WireFormat::Msgpack => {
                rmp_serde::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
            }
            WireFormat::Json => {
                serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
            }
        }
    }

    /// Decode a sensor frame and record which top-level keys were ignored,
    /// so the normalizer can report them.
    pub fn decode_frame(&self, bytes: &[u8]) -> Result<SensorFrame> {
        let mut frame: SensorFrame = self.decode(bytes)?;

        // Second pass over the same bytes collects the key set without
        // materializing any values. Non-map encodings skip this quietly.
        if let Ok(keys) = self.decode::<BTreeMap<String, IgnoredAny>>(bytes) {
            frame.unknown = keys
                .into_keys()
                .filter(|k| !SensorFrame::KNOWN_KEYS.contains(&k.as_str()))
                .collect();
        }

        Ok(frame)
    }
}
