//! Message encoding at the transport seam.
//!
//! Transports move opaque bytes; this module turns request records into bytes
//! and inbound bytes back into response records. JSON is the wire format.

use crate::error::{Result, StreamError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode an outbound message.
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

/// Decode an inbound message.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| StreamError::Json {
        message: format!("Failed to decode inbound message: {}", e),
        source: Some(e),
    })
}
