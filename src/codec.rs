//! Portable encoding for job targets and arguments.
//!
//! Values are serialized to JSON and then base64 encoded, so they fit text columns
//! of any backend and survive a trip through tools that mangle raw JSON. Anything that
//! implements `Serialize` can be stored; [`Target`](crate::Target) and argument lists
//! (`Vec<serde_json::Value>`) are what the queue itself stores.

use crate::{Result, SnakeError};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Serialize, de::DeserializeOwned};

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    Ok(STANDARD.encode(json))
}

/// Inverse of [`encode`]. Corrupt input is a [`SnakeError::Decode`].
pub fn decode<T: DeserializeOwned>(encoded: &str) -> Result<T> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SnakeError::decode(format!("invalid base64 payload: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| SnakeError::decode(format!("invalid payload: {}", e)))
}
