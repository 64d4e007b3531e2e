//! # Delivery Decoder
//!
//! Turns a raw delivery payload into a [`WorkItem`].
//!
//! The wire format is a JSON object with named fields:
//!
//! ```json
//! {"product_code": "P1", "product_name": "Widget", "stock": 10}
//! ```
//!
//! Decoding is pure: the same bytes always produce the same result. Unknown
//! fields are ignored so producers can add fields without breaking consumers.

use crate::WorkItem;
use serde::Deserialize;
use thiserror::Error;

/// Why a payload could not become a [`WorkItem`]
///
/// Every variant describes a payload that can never be processed, so the
/// disposition for any `DecodeError` is always a discard.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Malformed payload: {message}")]
    Malformed { message: String },

    #[error("Required field missing: {field}")]
    MissingField { field: &'static str },

    #[error("Required field is empty: {field}")]
    EmptyField { field: &'static str },
}

/// Wire shape with every field optional so absence can be reported by name
#[derive(Debug, Deserialize)]
struct ProductMessage {
    product_code: Option<String>,
    product_name: Option<String>,
    stock: Option<i64>,
}

/// Decode a payload into a work item
pub fn decode(payload: &[u8]) -> Result<WorkItem, DecodeError> {
    // Parse as an object first: serde would otherwise accept a positional array
    let object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(payload).map_err(malformed)?;
    let message: ProductMessage =
        serde_json::from_value(serde_json::Value::Object(object)).map_err(malformed)?;

    let product_code = required_text(message.product_code, "product_code")?;
    let product_name = required_text(message.product_name, "product_name")?;
    let stock = message
        .stock
        .ok_or(DecodeError::MissingField { field: "stock" })?;

    Ok(WorkItem {
        product_code,
        product_name,
        stock,
    })
}

fn malformed(error: serde_json::Error) -> DecodeError {
    DecodeError::Malformed {
        message: error.to_string(),
    }
}

fn required_text(value: Option<String>, field: &'static str) -> Result<String, DecodeError> {
    let value = value.ok_or(DecodeError::MissingField { field })?;
    if value.trim().is_empty() {
        return Err(DecodeError::EmptyField { field });
    }
    Ok(value)
}

#[cfg(test)]
#[path = "decoder_tests.rs"]
mod tests;
