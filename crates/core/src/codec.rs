//! Wire codec for typed messages
//!
//! Messages travel as a flat JSON object carrying an embedded `_type`
//! discriminator next to the message fields:
//!
//! ```text
//! {"_type":"Order","id":"789","product":"Tablet","quantity":2}
//! ```
//!
//! The discriminator written by the producer is checked on decode, so a
//! generic consumer can tell which shape it is reading.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::domain::Order;

/// Name of the discriminator field
pub const TYPE_FIELD: &str = "_type";

/// A message type with a stable discriminator
pub trait TypedMessage: Serialize + DeserializeOwned {
    const TYPE_ID: &'static str;
}

impl TypedMessage for Order {
    const TYPE_ID: &'static str = "Order";
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no '_type' discriminator")]
    MissingType,

    #[error("type mismatch: expected '{expected}', found '{found}'")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },
}

#[derive(Serialize)]
struct Tagged<'a, T> {
    #[serde(rename = "_type")]
    type_id: &'static str,
    #[serde(flatten)]
    body: &'a T,
}

/// Encode a message with its discriminator
pub fn encode<T: TypedMessage>(message: &T) -> Result<String, CodecError> {
    let tagged = Tagged {
        type_id: T::TYPE_ID,
        body: message,
    };
    Ok(serde_json::to_string(&tagged)?)
}

/// Decode a payload, checking the discriminator first
pub fn decode<T: TypedMessage>(payload: &str) -> Result<T, CodecError> {
    let value: serde_json::Value = serde_json::from_str(payload)?;
    let serde_json::Value::Object(mut fields) = value else {
        return Err(CodecError::NotAnObject);
    };

    match fields.remove(TYPE_FIELD) {
        Some(serde_json::Value::String(found)) if found == T::TYPE_ID => {}
        Some(serde_json::Value::String(found)) => {
            return Err(CodecError::TypeMismatch {
                expected: T::TYPE_ID,
                found,
            })
        }
        Some(_) | None => return Err(CodecError::MissingType),
    }

    Ok(serde_json::from_value(serde_json::Value::Object(fields))?)
}
