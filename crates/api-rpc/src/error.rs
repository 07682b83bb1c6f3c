//! RPC Error Types
//!
//! Maps application and publish errors to JSON-RPC error codes.

use jsonrpsee::types::ErrorObjectOwned;
use orderq_core::application::PublishError;
use orderq_core::error::AppError;

/// RPC Error Codes
pub mod code {
    pub const INVALID_INPUT: i32 = 4000;
    pub const CONFLICT: i32 = 4002;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
    pub const BROKER_UNAVAILABLE: i32 = 5003;
}

fn error_object(code: i32, msg: impl Into<String>) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.into(), None::<()>)
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    match err {
        AppError::Validation(msg) => error_object(code::INVALID_INPUT, msg),
        AppError::Domain(e) => error_object(code::INVALID_INPUT, e.to_string()),
        AppError::InvalidState(msg) => error_object(code::CONFLICT, msg),
        AppError::Database(msg) => error_object(code::DB_ERROR, msg),
        AppError::Codec(e) => error_object(code::INTERNAL_ERROR, e.to_string()),
        AppError::Config(msg) | AppError::Internal(msg) => error_object(code::INTERNAL_ERROR, msg),
    }
}

/// Convert PublishError from `orders.create.v1` to JSON-RPC ErrorObject
pub fn publish_error_to_rpc(err: PublishError) -> ErrorObjectOwned {
    let code = match &err {
        PublishError::InvalidInput(_) => code::INVALID_INPUT,
        PublishError::BrokerUnavailable(_) => code::BROKER_UNAVAILABLE,
        PublishError::Serialization(_) => code::INTERNAL_ERROR,
    };
    error_object(code, format!("Error creating order: {}", err))
}
