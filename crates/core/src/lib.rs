// orderq Core - Domain Logic & Ports
// No infrastructure dependencies: storage and transport live in adapter crates

pub mod application;
pub mod codec;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
