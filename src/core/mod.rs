//! Core module
//!
//! - `error` - bridge error types and status codes
//! - `logging` - tracing subscriber setup
//! - `macros` - shared helper macros

pub mod error;
pub mod logging;
#[macro_use]
pub mod macros;

pub use error::{BridgeError, BridgeResult, FileReadError, STATUS_OK};
pub use logging::init_logging;
