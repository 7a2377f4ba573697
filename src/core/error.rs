//! Unified error handling
//!
//! Every fallible bridge operation returns [`BridgeResult`]. Host callers that
//! speak the C-shaped status protocol use [`BridgeError::status`], which maps
//! each failure class to a small negative integer (0 is reserved for success).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::scripting::handles::Handle;

/// Status reported for a successful call.
pub const STATUS_OK: i32 = 0;

/// Bridge error type
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Supplied source failed to compile.
    #[error("Compile error in {context}: {message}")]
    Compile { context: String, message: String },

    /// A value could not be bound under the requested name.
    #[error("Binding error: {0}")]
    Binding(String),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    /// The text matches the error thrown into scripts by `require()`.
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("Handle not found: {0}")]
    HandleNotFound(Handle),

    /// A called script function threw.
    #[error("Script runtime error in {context}: {message}")]
    Runtime { context: String, message: String },

    /// A native function reported failure.
    #[error("Host function error: {0}")]
    Host(String),

    #[error("Unknown argument tag '{0}'")]
    UnknownTag(char),

    #[error("Argument mismatch: {0}")]
    ArgMismatch(String),

    #[error("Allocation failed while marshaling {0} arguments")]
    Allocation(usize),

    #[error("Native library error: {0}")]
    NativeLibrary(String),

    #[error("Initialization error: {0}")]
    Init(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("File read error: {0}")]
    FileRead(#[from] FileReadError),
}

impl BridgeError {
    /// Status code of the C-shaped interface.
    pub fn status(&self) -> i32 {
        match self {
            BridgeError::Compile { .. } => -1,
            BridgeError::Binding(_) => -2,
            BridgeError::FunctionNotFound(_) => -3,
            BridgeError::ModuleNotFound(_) => -4,
            BridgeError::HandleNotFound(_) => -5,
            BridgeError::Runtime { .. } => -6,
            BridgeError::Host(_) => -7,
            BridgeError::UnknownTag(_) => -8,
            BridgeError::ArgMismatch(_) => -9,
            BridgeError::Allocation(_) => -10,
            BridgeError::NativeLibrary(_) => -11,
            BridgeError::Init(_) => -12,
            BridgeError::Config(_) => -13,
            BridgeError::FileRead(e) => e.status(),
        }
    }

    /// Shorthand for errors raised by host functions.
    pub fn host(message: impl Into<String>) -> Self {
        BridgeError::Host(message.into())
    }
}

/// Source file read failures, split by the step that failed.
#[derive(Error, Debug)]
pub enum FileReadError {
    #[error("cannot stat {path}: {source}")]
    Stat { path: PathBuf, source: io::Error },

    #[error("{path} has no content")]
    Empty { path: PathBuf },

    #[error("cannot allocate {size} bytes for {path}")]
    Alloc { path: PathBuf, size: u64 },

    #[error("cannot open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("{path} is not valid UTF-8")]
    Utf8 { path: PathBuf },

    /// Raised by custom readers.
    #[error("{path}: {message}")]
    Custom { path: PathBuf, message: String },
}

impl FileReadError {
    pub fn status(&self) -> i32 {
        match self {
            FileReadError::Stat { .. } => -20,
            FileReadError::Empty { .. } => -21,
            FileReadError::Alloc { .. } => -22,
            FileReadError::Open { .. } => -23,
            FileReadError::Read { .. } => -24,
            FileReadError::Custom { .. } => -25,
            FileReadError::Utf8 { .. } => -26,
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
