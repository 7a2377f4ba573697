//! # Script Bridge
//!
//! A bidirectional bridge between host code and an embedded JavaScript engine
//! (QuickJS via `rquickjs`).
//!
//! ## Features
//!
//! - **Native functions**: expose Rust closures to scripts with a declared arity
//! - **Script calls**: evaluate source, call global functions, call compiled files
//! - **Handles**: keep script functions alive in host code and call them later
//! - **Modules**: CommonJS `require()` with script, JSON, shared-library and
//!   host-provided native modules, each with an optional finalizer
//!
//! ## Example
//!
//! ```no_run
//! use script_bridge::{Args, Environment, WireValue};
//!
//! let env = Environment::with_module_root("/opt/app")?;
//! env.register_function("add", 2, |_scope, args| {
//!     Ok(WireValue::Double(args.number(0)? + args.number(1)?))
//! })?;
//!
//! let sum = env.call_function("add", &Args::new(vec![3.0.into(), 4.0.into()]), |r| r.to_owned())?;
//! assert_eq!(sum, WireValue::Double(7.0));
//! # Ok::<(), script_bridge::BridgeError>(())
//! ```
//!
//! ## Modules
//!
//! - [`core`]: errors, status codes, logging
//! - [`config`]: configuration
//! - [`bindings`]: wire protocol and value codec
//! - [`scripting`]: environments, native functions, handles, modules

/// Error types, status codes and logging setup
pub mod core;
/// Configuration system
pub mod config;
/// Wire protocol and value codec
pub mod bindings;
/// Script environments and interop
pub mod scripting;

pub use bindings::protocol::{ArgFormat, Args, ResultType, ResultView, WireValue};
pub use config::{BridgeConfig, LoaderSelection, LogLevel, LoggingConfig};
pub use core::{init_logging, BridgeError, BridgeResult, FileReadError, STATUS_OK};
pub use scripting::{
    reset_file_reader, set_file_reader, Arity, CallScope, DefaultFileReader, Environment,
    FileReader, Handle, ModuleAttr, ModuleDefinition, ModuleExports, ModuleFinalizer,
    ModuleHandle, ModuleInit, ModuleLoader, ModuleMethod,
};
