//! Script environment and interop
//!
//! - [`env`]: the [`Environment`] owning one QuickJS runtime
//! - [`registry`]: native functions, the trampoline and [`CallScope`]
//! - [`handles`]: pinned script values
//! - [`modules`], [`require`], [`dylib`]: `require()` and native modules
//! - [`file`]: how sources are read
//! - [`console`]: `print` and `console.*`

mod console;
pub mod dylib;
pub mod env;
pub mod file;
pub mod handles;
pub mod modules;
pub mod registry;
pub mod require;

pub use dylib::{ModuleExports, ModuleInit};
pub use env::Environment;
pub use file::{reset_file_reader, set_file_reader, DefaultFileReader, FileReader};
pub use handles::Handle;
pub use modules::{ModuleAttr, ModuleDefinition, ModuleFinalizer, ModuleHandle, ModuleLoader, ModuleMethod};
pub use registry::{Arity, CallScope, FunctionRegistry, NativeFn};
