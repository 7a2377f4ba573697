//! Native modules in shared libraries
//!
//! `require(id)` looks for `<id>.<platform library extension>` in the module
//! directory, opens it and calls `init_<id>` for the module exports. The library
//! stays loaded until the module object and every one of its methods are collected.

use std::cell::RefCell;
use std::env::consts::DLL_EXTENSION;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use libloading::{Library, Symbol};

use super::modules::{ModuleAttr, ModuleDefinition, ModuleHandle, ModuleMethod};
use super::registry::{CallScope, NativeFn};
use crate::bindings::protocol::{Args, WireValue};
use crate::core::{BridgeError, BridgeResult};

/// What a library's initializer returns.
///
/// Both sides must be built by the same compiler, since the struct crosses the
/// boundary by pointer.
pub struct ModuleExports {
    pub methods: Vec<ModuleMethod>,
    pub attributes: Vec<ModuleAttr>,
    /// Called with the module id when the module is collected, while the
    /// library is still loaded.
    pub on_unload: Option<Box<dyn Fn(&str)>>,
}

/// Signature of `init_<id>`. Returns a `Box<ModuleExports>` turned into a raw
/// pointer, or null to decline.
pub type ModuleInit = unsafe extern "C" fn() -> *mut ModuleExports;

/// `<home>/<id>.<DLL_EXTENSION>`
pub fn library_path(home: &Path, id: &str) -> PathBuf {
    home.join(format!("{id}.{DLL_EXTENSION}"))
}

/// Initializer symbol for a module id. Characters that cannot appear in a
/// symbol name become `_`.
pub fn init_symbol(id: &str) -> String {
    let name: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("init_{name}")
}

/// A method whose code lives in a loaded library. Field order matters: the
/// function is dropped before the library reference.
struct LibraryBound {
    function: Rc<NativeFn>,
    _library: Rc<Library>,
}

impl LibraryBound {
    fn call(&self, scope: &CallScope<'_>, args: &Args) -> BridgeResult<WireValue> {
        (self.function)(scope, args)
    }
}

fn bind_to_library(method: ModuleMethod, library: &Rc<Library>) -> ModuleMethod {
    let bound = LibraryBound {
        function: method.function,
        _library: Rc::clone(library),
    };
    ModuleMethod {
        name: method.name,
        arity: method.arity,
        function: Rc::new(move |scope: &CallScope<'_>, args: &Args| bound.call(scope, args)),
    }
}

/// Open `path` and run its initializer.
///
/// `Ok(None)` when there is no such file or the initializer returns null. A
/// file that cannot be opened or lacks the initializer is an error.
pub(crate) fn load_library_module(path: &Path, id: &str) -> BridgeResult<Option<ModuleDefinition>> {
    if !path.is_file() {
        return Ok(None);
    }

    let library = unsafe { Library::new(path) }
        .map(Rc::new)
        .map_err(|e| BridgeError::NativeLibrary(format!("cannot open {}: {e}", path.display())))?;

    let symbol = init_symbol(id);
    let exports = unsafe {
        let init: Symbol<ModuleInit> = library.get(symbol.as_bytes()).map_err(|e| {
            BridgeError::NativeLibrary(format!("{} has no {symbol}: {e}", path.display()))
        })?;
        let raw = init();
        if raw.is_null() {
            tracing::debug!(target: "bridge.module", %symbol, "initializer declined");
            return Ok(None);
        }
        Box::from_raw(raw)
    };

    let ModuleExports {
        methods,
        attributes,
        on_unload,
    } = *exports;
    let methods = methods
        .into_iter()
        .map(|method| bind_to_library(method, &library))
        .collect();

    tracing::info!(target: "bridge.module", %id, path = %path.display(), "loaded native library");
    // the hook's code lives in the library, so it must be gone before the last reference
    let on_unload = RefCell::new(on_unload);
    let handle: ModuleHandle = library;
    Ok(Some(ModuleDefinition {
        id: id.to_string(),
        handle,
        methods,
        attributes,
        finalizer: Some(Rc::new(move |id: &str, library: ModuleHandle| {
            if let Some(hook) = on_unload.borrow_mut().take() {
                hook(id);
            }
            tracing::debug!(target: "bridge.module", %id, "unloading native library");
            drop(library);
        })),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_names() {
        assert_eq!(init_symbol("m"), "init_m");
        assert_eq!(init_symbol("net/http-client"), "init_net_http_client");
    }

    #[test]
    fn test_library_path_uses_platform_extension() {
        let path = library_path(Path::new("/opt/modules"), "m");
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some(DLL_EXTENSION));
        assert_eq!(path.file_stem().and_then(|s| s.to_str()), Some("m"));
    }

    #[test]
    fn test_missing_library_declines() {
        let dir = tempfile::tempdir().unwrap();
        let path = library_path(dir.path(), "absent");
        assert!(matches!(load_library_module(&path, "absent"), Ok(None)));
    }

    #[test]
    fn test_non_library_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = library_path(dir.path(), "fake");
        std::fs::write(&path, b"not a shared object").unwrap();
        let err = load_library_module(&path, "fake").unwrap_err();
        assert!(matches!(err, BridgeError::NativeLibrary(_)));
        assert_eq!(err.status(), -11);
    }
}
