//! Script environment
//!
//! An [`Environment`] owns one QuickJS runtime and context together with the
//! bridge state: handle store, native function registry, module loaders and
//! module cache. Everything is released when the environment is dropped.
//!
//! Environments are single-threaded. Create one per thread when several
//! scripts must run concurrently.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use rquickjs::{Context, Object, Persistent, Runtime};

use super::console;
use super::file::FileReader;
use super::handles::{Handle, HandleStore};
use super::modules::{ModuleDefinition, ModuleLoader};
use super::registry::{Arity, CallScope, FunctionRegistry, Thrown};
use super::require;
use crate::bindings::protocol::{Args, ResultView, WireValue};
use crate::config::BridgeConfig;
use crate::core::{BridgeError, BridgeResult};

/// State shared between an environment and the native closures it installs.
pub(crate) struct BridgeState {
    pub(crate) config: BridgeConfig,
    pub(crate) module_home: PathBuf,
    pub(crate) handles: RefCell<HandleStore>,
    pub(crate) functions: RefCell<FunctionRegistry>,
    pub(crate) loaders: RefCell<Vec<Rc<ModuleLoader>>>,
    pub(crate) reader: RefCell<Option<Arc<dyn FileReader>>>,
    pub(crate) module_cache: RefCell<Option<Persistent<Object<'static>>>>,
    /// Error raised by a native function, kept until its exception reaches the host.
    pub(crate) thrown: RefCell<Option<Thrown>>,
}

impl BridgeState {
    fn new(config: BridgeConfig) -> Self {
        let module_home = config.module_home();
        Self {
            config,
            module_home,
            handles: RefCell::new(HandleStore::new()),
            functions: RefCell::new(FunctionRegistry::new()),
            loaders: RefCell::new(Vec::new()),
            reader: RefCell::new(None),
            module_cache: RefCell::new(None),
            thrown: RefCell::new(None),
        }
    }

    /// Drop every engine reference held from the Rust side.
    fn release_engine_refs(&self) {
        self.handles.borrow_mut().clear();
        self.module_cache.borrow_mut().take();
        self.loaders.borrow_mut().clear();
        self.thrown.borrow_mut().take();
    }
}

/// One isolated script engine instance plus the bridge registries.
pub struct Environment {
    // drop order: state, then context, then runtime
    state: Rc<BridgeState>,
    context: Context,
    runtime: Runtime,
}

impl Environment {
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;

        let runtime = Runtime::new().map_err(|e| BridgeError::Init(format!("runtime: {e}")))?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        if let Some(threshold) = config.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }
        let context = Context::full(&runtime).map_err(|e| BridgeError::Init(format!("context: {e}")))?;

        let state = Rc::new(BridgeState::new(config));
        context.with(|ctx| -> BridgeResult<()> {
            if state.config.console {
                console::install(&ctx).map_err(|e| BridgeError::Init(format!("console: {e}")))?;
            }
            require::install(&ctx, &state)
        })?;

        tracing::info!(
            target: "bridge",
            module_home = %state.module_home.display(),
            loader_selection = ?state.config.loader_selection,
            "script environment created"
        );
        Ok(Self {
            state,
            context,
            runtime,
        })
    }

    /// Environment with default settings whose modules live under `root`.
    pub fn with_module_root(root: impl Into<PathBuf>) -> BridgeResult<Self> {
        Self::new(BridgeConfig::with_module_root(root))
    }

    /// Run `f` with a scope on this environment.
    ///
    /// Do not call back into the `Environment` from inside `f`; use the scope.
    pub fn scope<R>(&self, f: impl FnOnce(&CallScope<'_>) -> R) -> R {
        // whatever a script caught during an earlier operation is gone by now
        self.state.thrown.borrow_mut().take();
        self.context
            .with(|ctx| f(&CallScope::new(ctx, Rc::clone(&self.state))))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.state.config
    }

    /// Directory searched by `require()`.
    pub fn module_home(&self) -> &Path {
        &self.state.module_home
    }

    /// Use `reader` for this environment instead of the process-wide reader.
    pub fn set_file_reader(&self, reader: impl FileReader + 'static) {
        *self.state.reader.borrow_mut() = Some(Arc::new(reader));
    }

    /// Fall back to the process-wide reader.
    pub fn clear_file_reader(&self) {
        self.state.reader.borrow_mut().take();
    }

    pub fn register_function<F>(&self, name: &str, arity: impl Into<Arity>, function: F) -> BridgeResult<()>
    where
        F: Fn(&CallScope<'_>, &Args) -> BridgeResult<WireValue> + 'static,
    {
        let arity = arity.into();
        self.scope(|scope| scope.register_function(name, arity, function))
    }

    pub fn unregister_native_function(&self, name: &str) -> BridgeResult<()> {
        self.scope(|scope| scope.unregister_native_function(name))
    }

    pub fn register_code_function(&self, source: &str, name: &str) -> BridgeResult<()> {
        self.scope(|scope| scope.register_code_function(source, name))
    }

    pub fn register_file_function(&self, path: impl AsRef<Path>, name: &str) -> BridgeResult<()> {
        self.scope(|scope| scope.register_file_function(path, name))
    }

    pub fn unregister_function(&self, name: &str) -> BridgeResult<()> {
        self.scope(|scope| scope.unregister_function(name))
    }

    pub fn registered_functions(&self) -> Vec<String> {
        self.scope(|scope| scope.registered_functions())
    }

    /// Call a global function. `on_result` runs exactly once, before this returns.
    pub fn call_function<R>(
        &self,
        name: &str,
        args: &Args,
        on_result: impl FnOnce(ResultView<'_>) -> R,
    ) -> BridgeResult<R> {
        self.scope(|scope| scope.call_function(name, args, on_result))
    }

    pub fn call_file_function<R>(
        &self,
        path: impl AsRef<Path>,
        args: &Args,
        on_result: impl FnOnce(ResultView<'_>) -> R,
    ) -> BridgeResult<R> {
        self.scope(|scope| scope.call_file_function(path, args, on_result))
    }

    pub fn eval(&self, source: &str) -> BridgeResult<WireValue> {
        self.scope(|scope| scope.eval(source))
    }

    pub fn eval_with<R>(&self, source: &str, on_result: impl FnOnce(ResultView<'_>) -> R) -> BridgeResult<R> {
        self.scope(|scope| scope.eval_with(source, on_result))
    }

    pub fn eval_file(&self, path: impl AsRef<Path>) -> BridgeResult<WireValue> {
        self.scope(|scope| scope.eval_file(path))
    }

    pub fn eval_file_with<R>(
        &self,
        path: impl AsRef<Path>,
        on_result: impl FnOnce(ResultView<'_>) -> R,
    ) -> BridgeResult<R> {
        self.scope(|scope| scope.eval_file_with(path, on_result))
    }

    pub fn call_handle<R>(
        &self,
        handle: Handle,
        args: &Args,
        on_result: impl FnOnce(ResultView<'_>) -> R,
    ) -> BridgeResult<R> {
        self.scope(|scope| scope.call_handle(handle, args, on_result))
    }

    pub fn release_handle(&self, handle: Handle) -> BridgeResult<()> {
        self.scope(|scope| scope.release_handle(handle))
    }

    pub fn is_handle_live(&self, handle: Handle) -> bool {
        self.state.handles.borrow().contains(handle)
    }

    pub fn pinned_count(&self) -> usize {
        self.state.handles.borrow().len()
    }

    pub fn add_module_loader(&self, loader: ModuleLoader) {
        self.scope(|scope| scope.add_module_loader(loader))
    }

    pub fn module_loader_count(&self) -> usize {
        self.state.loaders.borrow().len()
    }

    pub fn create_module(&self, definition: ModuleDefinition) -> BridgeResult<Handle> {
        self.scope(|scope| scope.create_module(definition))
    }

    pub fn load_module(&self, id: &str) -> BridgeResult<Handle> {
        self.scope(|scope| scope.load_module(id))
    }

    pub fn forget_module(&self, id: &str) -> BridgeResult<bool> {
        self.scope(|scope| scope.forget_module(id))
    }

    pub fn loaded_modules(&self) -> BridgeResult<Vec<String>> {
        self.scope(|scope| scope.loaded_modules())
    }

    /// Run a full garbage collection. Unreachable module objects are
    /// finalized here.
    pub fn run_gc(&self) {
        self.runtime.run_gc();
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        // Persistent values must go before the runtime they belong to.
        self.state.release_engine_refs();
        tracing::debug!(target: "bridge", "script environment destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        let dir = std::env::temp_dir();
        Environment::with_module_root(dir).unwrap()
    }

    #[test]
    fn test_environment_creation() {
        let env = env();
        assert_eq!(env.pinned_count(), 0);
        assert_eq!(env.module_loader_count(), 0);
        assert!(env.module_home().ends_with("modules"));
        assert_eq!(env.eval("1 + 1").unwrap(), WireValue::Double(2.0));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = BridgeConfig::default();
        config.modules_dir = String::new();
        assert!(matches!(
            Environment::new(config),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_console_can_be_disabled() {
        let mut config = BridgeConfig::with_module_root(std::env::temp_dir());
        config.console = false;
        let env = Environment::new(config).unwrap();
        assert_eq!(
            env.eval("typeof console + typeof print").unwrap(),
            WireValue::LString("undefinedundefined".into())
        );
        assert_eq!(
            env.eval("typeof require").unwrap(),
            WireValue::LString("function".into())
        );
    }

    #[test]
    fn test_globals_installed() {
        let env = env();
        let kinds = env
            .eval("[typeof print, typeof console.log, typeof require, typeof require.cache, typeof readFile]")
            .unwrap();
        assert_eq!(
            kinds,
            WireValue::Array(r#"["function","function","function","object","function"]"#.into())
        );
    }

    #[test]
    fn test_memory_limit_applies() {
        let mut config = BridgeConfig::with_module_root(std::env::temp_dir());
        config.memory_limit = Some(4 * 1024 * 1024);
        let env = Environment::new(config).unwrap();
        let err = env
            .eval("var a = []; for (;;) { a.push(new Array(100000).fill(1)); }")
            .unwrap_err();
        assert!(matches!(err, BridgeError::Runtime { .. }));
    }

    #[test]
    fn test_drop_releases_pins() {
        let env = env();
        let handle = env
            .eval_with("(function () { return 1; })", |view| match view {
                ResultView::Function(handle) => handle,
                other => panic!("unexpected result {other:?}"),
            })
            .unwrap();
        assert!(env.is_handle_live(handle));
        drop(env);
    }
}
