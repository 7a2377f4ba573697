//! `require()` and the module cache
//!
//! Lookup order for a canonical id, inside the module home directory:
//!
//! 1. an id ending in `.js` names a script file directly;
//! 2. an id ending in `.json` is parsed and the value becomes the exports;
//! 3. `<id>.js`;
//! 4. `<id>.<dll extension>`, initialized through `init_<id>`;
//! 5. the module loaders, in registration order;
//!
//! and otherwise `Error("module not found: <id>")`, or the library error when
//! step 4 found a file it could not use. Script modules are CommonJS: the
//! source runs as the body of `function (exports, require, module)`.
//!
//! `x` and `x.js` share one cache entry under `x`.

use std::path::Path;
use std::rc::Rc;

use rquickjs::{Coerced, Ctx, Function, Object, Persistent, Value};

use super::dylib;
use super::env::BridgeState;
use super::file;
use super::handles::Handle;
use super::modules::{build_module_object, ModuleDefinition, ModuleLoader};
use super::registry::CallScope;
use crate::core::{BridgeError, BridgeResult};

/// Canonical form of `id` as seen from module `parent` (empty for top level).
///
/// Relative ids (`./x`, `../x`) start from the parent's directory. Returns
/// `None` for an empty id or one that climbs above the module home.
pub fn resolve_id(parent: &str, id: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    if id.starts_with("./") || id.starts_with("../") {
        segments.extend(parent.split('/').filter(|s| !s.is_empty()));
        segments.pop();
    }
    for segment in id.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            name => segments.push(name),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Cache key for a canonical id, and whether the id named a script file.
pub fn cache_key(canonical: &str) -> (&str, bool) {
    match canonical.strip_suffix(".js") {
        Some(stem) if !stem.is_empty() && !stem.ends_with('/') => (stem, true),
        _ => (canonical, false),
    }
}

fn engine_error(id: &str) -> impl Fn(rquickjs::Error) -> BridgeError + '_ {
    move |e| BridgeError::Binding(format!("module {id}: {e}"))
}

/// Install `require`, `require.cache` and `readFile` into the global object.
pub(crate) fn install<'js>(ctx: &Ctx<'js>, state: &Rc<BridgeState>) -> BridgeResult<()> {
    let init = |e: rquickjs::Error| BridgeError::Init(format!("require: {e}"));

    let cache = Object::new(ctx.clone()).map_err(init)?;
    *state.module_cache.borrow_mut() = Some(Persistent::save(ctx, cache));

    let require = make_require(ctx, state, "")?;
    let globals = ctx.globals();
    globals.set("require", require).map_err(init)?;

    let reader_state = Rc::clone(state);
    let read_file = Function::new(ctx.clone(), move |path: Coerced<String>| -> Option<String> {
        let local = reader_state.reader.borrow().clone();
        match file::read_source(local.as_ref(), Path::new(&path.0)) {
            Ok(source) => Some(source),
            Err(e) => {
                tracing::debug!(target: "bridge.module", "readFile: {e}");
                None
            }
        }
    })
    .map_err(init)?;
    globals.set("readFile", read_file).map_err(init)?;
    Ok(())
}

/// A `require` function resolving relative ids against `parent`.
fn make_require<'js>(ctx: &Ctx<'js>, state: &Rc<BridgeState>, parent: &str) -> BridgeResult<Function<'js>> {
    let require_state = Rc::clone(state);
    let parent = parent.to_string();
    let scope = CallScope::new(ctx.clone(), Rc::clone(state));
    let require = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, id: Coerced<String>| -> rquickjs::Result<Value<'js>> {
            let scope = CallScope::new(ctx, Rc::clone(&require_state));
            scope
                .require_from(&parent, &id.0)
                .map_err(|err| scope.throw("require", err))
        },
    )
    .map_err(engine_error("require"))?;

    if let Some(object) = require.as_value().as_object() {
        object
            .set("cache", scope.module_cache()?)
            .map_err(engine_error("require"))?;
    }
    Ok(require)
}

impl<'js> CallScope<'js> {
    pub(crate) fn module_cache(&self) -> BridgeResult<Object<'js>> {
        let cache = self
            .state()
            .module_cache
            .borrow()
            .clone()
            .ok_or_else(|| BridgeError::Init("module cache is not installed".to_string()))?;
        cache
            .restore(self.ctx())
            .map_err(|e| BridgeError::Init(format!("module cache: {e}")))
    }

    /// Resolve and load `id` on behalf of module `parent`, returning its exports.
    pub(crate) fn require_from(&self, parent: &str, id: &str) -> BridgeResult<Value<'js>> {
        let canonical = resolve_id(parent, id).ok_or_else(|| BridgeError::ModuleNotFound(id.to_string()))?;
        let (key, script_file) = cache_key(&canonical);
        let cache = self.module_cache()?;
        let cached: Option<Object> = cache.get(key).map_err(engine_error(key))?;
        if let Some(record) = cached {
            return record.get("exports").map_err(engine_error(key));
        }

        let home = self.state().module_home.clone();

        if script_file {
            return match self.read_source(&home.join(&canonical)) {
                Ok(source) => self.load_script(&cache, key, &source),
                Err(e) => {
                    tracing::debug!(target: "bridge.module", id = %canonical, "{e}");
                    Err(BridgeError::ModuleNotFound(canonical))
                }
            };
        }

        if key.ends_with(".json") {
            return match self.read_source(&home.join(key)) {
                Ok(source) => self.load_json(&cache, key, source),
                Err(e) => {
                    tracing::debug!(target: "bridge.module", id = %key, "{e}");
                    Err(BridgeError::ModuleNotFound(canonical))
                }
            };
        }

        match self.read_source(&home.join(format!("{key}.js"))) {
            Ok(source) => return self.load_script(&cache, key, &source),
            Err(e) => tracing::trace!(target: "bridge.module", id = %key, "{e}"),
        }

        let library = dylib::library_path(&home, key);
        let mut library_error = None;
        match dylib::load_library_module(&library, key) {
            Ok(Some(definition)) => return self.load_native(&cache, definition),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(target: "bridge.module", id = %key, "{e}");
                library_error = Some(e);
            }
        }

        let loaders: Vec<Rc<ModuleLoader>> = self.state().loaders.borrow().clone();
        let selection = self.state().config.loader_selection;
        for loader in loaders {
            if !selection.admits(loader.selector(), key) {
                continue;
            }
            if let Some(definition) = loader.instantiate(&home, key) {
                tracing::debug!(target: "bridge.module", id = %key, selector = loader.selector(), "loader accepted");
                return self.load_native(&cache, definition);
            }
        }

        Err(library_error.unwrap_or_else(|| BridgeError::ModuleNotFound(key.to_string())))
    }

    fn module_record(&self, id: &str, exports: Value<'js>, loaded: bool) -> BridgeResult<Object<'js>> {
        let record = Object::new(self.ctx().clone()).map_err(engine_error(id))?;
        record.set("id", id).map_err(engine_error(id))?;
        record.set("exports", exports).map_err(engine_error(id))?;
        record.set("loaded", loaded).map_err(engine_error(id))?;
        Ok(record)
    }

    fn load_script(&self, cache: &Object<'js>, id: &str, source: &str) -> BridgeResult<Value<'js>> {
        let wrapped = format!("(function (exports, require, module) {{\n{source}\n}})");
        self.check_syntax(id, &wrapped)?;
        let wrapper: Value = self.ctx().eval(wrapped).map_err(|e| self.fail(id, e))?;
        let wrapper = wrapper.into_function().ok_or_else(|| BridgeError::Compile {
            context: id.to_string(),
            message: "module source did not compile to a function".to_string(),
        })?;

        let exports = Object::new(self.ctx().clone()).map_err(engine_error(id))?;
        let module = self.module_record(id, exports.clone().into_value(), false)?;
        // registered before running, so a cycle sees the partial exports
        cache.set(id, module.clone()).map_err(engine_error(id))?;

        let require = make_require(self.ctx(), self.state(), id)?;
        let outcome: rquickjs::Result<Value> = wrapper.call((exports, require, module.clone()));
        if let Err(e) = outcome {
            let error = self.fail(id, e);
            cache.remove(id).map_err(engine_error(id))?;
            return Err(error);
        }

        module.set("loaded", true).map_err(engine_error(id))?;
        tracing::debug!(target: "bridge.module", %id, "loaded script module");
        module.get("exports").map_err(engine_error(id))
    }

    fn load_json(&self, cache: &Object<'js>, id: &str, source: String) -> BridgeResult<Value<'js>> {
        let exports = self
            .ctx()
            .json_parse(source)
            .map_err(|e| self.fail_compile(id, e))?;
        let module = self.module_record(id, exports.clone(), true)?;
        cache.set(id, module).map_err(engine_error(id))?;
        Ok(exports)
    }

    fn load_native(&self, cache: &Object<'js>, definition: ModuleDefinition) -> BridgeResult<Value<'js>> {
        let id = definition.id.clone();
        let exports = build_module_object(self.ctx(), self.state(), definition)?.into_value();
        let module = self.module_record(&id, exports.clone(), true)?;
        cache.set(id.as_str(), module).map_err(engine_error(&id))?;
        Ok(exports)
    }

    /// Host-side `require`: load `id` (or take it from the cache) and pin its exports.
    pub fn load_module(&self, id: &str) -> BridgeResult<Handle> {
        let exports = self.require_from("", id)?;
        Ok(self.state().handles.borrow_mut().pin(self.ctx(), exports))
    }

    /// Drop `id` from the module cache. Once nothing else references the
    /// module it becomes collectable and its finalizer runs.
    pub fn forget_module(&self, id: &str) -> BridgeResult<bool> {
        let Some(canonical) = resolve_id("", id) else {
            return Ok(false);
        };
        let (key, _) = cache_key(&canonical);
        let cache = self.module_cache()?;
        let present = cache.contains_key(key).map_err(engine_error(key))?;
        if present {
            cache.remove(key).map_err(engine_error(key))?;
            tracing::debug!(target: "bridge.module", id = %key, "forgot module");
        }
        Ok(present)
    }

    /// Canonical ids currently in the module cache.
    pub fn loaded_modules(&self) -> BridgeResult<Vec<String>> {
        let cache = self.module_cache()?;
        let mut ids = cache
            .keys::<String>()
            .collect::<rquickjs::Result<Vec<_>>>()
            .map_err(engine_error("cache"))?;
        ids.sort();
        Ok(ids)
    }
}
