//! Native modules
//!
//! A native module is an engine object populated from host-side
//! [`ModuleMethod`]s and [`ModuleAttr`]s. Module objects may carry a
//! finalizer; it runs exactly once, when the engine reclaims the object (or
//! when the environment is dropped, whichever comes first).

use std::any::Any;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use rquickjs::object::Property;
use rquickjs::{Ctx, Function, Object};

use super::env::BridgeState;
use super::handles::Handle;
use super::registry::{make_trampoline, Arity, CallScope, NativeFn};
use crate::bindings::codec;
use crate::bindings::protocol::{Args, WireValue};
use crate::core::{BridgeError, BridgeResult};

/// Hidden property holding a module's finalizer guard.
const FINALIZER_KEY: &str = "__bridge_finalizer__";

/// Host state behind a module object, handed back to its finalizer.
pub type ModuleHandle = Rc<dyn Any>;

/// Called with the module id and handle once the module object is reclaimed.
pub type ModuleFinalizer = Rc<dyn Fn(&str, ModuleHandle)>;

type LoadFn = dyn Fn(&Path, &str) -> Option<ModuleHandle>;
type MethodsFn = dyn Fn(&str, &ModuleHandle) -> Vec<ModuleMethod>;
type AttrsFn = dyn Fn(&str, &ModuleHandle) -> Vec<ModuleAttr>;

/// A native function installed on a module object.
#[derive(Clone)]
pub struct ModuleMethod {
    pub name: String,
    pub arity: Arity,
    pub function: Rc<NativeFn>,
}

impl ModuleMethod {
    pub fn new<F>(name: impl Into<String>, arity: impl Into<Arity>, function: F) -> Self
    where
        F: Fn(&CallScope<'_>, &Args) -> BridgeResult<WireValue> + 'static,
    {
        Self {
            name: name.into(),
            arity: arity.into(),
            function: Rc::new(function),
        }
    }
}

impl fmt::Debug for ModuleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleMethod")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// A constant installed on a module object.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleAttr {
    pub name: String,
    pub value: WireValue,
}

impl ModuleAttr {
    pub fn new(name: impl Into<String>, value: impl Into<WireValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Everything needed to build one module object.
pub struct ModuleDefinition {
    pub id: String,
    pub handle: ModuleHandle,
    pub methods: Vec<ModuleMethod>,
    pub attributes: Vec<ModuleAttr>,
    pub finalizer: Option<ModuleFinalizer>,
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("id", &self.id)
            .field("methods", &self.methods)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

impl ModuleDefinition {
    pub fn new(id: impl Into<String>, handle: ModuleHandle) -> Self {
        Self {
            id: id.into(),
            handle,
            methods: Vec::new(),
            attributes: Vec::new(),
            finalizer: None,
        }
    }

    pub fn with_method(mut self, method: ModuleMethod) -> Self {
        self.methods.push(method);
        self
    }

    pub fn with_attribute(mut self, attribute: ModuleAttr) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_finalizer(mut self, finalizer: impl Fn(&str, ModuleHandle) + 'static) -> Self {
        self.finalizer = Some(Rc::new(finalizer));
        self
    }
}

/// One entry of the loader registry consulted by `require()`.
///
/// `load` receives the module home directory and the module id and returns
/// `None` to decline. The selector is recorded with the loader; whether it
/// restricts lookups depends on [`LoaderSelection`](crate::config::LoaderSelection).
pub struct ModuleLoader {
    selector: String,
    load: Box<LoadFn>,
    methods: Option<Box<MethodsFn>>,
    attributes: Option<Box<AttrsFn>>,
    finalizer: Option<ModuleFinalizer>,
}

impl ModuleLoader {
    pub fn new(
        selector: impl Into<String>,
        load: impl Fn(&Path, &str) -> Option<ModuleHandle> + 'static,
    ) -> Self {
        Self {
            selector: selector.into(),
            load: Box::new(load),
            methods: None,
            attributes: None,
            finalizer: None,
        }
    }

    pub fn with_methods(
        mut self,
        methods: impl Fn(&str, &ModuleHandle) -> Vec<ModuleMethod> + 'static,
    ) -> Self {
        self.methods = Some(Box::new(methods));
        self
    }

    pub fn with_attributes(
        mut self,
        attributes: impl Fn(&str, &ModuleHandle) -> Vec<ModuleAttr> + 'static,
    ) -> Self {
        self.attributes = Some(Box::new(attributes));
        self
    }

    pub fn with_finalizer(mut self, finalizer: impl Fn(&str, ModuleHandle) + 'static) -> Self {
        self.finalizer = Some(Rc::new(finalizer));
        self
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Run the loader for `id`, collecting methods and attributes on success.
    pub(crate) fn instantiate(&self, home: &Path, id: &str) -> Option<ModuleDefinition> {
        let handle = (self.load)(home, id)?;
        let methods = self
            .methods
            .as_ref()
            .map(|methods| methods(id, &handle))
            .unwrap_or_default();
        let attributes = self
            .attributes
            .as_ref()
            .map(|attributes| attributes(id, &handle))
            .unwrap_or_default();
        Some(ModuleDefinition {
            id: id.to_string(),
            handle,
            methods,
            attributes,
            finalizer: self.finalizer.clone(),
        })
    }
}

impl fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("selector", &self.selector)
            .field("methods", &self.methods.is_some())
            .field("attributes", &self.attributes.is_some())
            .field("finalizer", &self.finalizer.is_some())
            .finish_non_exhaustive()
    }
}

/// Owned by the module object; runs the finalizer when the engine drops it.
struct FinalizeGuard {
    id: String,
    handle: Option<ModuleHandle>,
    finalizer: ModuleFinalizer,
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(target: "bridge.module", id = %self.id, "finalizing module");
            (self.finalizer)(&self.id, handle);
        }
    }
}

/// Build a module object from `definition`.
pub(crate) fn build_module_object<'js>(
    ctx: &Ctx<'js>,
    state: &Rc<BridgeState>,
    definition: ModuleDefinition,
) -> BridgeResult<Object<'js>> {
    let ModuleDefinition {
        id,
        handle,
        methods,
        attributes,
        finalizer,
    } = definition;
    let binding = |e: rquickjs::Error| BridgeError::Binding(format!("module {id}: {e}"));

    let object = Object::new(ctx.clone()).map_err(binding)?;
    for method in methods {
        let function = make_trampoline(ctx, state, &method.name, method.arity, method.function)
            .map_err(binding)?;
        object.set(method.name.as_str(), function).map_err(binding)?;
    }
    for attribute in attributes {
        let value = codec::encode(ctx, &state.handles, &attribute.value)?;
        object.set(attribute.name.as_str(), value).map_err(binding)?;
    }

    if let Some(finalizer) = finalizer {
        let guard = FinalizeGuard {
            id: id.clone(),
            handle: Some(handle),
            finalizer,
        };
        let keeper = Function::new(ctx.clone(), move || {
            let _held = &guard;
        })
        .map_err(binding)?;
        // non-enumerable, so it stays out of JSON and key listings
        object
            .prop(FINALIZER_KEY, Property::from(keeper))
            .map_err(binding)?;
    }

    tracing::debug!(target: "bridge.module", %id, "built module object");
    Ok(object)
}

impl CallScope<'_> {
    /// Append a loader to the registry consulted by `require()`.
    pub fn add_module_loader(&self, loader: ModuleLoader) {
        tracing::debug!(target: "bridge.module", selector = loader.selector(), "added module loader");
        self.state().loaders.borrow_mut().push(Rc::new(loader));
    }

    /// Build a module object without a loader lookup and pin it.
    ///
    /// The handle can be passed to scripts as `WireValue::Function`. Releasing
    /// it makes the object collectable, which runs the finalizer.
    pub fn create_module(&self, definition: ModuleDefinition) -> BridgeResult<Handle> {
        let object = build_module_object(self.ctx(), self.state(), definition)?;
        let handle = self
            .state()
            .handles
            .borrow_mut()
            .pin(self.ctx(), object.into_value());
        Ok(handle)
    }

    pub fn module_loader_count(&self) -> usize {
        self.state().loaders.borrow().len()
    }
}
