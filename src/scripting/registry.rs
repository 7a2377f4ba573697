//! Native function registry
//!
//! Every native function is exposed to scripts through one trampoline that
//! decodes the engine's call arguments into [`Args`], runs the host closure
//! with a [`CallScope`], and encodes the returned [`WireValue`].
//!
//! [`CallScope`] is also how host code talks to an environment: the
//! [`Environment`](super::Environment) methods open a scope for the duration
//! of one operation, and native functions receive the scope of the call that
//! reached them so they can re-enter the same engine.

use std::collections::HashMap;
use std::ffi::CString;
use std::path::Path;
use std::rc::Rc;

use rquickjs::prelude::Rest;
use rquickjs::{qjs, Coerced, Ctx, Exception, Function, Persistent, Value};

use super::env::BridgeState;
use super::file;
use super::handles::Handle;
use crate::bindings::codec;
use crate::bindings::protocol::{Args, ResultView, WireValue};
use crate::core::{BridgeError, BridgeResult, FileReadError};

/// Host closure callable from scripts.
pub type NativeFn = dyn Fn(&CallScope<'_>, &Args) -> BridgeResult<WireValue>;

/// Declared argument count of a native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arity {
    /// The closure always sees exactly this many arguments. Missing ones are
    /// `WireValue::None`, extra ones are dropped.
    Fixed(usize),
    /// The closure sees every argument the script passed.
    Variadic,
}

impl From<usize> for Arity {
    fn from(n: usize) -> Self {
        Arity::Fixed(n)
    }
}

/// Negative counts mean variadic.
impl From<i32> for Arity {
    fn from(n: i32) -> Self {
        usize::try_from(n).map_or(Arity::Variadic, Arity::Fixed)
    }
}

impl Arity {
    fn normalize<'js>(self, ctx: &Ctx<'js>, mut values: Vec<Value<'js>>) -> BridgeResult<Vec<Value<'js>>> {
        let Arity::Fixed(n) = self else {
            return Ok(values);
        };
        if values.len() > n {
            values.truncate(n);
        } else {
            values
                .try_reserve_exact(n - values.len())
                .map_err(|_| BridgeError::Allocation(n))?;
            values.resize_with(n, || Value::new_undefined(ctx.clone()));
        }
        Ok(values)
    }
}

/// Names and arities of the native functions bound into the global namespace.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arity>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a binding, replacing any earlier one under the same name.
    pub fn insert(&mut self, name: &str, arity: Arity) -> Option<Arity> {
        self.functions.insert(name.to_string(), arity)
    }

    pub fn remove(&mut self, name: &str) -> Option<Arity> {
        self.functions.remove(name)
    }

    pub fn arity(&self, name: &str) -> Option<Arity> {
        self.functions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Build the engine function that dispatches to `function`.
pub(crate) fn make_trampoline<'js>(
    ctx: &Ctx<'js>,
    state: &Rc<BridgeState>,
    name: &str,
    arity: Arity,
    function: Rc<NativeFn>,
) -> rquickjs::Result<Function<'js>> {
    let state = Rc::clone(state);
    let name = name.to_string();
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            let scope = CallScope::new(ctx, Rc::clone(&state));
            scope
                .dispatch(&name, arity, &*function, args.0)
                .map_err(|err| scope.throw(&name, err))
        },
    )
}

/// Error raised by a native function together with the exception object that
/// carries it through the script.
pub(crate) struct Thrown {
    error: BridgeError,
    exception: Persistent<Value<'static>>,
}

/// Which step of an operation an engine failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Compile,
    Run,
}

/// Access to one environment for the duration of a call.
pub struct CallScope<'js> {
    ctx: Ctx<'js>,
    state: Rc<BridgeState>,
}

impl<'js> CallScope<'js> {
    pub(crate) fn new(ctx: Ctx<'js>, state: Rc<BridgeState>) -> Self {
        Self { ctx, state }
    }

    /// The engine context, for host code that needs direct engine access.
    pub fn ctx(&self) -> &Ctx<'js> {
        &self.ctx
    }

    pub(crate) fn state(&self) -> &Rc<BridgeState> {
        &self.state
    }

    fn dispatch(
        &self,
        name: &str,
        arity: Arity,
        function: &NativeFn,
        values: Vec<Value<'js>>,
    ) -> BridgeResult<Value<'js>> {
        let values = arity.normalize(&self.ctx, values)?;
        let args = Args::new(codec::decode_all(&self.ctx, &self.state.handles, &values)?);
        tracing::trace!(target: "bridge", function = name, format = args.format(), "native call");

        match function(self, &args)? {
            WireValue::None => Ok(Value::new_undefined(self.ctx.clone())),
            result => codec::encode(&self.ctx, &self.state.handles, &result),
        }
    }

    /// Raise `err` in the script as an `Error` with the same message. If that
    /// exception object reaches the host, the caller gets `err` back instead
    /// of a generic runtime error.
    pub(crate) fn throw(&self, context: &str, err: BridgeError) -> rquickjs::Error {
        tracing::debug!(target: "bridge", context, status = err.status(), "{err}");
        let exception = match Exception::from_message(self.ctx.clone(), &err.to_string()) {
            Ok(exception) => exception,
            Err(e) => return e,
        };
        let carrier = exception.as_object().clone().into_value();
        *self.state.thrown.borrow_mut() = Some(Thrown {
            error: err,
            exception: Persistent::save(&self.ctx, carrier),
        });
        exception.throw()
    }

    /// Turn a failure while running code into a bridge error, consuming the
    /// pending exception.
    pub(crate) fn fail(&self, context: &str, err: rquickjs::Error) -> BridgeError {
        self.fail_in(Phase::Run, context, err)
    }

    /// Like [`fail`](Self::fail) for failures while parsing source.
    pub(crate) fn fail_compile(&self, context: &str, err: rquickjs::Error) -> BridgeError {
        self.fail_in(Phase::Compile, context, err)
    }

    fn fail_in(&self, phase: Phase, context: &str, err: rquickjs::Error) -> BridgeError {
        let stashed = self.state.thrown.borrow_mut().take();
        let error = if err.is_exception() {
            self.caught(phase, context, stashed)
        } else {
            BridgeError::Runtime {
                context: context.to_string(),
                message: err.to_string(),
            }
        };
        tracing::warn!(target: "bridge", context, status = error.status(), "{error}");
        error
    }

    fn caught(&self, phase: Phase, context: &str, stashed: Option<Thrown>) -> BridgeError {
        let value = self.ctx.catch();
        if let Some(thrown) = stashed {
            let same = thrown
                .exception
                .restore(&self.ctx)
                .map_or(false, |original| original == value);
            if same {
                return thrown.error;
            }
        }

        let (name, message, stack) = match value.as_exception() {
            Some(exception) => (
                exception.as_object().get::<_, Option<String>>("name").ok().flatten(),
                exception.message().unwrap_or_default(),
                exception.stack(),
            ),
            None => (
                None,
                value.get::<Coerced<String>>().map(|s| s.0).unwrap_or_default(),
                None,
            ),
        };

        if phase == Phase::Compile && name.as_deref() == Some("SyntaxError") {
            return BridgeError::Compile {
                context: context.to_string(),
                message,
            };
        }
        let message = match stack {
            Some(stack) if !stack.trim().is_empty() => format!("{message}\n{}", stack.trim_end()),
            _ => message,
        };
        BridgeError::Runtime {
            context: context.to_string(),
            message,
        }
    }

    pub(crate) fn read_source(&self, path: &Path) -> Result<String, FileReadError> {
        let local = self.state.reader.borrow().clone();
        file::read_source(local.as_ref(), path)
    }

    fn invoke<R>(
        &self,
        context: &str,
        function: Function<'js>,
        args: &Args,
        on_result: impl FnOnce(ResultView<'_>) -> R,
    ) -> BridgeResult<R> {
        let values = codec::encode_all(&self.ctx, &self.state.handles, args.values())?;
        let result: Value = function
            .call((Rest(values),))
            .map_err(|e| self.fail(context, e))?;
        codec::decode_with(&self.ctx, &self.state.handles, &result, on_result)
    }

    /// Parse `source` as a global script without running it.
    pub(crate) fn check_syntax(&self, context: &str, source: &str) -> BridgeResult<()> {
        let input = CString::new(source).map_err(|_| BridgeError::Compile {
            context: context.to_string(),
            message: "source contains a NUL character".to_string(),
        })?;
        let file_name = CString::new(context).unwrap_or_default();
        let flags = qjs::JS_EVAL_TYPE_GLOBAL | qjs::JS_EVAL_FLAG_STRICT | qjs::JS_EVAL_FLAG_COMPILE_ONLY;
        // SAFETY: both strings are NUL-terminated and outlive the call. The
        // compiled script is owned by `compiled` and freed when it drops.
        let compiled = unsafe {
            let raw = qjs::JS_Eval(
                self.ctx.as_raw().as_ptr(),
                input.as_ptr(),
                input.as_bytes().len() as _,
                file_name.as_ptr(),
                flags as i32,
            );
            Value::from_raw(self.ctx.clone(), raw)
        };
        if compiled.is_exception() {
            return Err(self.fail_compile(context, rquickjs::Error::Exception));
        }
        Ok(())
    }

    fn compile_function(&self, context: &str, source: &str) -> BridgeResult<Function<'js>> {
        let wrapped = format!("(\n{source}\n)");
        self.check_syntax(context, &wrapped)?;
        let value: Value = self
            .ctx
            .eval(wrapped)
            .map_err(|e| self.fail(context, e))?;
        value.into_function().ok_or_else(|| BridgeError::Compile {
            context: context.to_string(),
            message: "source is not a single function".to_string(),
        })
    }

    fn bind_global(&self, name: &str, value: impl rquickjs::IntoJs<'js>) -> BridgeResult<()> {
        self.ctx
            .globals()
            .set(name, value)
            .map_err(|e| BridgeError::Binding(format!("{name}: {e}")))
    }

    /// Call the global function `name`.
    pub fn call_function<R>(
        &self,
        name: &str,
        args: &Args,
        on_result: impl FnOnce(ResultView<'_>) -> R,
    ) -> BridgeResult<R> {
        let value: Value = self
            .ctx
            .globals()
            .get(name)
            .map_err(|e| self.fail(name, e))?;
        let function = value
            .into_function()
            .ok_or_else(|| BridgeError::FunctionNotFound(name.to_string()))?;
        self.invoke(name, function, args, on_result)
    }

    /// Compile a file holding a single function and call it once.
    pub fn call_file_function<R>(
        &self,
        path: impl AsRef<Path>,
        args: &Args,
        on_result: impl FnOnce(ResultView<'_>) -> R,
    ) -> BridgeResult<R> {
        let path = path.as_ref();
        let context = path.display().to_string();
        let source = self.read_source(path)?;
        let function = self.compile_function(&context, &source)?;
        self.invoke(&context, function, args, on_result)
    }

    /// Call a pinned value. The handle stays pinned.
    pub fn call_handle<R>(
        &self,
        handle: Handle,
        args: &Args,
        on_result: impl FnOnce(ResultView<'_>) -> R,
    ) -> BridgeResult<R> {
        let value = self.state.handles.borrow().resolve(&self.ctx, handle)?;
        let function = value
            .into_function()
            .ok_or_else(|| BridgeError::Binding(format!("{handle} is not callable")))?;
        self.invoke(&handle.to_string(), function, args, on_result)
    }

    /// Unpin a value. Later use of the handle fails with `HandleNotFound`.
    pub fn release_handle(&self, handle: Handle) -> BridgeResult<()> {
        self.state.handles.borrow_mut().release(handle)?;
        tracing::trace!(target: "bridge.handle", %handle, "released");
        Ok(())
    }

    pub fn is_handle_live(&self, handle: Handle) -> bool {
        self.state.handles.borrow().contains(handle)
    }

    pub fn pinned_count(&self) -> usize {
        self.state.handles.borrow().len()
    }

    /// Evaluate source and hand the completion value to `on_result`.
    pub fn eval_with<R>(&self, source: &str, on_result: impl FnOnce(ResultView<'_>) -> R) -> BridgeResult<R> {
        self.eval_named("eval", source, on_result)
    }

    pub fn eval(&self, source: &str) -> BridgeResult<WireValue> {
        self.eval_with(source, |view| view.to_owned())
    }

    pub fn eval_file_with<R>(
        &self,
        path: impl AsRef<Path>,
        on_result: impl FnOnce(ResultView<'_>) -> R,
    ) -> BridgeResult<R> {
        let path = path.as_ref();
        let source = self.read_source(path)?;
        self.eval_named(&path.display().to_string(), &source, on_result)
    }

    pub fn eval_file(&self, path: impl AsRef<Path>) -> BridgeResult<WireValue> {
        self.eval_file_with(path, |view| view.to_owned())
    }

    fn eval_named<R>(
        &self,
        context: &str,
        source: &str,
        on_result: impl FnOnce(ResultView<'_>) -> R,
    ) -> BridgeResult<R> {
        self.check_syntax(context, source)?;
        let value: Value = self.ctx.eval(source).map_err(|e| self.fail(context, e))?;
        codec::decode_with(&self.ctx, &self.state.handles, &value, on_result)
    }

    /// Bind a native function under a global name.
    pub fn register_function<F>(&self, name: &str, arity: impl Into<Arity>, function: F) -> BridgeResult<()>
    where
        F: Fn(&CallScope<'_>, &Args) -> BridgeResult<WireValue> + 'static,
    {
        let arity = arity.into();
        let function: Rc<NativeFn> = Rc::new(function);
        let trampoline = make_trampoline(&self.ctx, &self.state, name, arity, function)
            .map_err(|e| BridgeError::Binding(format!("{name}: {e}")))?;
        self.bind_global(name, trampoline)?;
        self.state.functions.borrow_mut().insert(name, arity);
        tracing::debug!(target: "bridge", function = name, ?arity, "registered native function");
        Ok(())
    }

    /// Remove a binding made by [`register_function`](Self::register_function).
    pub fn unregister_native_function(&self, name: &str) -> BridgeResult<()> {
        if self.state.functions.borrow_mut().remove(name).is_none() {
            return Err(BridgeError::FunctionNotFound(name.to_string()));
        }
        self.ctx
            .globals()
            .remove(name)
            .map_err(|e| BridgeError::Binding(format!("{name}: {e}")))
    }

    /// Compile source holding exactly one function and bind it as `name`.
    pub fn register_code_function(&self, source: &str, name: &str) -> BridgeResult<()> {
        let function = self.compile_function(name, source)?;
        self.bind_global(name, function)?;
        self.state.functions.borrow_mut().remove(name);
        Ok(())
    }

    /// Like [`register_code_function`](Self::register_code_function), reading the source from `path`.
    pub fn register_file_function(&self, path: impl AsRef<Path>, name: &str) -> BridgeResult<()> {
        let path = path.as_ref();
        let source = self.read_source(path)?;
        let function = self.compile_function(&path.display().to_string(), &source)?;
        self.bind_global(name, function)?;
        self.state.functions.borrow_mut().remove(name);
        Ok(())
    }

    /// Remove any global binding, native or script.
    pub fn unregister_function(&self, name: &str) -> BridgeResult<()> {
        let globals = self.ctx.globals();
        let present = globals
            .contains_key(name)
            .map_err(|e| BridgeError::Binding(format!("{name}: {e}")))?;
        if !present {
            return Err(BridgeError::FunctionNotFound(name.to_string()));
        }
        globals
            .remove(name)
            .map_err(|e| BridgeError::Binding(format!("{name}: {e}")))?;
        self.state.functions.borrow_mut().remove(name);
        Ok(())
    }

    pub fn registered_functions(&self) -> Vec<String> {
        self.state.functions.borrow().names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_from_signed() {
        assert_eq!(Arity::from(2), Arity::Fixed(2));
        assert_eq!(Arity::from(0), Arity::Fixed(0));
        assert_eq!(Arity::from(-1), Arity::Variadic);
        assert_eq!(Arity::from(3usize), Arity::Fixed(3));
    }

    #[test]
    fn test_normalize_pads_and_truncates() {
        let runtime = rquickjs::Runtime::new().unwrap();
        let context = rquickjs::Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let values = |n: i32| -> Vec<Value> { (0..n).map(|i| Value::new_int(ctx.clone(), i)).collect() };

            let padded = Arity::Fixed(3).normalize(&ctx, values(1)).unwrap();
            assert_eq!(padded.len(), 3);
            assert!(padded[2].is_undefined());

            let truncated = Arity::Fixed(1).normalize(&ctx, values(4)).unwrap();
            assert_eq!(truncated.len(), 1);
            assert_eq!(truncated[0].as_int(), Some(0));

            let all = Arity::Variadic.normalize(&ctx, values(5)).unwrap();
            assert_eq!(all.len(), 5);
        });
    }

    #[test]
    fn test_registry_bookkeeping() {
        let mut registry = FunctionRegistry::new();
        assert!(registry.is_empty());
        registry.insert("b", Arity::Variadic);
        assert_eq!(registry.insert("a", Arity::Fixed(1)), None);
        assert_eq!(registry.insert("a", Arity::Fixed(2)), Some(Arity::Fixed(1)));
        assert_eq!(registry.arity("a"), Some(Arity::Fixed(2)));
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.remove("b"), Some(Arity::Variadic));
        assert!(!registry.contains("b"));
        assert_eq!(registry.len(), 1);
    }
}
