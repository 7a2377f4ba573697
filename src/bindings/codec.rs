//! Value codec
//!
//! Converts between [`WireValue`]s and engine values. Composite values travel
//! as JSON text through the engine's own JSON codec; buffers and callables
//! never appear inside that text and use the `Buffer`/`Function` tags instead.

use std::cell::RefCell;

use rquickjs::{qjs, ArrayBuffer, Ctx, Object, TypedArray, Value};

use super::protocol::{ResultView, WireValue};
use crate::core::{BridgeError, BridgeResult};
use crate::scripting::handles::HandleStore;

/// Encode a wire value as an engine value.
///
/// `None` becomes `null`; `Function` resolves a pinned value.
pub fn encode<'js>(
    ctx: &Ctx<'js>,
    handles: &RefCell<HandleStore>,
    value: &WireValue,
) -> BridgeResult<Value<'js>> {
    let encoded = match value {
        WireValue::None => Value::new_null(ctx.clone()),
        WireValue::Bool(b) => Value::new_bool(ctx.clone(), *b),
        WireValue::Int(i) => Value::new_int(ctx.clone(), *i),
        WireValue::Double(d) => Value::new_float(ctx.clone(), *d),
        WireValue::ZString(s) | WireValue::LString(s) => rquickjs::String::from_str(ctx.clone(), s)
            .map(rquickjs::String::into_value)
            .map_err(|e| engine_error("string", e))?,
        WireValue::Buffer(bytes) => ArrayBuffer::new(ctx.clone(), bytes.clone())
            .map(ArrayBuffer::into_value)
            .map_err(|e| engine_error("buffer", e))?,
        WireValue::Array(json) | WireValue::Object(json) => ctx
            .json_parse(json.as_bytes())
            .map_err(|e| BridgeError::ArgMismatch(format!("invalid JSON payload {json:?}: {e}")))?,
        WireValue::Function(handle) => handles.borrow().resolve(ctx, *handle)?,
    };
    Ok(encoded)
}

/// Encode every value, reporting allocation failure instead of aborting.
pub fn encode_all<'js>(
    ctx: &Ctx<'js>,
    handles: &RefCell<HandleStore>,
    values: &[WireValue],
) -> BridgeResult<Vec<Value<'js>>> {
    let mut encoded = Vec::new();
    encoded
        .try_reserve_exact(values.len())
        .map_err(|_| BridgeError::Allocation(values.len()))?;
    for value in values {
        encoded.push(encode(ctx, handles, value)?);
    }
    Ok(encoded)
}

/// Classify an engine value and hand a borrowed view of it to `f`.
///
/// Callables are pinned in the handle store; the receiver owns the release.
pub fn decode_with<'js, R>(
    ctx: &Ctx<'js>,
    handles: &RefCell<HandleStore>,
    value: &Value<'js>,
    f: impl FnOnce(ResultView<'_>) -> R,
) -> BridgeResult<R> {
    if value.is_undefined() || value.is_null() {
        return Ok(f(ResultView::None));
    }
    if let Some(b) = value.as_bool() {
        return Ok(f(ResultView::Bool(b)));
    }
    if let Some(n) = value.as_number() {
        return Ok(f(ResultView::Double(n)));
    }
    if let Some(s) = value.as_string() {
        let text = string_text(&s)?;
        return Ok(f(ResultView::String(&text)));
    }
    if value.is_function() {
        let handle = handles.borrow_mut().pin(ctx, value.clone());
        tracing::trace!(target: "bridge.handle", %handle, "pinned callable");
        return Ok(f(ResultView::Function(handle)));
    }
    let Some(object) = value.as_object() else {
        // symbols and other values without a wire form
        return Ok(f(ResultView::None));
    };
    if let Some(buffer) = ArrayBuffer::from_object(object.clone()) {
        let bytes = buffer.as_bytes().unwrap_or_default();
        return Ok(f(ResultView::Buffer(bytes)));
    }
    if let Ok(typed) = TypedArray::<u8>::from_object(object.clone()) {
        let bytes = typed.as_bytes().unwrap_or_default();
        return Ok(f(ResultView::Buffer(bytes)));
    }
    let is_array = value.is_array();
    let json = stringify(ctx, object)?;
    Ok(if is_array {
        f(ResultView::Array(&json))
    } else {
        f(ResultView::Object(&json))
    })
}

/// Owned decode, used for native function arguments.
pub fn decode<'js>(
    ctx: &Ctx<'js>,
    handles: &RefCell<HandleStore>,
    value: &Value<'js>,
) -> BridgeResult<WireValue> {
    decode_with(ctx, handles, value, |view| view.to_owned())
}

/// Decode engine call arguments into wire values.
pub fn decode_all<'js>(
    ctx: &Ctx<'js>,
    handles: &RefCell<HandleStore>,
    values: &[Value<'js>],
) -> BridgeResult<Vec<WireValue>> {
    let mut decoded = Vec::new();
    decoded
        .try_reserve_exact(values.len())
        .map_err(|_| BridgeError::Allocation(values.len()))?;
    for value in values {
        decoded.push(decode(ctx, handles, value)?);
    }
    Ok(decoded)
}

fn stringify<'js>(ctx: &Ctx<'js>, object: &Object<'js>) -> BridgeResult<String> {
    let text = ctx
        .json_stringify(object.clone())
        .map_err(|e| engine_error("JSON", e))?;
    match text {
        Some(text) => string_text(&text),
        None => Ok("null".to_string()),
    }
}

/// Text of a script string. Unpaired surrogates become U+FFFD.
fn string_text(s: &rquickjs::String<'_>) -> BridgeResult<String> {
    if let Ok(text) = s.to_string() {
        return Ok(text);
    }
    let ctx = s.ctx().as_raw().as_ptr();
    let mut len: qjs::size_t = 0;
    // SAFETY: `s` is a live string of `ctx`, and the buffer is freed before returning.
    unsafe {
        let ptr = qjs::JS_ToCStringLen2(ctx, &mut len, s.as_raw(), 0);
        if ptr.is_null() {
            s.ctx().catch();
            return Err(BridgeError::Allocation(1));
        }
        let bytes = std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize);
        let text = wtf8_lossy(bytes);
        qjs::JS_FreeCString(ctx, ptr);
        Ok(text)
    }
}

/// Decode the engine's UTF-8 output, where an unpaired surrogate is a
/// three-byte `ED A0..BF xx` sequence.
fn wtf8_lossy(mut bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                text.push_str(valid);
                return text;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                text.push(char::REPLACEMENT_CHARACTER);
                let skip = match rest {
                    [0xED, 0xA0..=0xBF, 0x80..=0xBF, ..] => 3,
                    _ => e.error_len().unwrap_or(rest.len()),
                };
                bytes = &rest[skip..];
            }
        }
    }
}

fn engine_error(what: &str, err: rquickjs::Error) -> BridgeError {
    BridgeError::Runtime {
        context: format!("{what} conversion"),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::protocol::ResultType;
    use proptest::prelude::*;
    use rquickjs::{Context, Runtime};

    fn round_trip(value: WireValue) -> WireValue {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let handles = RefCell::new(HandleStore::new());
        let decoded = context.with(|ctx| {
            let encoded = encode(&ctx, &handles, &value).unwrap();
            decode(&ctx, &handles, &encoded).unwrap()
        });
        handles.borrow_mut().clear();
        decoded
    }

    #[test]
    fn test_scalars_round_trip() {
        assert_eq!(round_trip(WireValue::None), WireValue::None);
        assert_eq!(round_trip(WireValue::Bool(true)), WireValue::Bool(true));
        assert_eq!(round_trip(WireValue::Bool(false)), WireValue::Bool(false));
        for d in [0.0, -17.5, 1.0e300, -2.25e-300] {
            assert_eq!(round_trip(WireValue::Double(d)), WireValue::Double(d));
        }
    }

    #[test]
    fn test_encode_only_tags_round_trip_by_value() {
        assert_eq!(round_trip(WireValue::Int(-42)), WireValue::Double(-42.0));
        assert_eq!(
            round_trip(WireValue::ZString("plain".into())),
            WireValue::LString("plain".into())
        );
    }

    #[test]
    fn test_strings_round_trip() {
        assert_eq!(
            round_trip(WireValue::LString(String::new())),
            WireValue::LString(String::new())
        );
        assert_eq!(
            round_trip(WireValue::LString("a\0b\0".into())),
            WireValue::LString("a\0b\0".into())
        );
    }

    #[test]
    fn test_lone_surrogates_decode_lossily() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let handles = RefCell::new(HandleStore::new());
        context.with(|ctx| {
            let value: Value = ctx.eval("'a\\uD800b' + '\\uDC00' + '\\uD83D\\uDE00'").unwrap();
            let decoded = decode(&ctx, &handles, &value).unwrap();
            assert_eq!(decoded, WireValue::LString("a\u{FFFD}b\u{FFFD}\u{1F600}".into()));

            let value: Value = ctx.eval("[{ k: 'x\\uDBFF' }]").unwrap();
            let decoded = decode(&ctx, &handles, &value).unwrap();
            assert!(matches!(decoded, WireValue::Array(_)));
        });
    }

    #[test]
    fn test_wtf8_lossy() {
        assert_eq!(wtf8_lossy(b"plain"), "plain");
        assert_eq!(wtf8_lossy(&[b'a', 0xED, 0xA0, 0x80, b'b']), "a\u{FFFD}b");
        assert_eq!(wtf8_lossy(&[0xED, 0xBF, 0xBF]), "\u{FFFD}");
        assert_eq!(wtf8_lossy(&[b'x', 0xFF]), "x\u{FFFD}");
        assert_eq!(wtf8_lossy("\u{1F600}".as_bytes()), "\u{1F600}");
    }

    #[test]
    fn test_buffer_round_trip() {
        let bytes = vec![0u8, 1, 0, 255, b'x'];
        assert_eq!(
            round_trip(WireValue::Buffer(bytes.clone())),
            WireValue::Buffer(bytes)
        );
        assert_eq!(
            round_trip(WireValue::Buffer(Vec::new())),
            WireValue::Buffer(Vec::new())
        );
    }

    #[test]
    fn test_json_round_trip() {
        assert_eq!(
            round_trip(WireValue::Array("[]".into())),
            WireValue::Array("[]".into())
        );
        assert_eq!(
            round_trip(WireValue::Object(r#"{"a":1,"b":[true,null]}"#.into())),
            WireValue::Object(r#"{"a":1,"b":[true,null]}"#.into())
        );
    }

    #[test]
    fn test_invalid_json_rejected() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let handles = RefCell::new(HandleStore::new());
        context.with(|ctx| {
            let err = encode(&ctx, &handles, &WireValue::Object("{oops".into())).unwrap_err();
            assert!(matches!(err, BridgeError::ArgMismatch(_)));
        });
    }

    #[test]
    fn test_typed_array_decodes_as_buffer() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let handles = RefCell::new(HandleStore::new());
        context.with(|ctx| {
            let value: Value = ctx.eval("new Uint8Array([7, 0, 9])").unwrap();
            let decoded = decode(&ctx, &handles, &value).unwrap();
            assert_eq!(decoded, WireValue::Buffer(vec![7, 0, 9]));
        });
    }

    #[test]
    fn test_function_is_pinned_not_serialized() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let handles = RefCell::new(HandleStore::new());
        context.with(|ctx| {
            let value: Value = ctx.eval("(function (x) { return x; })").unwrap();
            let kind = decode_with(&ctx, &handles, &value, |view| view.result_type()).unwrap();
            assert_eq!(kind, ResultType::Function);
            assert_eq!(handles.borrow().len(), 1);
        });
        handles.borrow_mut().clear();
    }

    #[test]
    fn test_stale_function_handle_fails_to_encode() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let handles = RefCell::new(HandleStore::new());
        context.with(|ctx| {
            let value: Value = ctx.eval("(function () {})").unwrap();
            let WireValue::Function(handle) = decode(&ctx, &handles, &value).unwrap() else {
                panic!("expected a function handle");
            };
            handles.borrow_mut().release(handle).unwrap();
            let err = encode(&ctx, &handles, &WireValue::Function(handle)).unwrap_err();
            assert_eq!(err.status(), -5);
        });
    }

    proptest! {
        #[test]
        fn prop_lstring_round_trip(s in ".*") {
            prop_assert_eq!(round_trip(WireValue::LString(s.clone())), WireValue::LString(s));
        }
    }
}
