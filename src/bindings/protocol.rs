//! Wire protocol
//!
//! Language-agnostic values crossing the host/script boundary. Every call
//! carries its arguments as a sequence of [`WireValue`]s together with a
//! parallel format string holding one [`ArgFormat`] tag character per value.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{BridgeError, BridgeResult};
use crate::scripting::handles::Handle;

/// Argument tag characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgFormat {
    None,
    Bool,
    Int,
    Double,
    ZString,
    LString,
    Buffer,
    Array,
    Object,
    Function,
}

impl ArgFormat {
    pub const ALL: [ArgFormat; 10] = [
        ArgFormat::None,
        ArgFormat::Bool,
        ArgFormat::Int,
        ArgFormat::Double,
        ArgFormat::ZString,
        ArgFormat::LString,
        ArgFormat::Buffer,
        ArgFormat::Array,
        ArgFormat::Object,
        ArgFormat::Function,
    ];

    pub fn as_char(self) -> char {
        match self {
            ArgFormat::None => 'n',
            ArgFormat::Bool => 'b',
            ArgFormat::Int => 'i',
            ArgFormat::Double => 'd',
            ArgFormat::ZString => 's',
            ArgFormat::LString => 'S',
            ArgFormat::Buffer => 'B',
            ArgFormat::Array => 'a',
            ArgFormat::Object => 'o',
            ArgFormat::Function => 'F',
        }
    }

    /// Number of untyped slots the tag consumes in a C-style argument vector.
    ///
    /// Length-carrying tags take a length slot followed by a pointer slot.
    pub fn slots(self) -> usize {
        match self {
            ArgFormat::LString | ArgFormat::Buffer | ArgFormat::Array | ArgFormat::Object => 2,
            _ => 1,
        }
    }
}

impl TryFrom<char> for ArgFormat {
    type Error = BridgeError;

    fn try_from(c: char) -> BridgeResult<Self> {
        ArgFormat::ALL
            .into_iter()
            .find(|tag| tag.as_char() == c)
            .ok_or(BridgeError::UnknownTag(c))
    }
}

impl fmt::Display for ArgFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Result type tags reported to result callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultType {
    None,
    Bool,
    Int,
    Double,
    String,
    Object,
    Buffer,
    Array,
    Function,
}

/// A value crossing the boundary in either direction.
///
/// `Array` and `Object` carry UTF-8 JSON text; the engine's JSON codec does the
/// structural conversion. `Function` carries a pinned script value (usually a
/// function, or a synthesized module object).
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    None,
    Bool(bool),
    Int(i32),
    Double(f64),
    ZString(String),
    LString(String),
    Buffer(Vec<u8>),
    Array(String),
    Object(String),
    Function(Handle),
}

impl WireValue {
    pub fn format(&self) -> ArgFormat {
        match self {
            WireValue::None => ArgFormat::None,
            WireValue::Bool(_) => ArgFormat::Bool,
            WireValue::Int(_) => ArgFormat::Int,
            WireValue::Double(_) => ArgFormat::Double,
            WireValue::ZString(_) => ArgFormat::ZString,
            WireValue::LString(_) => ArgFormat::LString,
            WireValue::Buffer(_) => ArgFormat::Buffer,
            WireValue::Array(_) => ArgFormat::Array,
            WireValue::Object(_) => ArgFormat::Object,
            WireValue::Function(_) => ArgFormat::Function,
        }
    }

    pub fn result_type(&self) -> ResultType {
        match self {
            WireValue::None => ResultType::None,
            WireValue::Bool(_) => ResultType::Bool,
            WireValue::Int(_) => ResultType::Int,
            WireValue::Double(_) => ResultType::Double,
            WireValue::ZString(_) | WireValue::LString(_) => ResultType::String,
            WireValue::Buffer(_) => ResultType::Buffer,
            WireValue::Array(_) => ResultType::Array,
            WireValue::Object(_) => ResultType::Object,
            WireValue::Function(_) => ResultType::Function,
        }
    }

    /// Serialize a host value into an `Array` or `Object` payload.
    pub fn json<T: Serialize>(value: &T) -> BridgeResult<Self> {
        let json = serde_json::to_value(value)
            .map_err(|e| BridgeError::ArgMismatch(format!("not representable as JSON: {e}")))?;
        let text = json.to_string();
        Ok(match json {
            serde_json::Value::Array(_) => WireValue::Array(text),
            serde_json::Value::Object(_) => WireValue::Object(text),
            _ => {
                return Err(BridgeError::ArgMismatch(format!(
                    "expected a JSON array or object, got {text}"
                )))
            }
        })
    }

    /// Numeric payload of `Int` and `Double`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireValue::Int(i) => Some(f64::from(*i)),
            WireValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::ZString(s) | WireValue::LString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            WireValue::Function(handle) => Some(*handle),
            _ => None,
        }
    }
}

impl From<bool> for WireValue {
    fn from(b: bool) -> Self {
        WireValue::Bool(b)
    }
}

impl From<i32> for WireValue {
    fn from(i: i32) -> Self {
        WireValue::Int(i)
    }
}

impl From<f64> for WireValue {
    fn from(d: f64) -> Self {
        WireValue::Double(d)
    }
}

impl From<&str> for WireValue {
    fn from(s: &str) -> Self {
        WireValue::LString(s.to_string())
    }
}

impl From<String> for WireValue {
    fn from(s: String) -> Self {
        WireValue::LString(s)
    }
}

impl From<Vec<u8>> for WireValue {
    fn from(bytes: Vec<u8>) -> Self {
        WireValue::Buffer(bytes)
    }
}

impl From<Handle> for WireValue {
    fn from(handle: Handle) -> Self {
        WireValue::Function(handle)
    }
}

/// Argument list handed to native functions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: Vec<WireValue>,
    format: String,
}

impl Args {
    pub fn new(values: Vec<WireValue>) -> Self {
        let format = values.iter().map(|v| v.format().as_char()).collect();
        Self { values, format }
    }

    /// Build an argument list from a format string, checking every tag.
    pub fn parse(format: &str, values: Vec<WireValue>) -> BridgeResult<Self> {
        let tags = format
            .chars()
            .map(ArgFormat::try_from)
            .collect::<BridgeResult<Vec<_>>>()?;
        if tags.len() != values.len() {
            return Err(BridgeError::ArgMismatch(format!(
                "format \"{format}\" describes {} arguments, got {}",
                tags.len(),
                values.len()
            )));
        }
        for (i, (tag, value)) in tags.iter().zip(&values).enumerate() {
            if *tag != value.format() {
                return Err(BridgeError::ArgMismatch(format!(
                    "argument {i} is tagged '{tag}' but holds '{}'",
                    value.format()
                )));
            }
        }
        Ok(Self {
            values,
            format: format.to_string(),
        })
    }

    /// The parallel format string, one tag character per argument.
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Slots this list occupies in a C-style argument vector.
    pub fn slot_count(&self) -> usize {
        self.values.iter().map(|v| v.format().slots()).sum()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&WireValue> {
        self.values.get(index)
    }

    /// Numeric argument at `index`, or an argument mismatch.
    pub fn number(&self, index: usize) -> BridgeResult<f64> {
        self.get(index).and_then(WireValue::as_f64).ok_or_else(|| {
            BridgeError::ArgMismatch(format!("argument {index} of \"{}\" is not a number", self.format))
        })
    }

    /// String argument at `index`, or an argument mismatch.
    pub fn string(&self, index: usize) -> BridgeResult<&str> {
        self.get(index).and_then(WireValue::as_str).ok_or_else(|| {
            BridgeError::ArgMismatch(format!("argument {index} of \"{}\" is not a string", self.format))
        })
    }

    /// Handle argument at `index`, or an argument mismatch.
    pub fn handle(&self, index: usize) -> BridgeResult<Handle> {
        self.get(index).and_then(WireValue::as_handle).ok_or_else(|| {
            BridgeError::ArgMismatch(format!("argument {index} of \"{}\" is not a function", self.format))
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WireValue> {
        self.values.iter()
    }

    pub fn values(&self) -> &[WireValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<WireValue> {
        self.values
    }
}

impl<'a> IntoIterator for &'a Args {
    type Item = &'a WireValue;
    type IntoIter = std::slice::Iter<'a, WireValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// A call result as seen by a result callback.
///
/// String, buffer and JSON payloads borrow storage that only lives for the
/// duration of the callback. Use [`ResultView::to_owned`] to keep the value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResultView<'a> {
    None,
    Bool(bool),
    Double(f64),
    String(&'a str),
    Buffer(&'a [u8]),
    Array(&'a str),
    Object(&'a str),
    Function(Handle),
}

impl ResultView<'_> {
    pub fn result_type(&self) -> ResultType {
        match self {
            ResultView::None => ResultType::None,
            ResultView::Bool(_) => ResultType::Bool,
            ResultView::Double(_) => ResultType::Double,
            ResultView::String(_) => ResultType::String,
            ResultView::Buffer(_) => ResultType::Buffer,
            ResultView::Array(_) => ResultType::Array,
            ResultView::Object(_) => ResultType::Object,
            ResultView::Function(_) => ResultType::Function,
        }
    }

    /// Length in bytes of the payload, 0 for scalars.
    pub fn len(&self) -> usize {
        match self {
            ResultView::String(s) | ResultView::Array(s) | ResultView::Object(s) => s.len(),
            ResultView::Buffer(b) => b.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the result out of the callback scope.
    pub fn to_owned(&self) -> WireValue {
        match *self {
            ResultView::None => WireValue::None,
            ResultView::Bool(b) => WireValue::Bool(b),
            ResultView::Double(d) => WireValue::Double(d),
            ResultView::String(s) => WireValue::LString(s.to_string()),
            ResultView::Buffer(b) => WireValue::Buffer(b.to_vec()),
            ResultView::Array(s) => WireValue::Array(s.to_string()),
            ResultView::Object(s) => WireValue::Object(s.to_string()),
            ResultView::Function(h) => WireValue::Function(h),
        }
    }
}
