//! Host/Script Binding Layer
//!
//! Values crossing the boundary are described by the wire protocol and turned
//! into engine values (and back) by the codec.
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Host code (native functions, result callbacks)      │
//! └───────────────────────┬──────────────────────────────┘
//!                         │  WireValue / Args / ResultView
//!                         v
//! ┌──────────────────────────────────────────────────────┐
//! │  codec: encode / decode / decode_with                │
//! │  (JSON text for arrays and objects, pinned handles   │
//! │   for callables, ArrayBuffer for bytes)              │
//! └───────────────────────┬──────────────────────────────┘
//!                         │  rquickjs::Value
//!                         v
//! ┌──────────────────────────────────────────────────────┐
//! │  QuickJS context                                     │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod protocol;

pub use protocol::*;
