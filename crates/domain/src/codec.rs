//! Value codec: turns raw characteristic buffers into typed values and
//! typed writes back into bytes.
//!
//! Decoding is a pure function of `(buffer, DecodeRequest)`; nothing here keeps
//! state between calls, so every in-flight operation carries its own request.

pub mod decode;
pub mod encode;
pub mod format;
pub mod value;

pub use decode::{decode, decode_int};
pub use encode::{WriteValue, encode_int};
pub use format::{DecodeRequest, FloatEncoding, IntFormat, ValueFormat};
pub use value::{DecodedValue, ValueKind};
