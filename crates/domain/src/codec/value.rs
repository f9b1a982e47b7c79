//! Typed results of decoding a buffer.

use std::fmt;

use serde::Serialize;

/// A decoded characteristic value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DecodedValue {
    /// Literal byte sequence.
    Bytes(Vec<u8>),
    /// Integer widened to 64 bits.
    Int(i64),
    Float(f64),
    Text(String),
}

/// Which kind of value a [`DecodedValue`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bytes,
    Int,
    Float,
    Text,
}

impl DecodedValue {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Text(_) => ValueKind::Text,
        }
    }
}

impl fmt::Display for DecodedValue {
    /// Bytes render as unsigned decimals joined by `,` (`[1, 255]` is `"1,255"`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => {
                for (i, byte) in bytes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{byte}")?;
                }
                Ok(())
            }
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_render_bytes_as_comma_joined_decimals() {
        assert_eq!(DecodedValue::Bytes(vec![0x01, 0xFF, 0x10]).to_string(), "1,255,16");
        assert_eq!(DecodedValue::Bytes(Vec::new()).to_string(), "");
    }

    #[test]
    fn should_report_kind() {
        assert_eq!(DecodedValue::Int(3).kind(), ValueKind::Int);
        assert_eq!(DecodedValue::Text("x".into()).kind(), ValueKind::Text);
    }

    #[test]
    fn should_serialize_with_kind_tag() {
        let json = serde_json::to_value(DecodedValue::Int(42)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "int", "value": 42}));
    }
}
