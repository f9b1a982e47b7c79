//! Format tags and the per-operation [`DecodeRequest`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fixed-width little-endian integer format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntFormat {
    U8,
    U16,
    U24,
    U32,
    I8,
    I16,
    I24,
    I32,
}

impl IntFormat {
    /// Width in bytes.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U24 | Self::I24 => 3,
            Self::U32 | Self::I32 => 4,
        }
    }

    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I24 | Self::I32)
    }

    /// Smallest representable value.
    #[must_use]
    pub const fn min(self) -> i64 {
        if self.is_signed() {
            -(1 << (self.width() * 8 - 1))
        } else {
            0
        }
    }

    /// Largest representable value.
    #[must_use]
    pub const fn max(self) -> i64 {
        if self.is_signed() {
            (1 << (self.width() * 8 - 1)) - 1
        } else {
            (1 << (self.width() * 8)) - 1
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U24 => "u24",
            Self::U32 => "u32",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I24 => "i24",
            Self::I32 => "i32",
        }
    }
}

impl fmt::Display for IntFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// On-the-wire float encodings seen in peripherals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatEncoding {
    /// 1-byte signed Q4.4 fixed point (raw value / 16).
    FixedPoint8,
    /// IEEE-11073 16-bit SFLOAT: 4-bit exponent, 12-bit mantissa.
    ShortFloat,
    /// 4-byte little-endian IEEE-754 single precision.
    Ieee754,
}

impl FloatEncoding {
    /// Width in bytes.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::FixedPoint8 => 1,
            Self::ShortFloat => 2,
            Self::Ieee754 => 4,
        }
    }

    /// Pick an encoding from the number of bytes available.
    ///
    /// 1 byte is fixed point, 2 or 3 bytes a short float, 4 or more IEEE-754.
    #[must_use]
    pub const fn for_available(available: usize) -> Option<Self> {
        match available {
            0 => None,
            1 => Some(Self::FixedPoint8),
            2 | 3 => Some(Self::ShortFloat),
            _ => Some(Self::Ieee754),
        }
    }
}

/// How a caller wants a buffer interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueFormat {
    /// Raw bytes, rendered as decimals.
    #[default]
    Bytes,
    Int(IntFormat),
    /// Float with an explicit encoding, or auto-selected by bytes available.
    Float(Option<FloatEncoding>),
    /// UTF-8 text from the offset to the end of the buffer.
    Utf8,
}

impl fmt::Display for ValueFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes => f.write_str("bytes"),
            Self::Int(format) => format.fmt(f),
            Self::Float(None) => f.write_str("float"),
            Self::Float(Some(FloatEncoding::FixedPoint8)) => f.write_str("fixed8"),
            Self::Float(Some(FloatEncoding::ShortFloat)) => f.write_str("sfloat"),
            Self::Float(Some(FloatEncoding::Ieee754)) => f.write_str("f32"),
            Self::Utf8 => f.write_str("utf8"),
        }
    }
}

/// Returned when a format tag is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value format {0:?}")]
pub struct UnknownFormat(pub String);

impl FromStr for ValueFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s.to_ascii_lowercase().as_str() {
            "bytes" => Self::Bytes,
            "u8" => Self::Int(IntFormat::U8),
            "u16" => Self::Int(IntFormat::U16),
            "u24" => Self::Int(IntFormat::U24),
            "u32" => Self::Int(IntFormat::U32),
            "i8" => Self::Int(IntFormat::I8),
            "i16" => Self::Int(IntFormat::I16),
            "i24" => Self::Int(IntFormat::I24),
            "i32" => Self::Int(IntFormat::I32),
            "float" => Self::Float(None),
            "fixed8" => Self::Float(Some(FloatEncoding::FixedPoint8)),
            "sfloat" => Self::Float(Some(FloatEncoding::ShortFloat)),
            "f32" => Self::Float(Some(FloatEncoding::Ieee754)),
            "utf8" | "string" => Self::Utf8,
            _ => return Err(UnknownFormat(s.to_string())),
        };
        Ok(format)
    }
}

impl TryFrom<String> for ValueFormat {
    type Error = UnknownFormat;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ValueFormat> for String {
    fn from(value: ValueFormat) -> Self {
        value.to_string()
    }
}

/// Interpretation contract for one read or notification stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeRequest {
    pub format: ValueFormat,
    /// Byte offset into the raw buffer.
    pub offset: usize,
}

impl DecodeRequest {
    #[must_use]
    pub const fn new(format: ValueFormat, offset: usize) -> Self {
        Self { format, offset }
    }

    /// Raw bytes from offset 0.
    #[must_use]
    pub const fn bytes() -> Self {
        Self::new(ValueFormat::Bytes, 0)
    }

    #[must_use]
    pub const fn int(format: IntFormat, offset: usize) -> Self {
        Self::new(ValueFormat::Int(format), offset)
    }

    #[must_use]
    pub const fn utf8() -> Self {
        Self::new(ValueFormat::Utf8, 0)
    }
}
