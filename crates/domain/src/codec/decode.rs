//! Pure decoding of raw buffers.
//!
//! Integers and floats are little-endian (BLE GATT convention). Every read
//! must fit entirely inside the buffer; nothing is truncated or padded.

use crate::error::DecodeError;

use super::format::{DecodeRequest, FloatEncoding, IntFormat, ValueFormat};
use super::value::DecodedValue;

/// IEEE-11073 SFLOAT reserved mantissas (with exponent 0).
const SFLOAT_NAN: u16 = 0x07FF;
const SFLOAT_NRES: u16 = 0x0800;
const SFLOAT_POSITIVE_INFINITY: u16 = 0x07FE;
const SFLOAT_NEGATIVE_INFINITY: u16 = 0x0802;
const SFLOAT_RESERVED: u16 = 0x0801;

/// Decode `raw` according to `request`.
///
/// # Errors
///
/// Returns [`DecodeError`] when the requested bytes lie outside the buffer or,
/// for text, when they are not valid UTF-8.
pub fn decode(raw: &[u8], request: &DecodeRequest) -> Result<DecodedValue, DecodeError> {
    let offset = request.offset;
    match request.format {
        ValueFormat::Bytes => tail(raw, offset).map(|bytes| DecodedValue::Bytes(bytes.to_vec())),
        ValueFormat::Int(format) => decode_int(raw, format, offset).map(DecodedValue::Int),
        ValueFormat::Float(encoding) => decode_float(raw, encoding, offset).map(DecodedValue::Float),
        ValueFormat::Utf8 => {
            let bytes = tail(raw, offset)?;
            std::str::from_utf8(bytes)
                .map(|text| DecodedValue::Text(text.to_string()))
                .map_err(|err| DecodeError::InvalidUtf8 {
                    offset,
                    valid_up_to: err.valid_up_to(),
                })
        }
    }
}

/// Decode one integer of `format` at `offset`.
///
/// # Errors
///
/// Returns [`DecodeError::OutOfBounds`] unless `offset + width <= raw.len()`.
pub fn decode_int(raw: &[u8], format: IntFormat, offset: usize) -> Result<i64, DecodeError> {
    let b = field(raw, offset, format.width())?;
    let value = match format {
        IntFormat::U8 => i64::from(b[0]),
        IntFormat::I8 => i64::from(i8::from_le_bytes([b[0]])),
        IntFormat::U16 => i64::from(u16::from_le_bytes([b[0], b[1]])),
        IntFormat::I16 => i64::from(i16::from_le_bytes([b[0], b[1]])),
        IntFormat::U24 => i64::from(u32::from_le_bytes([b[0], b[1], b[2], 0])),
        // arithmetic shift sign-extends the top byte
        IntFormat::I24 => i64::from(i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8),
        IntFormat::U32 => i64::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        IntFormat::I32 => i64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
    };
    Ok(value)
}

fn decode_float(
    raw: &[u8],
    encoding: Option<FloatEncoding>,
    offset: usize,
) -> Result<f64, DecodeError> {
    let encoding = match encoding {
        Some(encoding) => encoding,
        None => FloatEncoding::for_available(tail(raw, offset)?.len())
            .ok_or(DecodeError::NoFloatBytes { offset })?,
    };
    let b = field(raw, offset, encoding.width())?;
    let value = match encoding {
        FloatEncoding::FixedPoint8 => f64::from(i8::from_le_bytes([b[0]])) / 16.0,
        FloatEncoding::ShortFloat => short_float(u16::from_le_bytes([b[0], b[1]])),
        FloatEncoding::Ieee754 => f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
    };
    Ok(value)
}

fn short_float(raw: u16) -> f64 {
    match raw {
        SFLOAT_NAN | SFLOAT_NRES | SFLOAT_RESERVED => return f64::NAN,
        SFLOAT_POSITIVE_INFINITY => return f64::INFINITY,
        SFLOAT_NEGATIVE_INFINITY => return f64::NEG_INFINITY,
        _ => {}
    }
    // 12-bit two's complement mantissa, 4-bit two's complement exponent
    let mantissa = i16::from_le_bytes((raw << 4).to_le_bytes()) >> 4;
    let exponent = i16::from_le_bytes((raw & 0xF000).to_le_bytes()) >> 12;
    f64::from(mantissa) * 10f64.powi(i32::from(exponent))
}

fn field(raw: &[u8], offset: usize, width: usize) -> Result<&[u8], DecodeError> {
    offset
        .checked_add(width)
        .and_then(|end| raw.get(offset..end))
        .ok_or(DecodeError::OutOfBounds {
            offset,
            width,
            len: raw.len(),
        })
}

fn tail(raw: &[u8], offset: usize) -> Result<&[u8], DecodeError> {
    raw.get(offset..).ok_or(DecodeError::OffsetPastEnd {
        offset,
        len: raw.len(),
    })
}
