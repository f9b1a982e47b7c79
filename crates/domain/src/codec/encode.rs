//! Encoding typed writes into characteristic bytes.

use crate::error::EncodeError;
use crate::gatt::MAX_ATTRIBUTE_LEN;

use super::format::IntFormat;

/// Value a caller asks to write to a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteValue {
    /// An integer written at `offset` into the characteristic's current value.
    Int {
        value: i64,
        format: IntFormat,
        offset: usize,
    },
    /// UTF-8 text replacing the whole value.
    Text(String),
}

impl WriteValue {
    /// Produce the bytes to send.
    ///
    /// Integer writes overlay onto `current` (the last known value of the
    /// characteristic), growing it with zeros when the field ends past it.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::OutOfRange`] when an integer does not fit its
    /// format, or [`EncodeError::OffsetOutOfRange`] when the field would end
    /// past [`MAX_ATTRIBUTE_LEN`].
    pub fn encode(&self, current: &[u8]) -> Result<Vec<u8>, EncodeError> {
        match self {
            Self::Int {
                value,
                format,
                offset,
            } => {
                let field = encode_int(*value, *format)?;
                let width = field.len();
                let end = offset
                    .checked_add(width)
                    .filter(|end| *end <= MAX_ATTRIBUTE_LEN)
                    .ok_or(EncodeError::OffsetOutOfRange {
                        offset: *offset,
                        width,
                    })?;
                let mut buffer = current.to_vec();
                if buffer.len() < end {
                    buffer.resize(end, 0);
                }
                buffer[*offset..end].copy_from_slice(&field);
                Ok(buffer)
            }
            Self::Text(text) => Ok(text.as_bytes().to_vec()),
        }
    }
}

/// Encode `value` as a little-endian integer of `format`.
///
/// # Errors
///
/// Returns [`EncodeError::OutOfRange`] when `value` is outside the format's range.
pub fn encode_int(value: i64, format: IntFormat) -> Result<Vec<u8>, EncodeError> {
    if value < format.min() || value > format.max() {
        return Err(EncodeError::OutOfRange { value, format });
    }
    // in range, so the low `width` bytes of the two's complement form are exact
    Ok(value.to_le_bytes()[..format.width()].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode::decode_int;

    #[test]
    fn should_encode_signed_and_unsigned_little_endian() {
        assert_eq!(encode_int(1, IntFormat::U32), Ok(vec![1, 0, 0, 0]));
        assert_eq!(encode_int(-2, IntFormat::I16), Ok(vec![0xFE, 0xFF]));
        assert_eq!(encode_int(0x12_3456, IntFormat::U24), Ok(vec![0x56, 0x34, 0x12]));
    }

    #[test]
    fn should_reject_values_outside_format_range() {
        assert_eq!(
            encode_int(256, IntFormat::U8),
            Err(EncodeError::OutOfRange {
                value: 256,
                format: IntFormat::U8
            })
        );
        assert!(encode_int(-1, IntFormat::U16).is_err());
        assert!(encode_int(128, IntFormat::I8).is_err());
    }

    #[test]
    fn should_decode_what_was_encoded_at_range_edges() {
        for format in [IntFormat::I8, IntFormat::U16, IntFormat::I24, IntFormat::U32] {
            for value in [format.min(), format.max()] {
                let bytes = encode_int(value, format).unwrap();
                assert_eq!(decode_int(&bytes, format, 0), Ok(value));
            }
        }
    }

    #[test]
    fn should_overlay_integer_onto_current_value() {
        let write = WriteValue::Int {
            value: 0x0102,
            format: IntFormat::U16,
            offset: 1,
        };
        assert_eq!(write.encode(&[9, 9, 9, 9]), Ok(vec![9, 0x02, 0x01, 9]));
    }

    #[test]
    fn should_grow_current_value_with_zeros() {
        let write = WriteValue::Int {
            value: 7,
            format: IntFormat::U8,
            offset: 2,
        };
        assert_eq!(write.encode(&[]), Ok(vec![0, 0, 7]));
    }

    #[test]
    fn should_reject_offset_that_overflows() {
        let write = WriteValue::Int {
            value: 1,
            format: IntFormat::U8,
            offset: usize::MAX,
        };
        assert_eq!(
            write.encode(&[1, 2, 3]),
            Err(EncodeError::OffsetOutOfRange {
                offset: usize::MAX,
                width: 1
            })
        );
    }

    #[test]
    fn should_reject_field_ending_past_attribute_limit() {
        let write = |offset| WriteValue::Int {
            value: 1,
            format: IntFormat::U16,
            offset,
        };
        assert!(matches!(
            write(1_usize << 40).encode(&[]),
            Err(EncodeError::OffsetOutOfRange { offset, width: 2 }) if offset == 1_usize << 40
        ));
        assert!(write(MAX_ATTRIBUTE_LEN - 1).encode(&[]).is_err());
        assert_eq!(write(MAX_ATTRIBUTE_LEN - 2).encode(&[]).unwrap().len(), MAX_ATTRIBUTE_LEN);
    }

    #[test]
    fn should_replace_whole_value_with_text() {
        let write = WriteValue::Text("on".to_string());
        assert_eq!(write.encode(&[1, 2, 3, 4]), Ok(b"on".to_vec()));
    }
}
