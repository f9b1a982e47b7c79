//! Bitmask-driven composite sensor frames.
//!
//! Some peripherals pack several optional readings into one notification:
//! a leading mask byte says which fields follow, and each present field is
//! read at the next unconsumed offset, in table order, with no gaps for the
//! absent ones. A [`FrameLayout`] is that table; supporting a new sensor means
//! adding rows, not code.

use serde::{Deserialize, Serialize};

use crate::codec::decode::decode_int;
use crate::codec::format::IntFormat;
use crate::error::DecodeError;

/// One row of a [`FrameLayout`].
#[derive(Debug, Clone, PartialEq)]
pub struct FrameField {
    /// Mask bit announcing this field.
    pub bit: u8,
    pub name: &'static str,
    /// Format of each component.
    pub format: IntFormat,
    /// Number of consecutive components (e.g. 3 for an x/y/z vector).
    pub count: usize,
    /// Divisor applied to each raw component.
    pub scale: f64,
}

impl FrameField {
    #[must_use]
    pub const fn new(bit: u8, name: &'static str, format: IntFormat, count: usize, scale: f64) -> Self {
        Self {
            bit,
            name,
            format,
            count,
            scale,
        }
    }

    const fn width(&self) -> usize {
        self.format.width() * self.count
    }
}

/// A decoded field of a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameValue {
    pub name: &'static str,
    pub values: Vec<f64>,
}

/// Frame types with a built-in layout, by configuration name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    MultiSensorTag,
}

impl FrameKind {
    #[must_use]
    pub fn layout(self) -> FrameLayout {
        match self {
            Self::MultiSensorTag => FrameLayout::multi_sensor_tag(),
        }
    }
}

/// Ordered field table for one frame type.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLayout {
    fields: Vec<FrameField>,
}

impl FrameLayout {
    #[must_use]
    pub fn new(fields: Vec<FrameField>) -> Self {
        Self { fields }
    }

    /// Layout of the multi-sensor tag notification frame.
    ///
    /// | Bit | Field | Encoding |
    /// |-----|-------|----------|
    /// | `0x01` | accelerometer | 3 × i16 |
    /// | `0x02` | gyroscope | 3 × i16 ÷ 100 |
    /// | `0x04` | humidity | u16 ÷ 10 (%) |
    /// | `0x08` | magnetometer | 3 × i16 |
    /// | `0x10` | pressure | u16 ÷ 10 (hPa) |
    /// | `0x20` | temperature | u16 ÷ 10 (°C) |
    #[must_use]
    pub fn multi_sensor_tag() -> Self {
        Self::new(vec![
            FrameField::new(0x01, "accelerometer", IntFormat::I16, 3, 1.0),
            FrameField::new(0x02, "gyroscope", IntFormat::I16, 3, 100.0),
            FrameField::new(0x04, "humidity", IntFormat::U16, 1, 10.0),
            FrameField::new(0x08, "magnetometer", IntFormat::I16, 3, 1.0),
            FrameField::new(0x10, "pressure", IntFormat::U16, 1, 10.0),
            FrameField::new(0x20, "temperature", IntFormat::U16, 1, 10.0),
        ])
    }

    #[must_use]
    pub fn fields(&self) -> &[FrameField] {
        &self.fields
    }

    /// Decode a frame: mask byte first, then every announced field in order.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::EmptyFrame`] for an empty buffer and
    /// [`DecodeError::OutOfBounds`] when an announced field is truncated.
    #[allow(clippy::cast_precision_loss)] // components are at most 32 bits wide
    pub fn decode(&self, raw: &[u8]) -> Result<Vec<FrameValue>, DecodeError> {
        let (&mask, _) = raw.split_first().ok_or(DecodeError::EmptyFrame)?;
        let mut offset = 1;
        let mut decoded = Vec::new();
        for field in self.fields.iter().filter(|f| mask & f.bit != 0) {
            let mut values = Vec::with_capacity(field.count);
            for i in 0..field.count {
                let raw_value = decode_int(raw, field.format, offset + i * field.format.width())?;
                values.push(raw_value as f64 / field.scale);
            }
            offset += field.width();
            decoded.push(FrameValue {
                name: field.name,
                values,
            });
        }
        Ok(decoded)
    }
}
