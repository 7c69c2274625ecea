//! Binary frame decoder.
//!
//! Decoding is decided up front by a length check against the kind's
//! [`Layout`]: a payload of the exact width is unpacked field by field,
//! anything else becomes a raw fallback carrying the payload bytes.

use pqgate_core::reading::now_timestamp;
use pqgate_core::{FieldValue, Fields, MessageKind, Reading};
use tracing::debug;

use crate::error::DecodeError;
use crate::layout::{Layout, Primitive, FLAG_FIELD, TIME_FIELDS};

/// Outcome of decoding one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Structured frame with its canonical timestamp.
    Frame { timestamp: String, fields: Fields },
    /// Payload bytes of a frame that could not be decoded.
    Raw(Vec<u8>),
}

impl Decoded {
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }
}

/// Calendar fields carried at the end of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBlock {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub weekday: u8,
    pub date: u8,
    pub month: u8,
    pub year: u16,
}

impl TimeBlock {
    /// Full year, with two-digit years pivoted into the 2000s.
    pub fn full_year(&self) -> u16 {
        if self.year < 100 {
            self.year + 2000
        } else {
            self.year
        }
    }

    /// `YYYY-MM-DD HH:MM:SS`
    pub fn timestamp(&self) -> String {
        format!(
            "{}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.full_year(),
            self.month,
            self.date,
            self.hours,
            self.minutes,
            self.seconds
        )
    }

    fn values(&self) -> [FieldValue; 7] {
        [
            self.seconds.into(),
            self.minutes.into(),
            self.hours.into(),
            self.weekday.into(),
            self.date.into(),
            self.month.into(),
            self.year.into(),
        ]
    }
}

/// Little-endian cursor over a payload.
struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + N)
            .and_then(|s| <[u8; N]>::try_from(s).ok())
            .ok_or_else(|| DecodeError::Unpack {
                offset: self.pos,
                reason: format!("need {} bytes, {} left", N, self.buf.len().saturating_sub(self.pos)),
            })?;
        self.pos += N;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn value(&mut self, primitive: Primitive) -> Result<FieldValue, DecodeError> {
        Ok(match primitive {
            Primitive::U8 => self.u8()?.into(),
            Primitive::U16 => self.u16()?.into(),
            Primitive::U32 => u32::from_le_bytes(self.take()?).into(),
            Primitive::F32 => f32::from_le_bytes(self.take()?).into(),
            Primitive::Bool => (self.u8()? != 0).into(),
        })
    }

    fn time_block(&mut self) -> Result<TimeBlock, DecodeError> {
        Ok(TimeBlock {
            seconds: self.u8()?,
            minutes: self.u8()?,
            hours: self.u8()?,
            weekday: self.u8()?,
            date: self.u8()?,
            month: self.u8()?,
            year: self.u16()?,
        })
    }
}

/// Decode a payload as a structured frame of the given kind.
pub fn try_decode(kind: MessageKind, payload: &[u8]) -> Result<(String, Fields), DecodeError> {
    let layout = Layout::for_kind(kind);
    if payload.len() != layout.width() {
        return Err(DecodeError::SizeMismatch {
            kind,
            expected: layout.width(),
            actual: payload.len(),
        });
    }

    let mut reader = FrameReader::new(payload);
    let mut fields = Fields::with_capacity(layout.field_names().len());
    for entry in layout.entries() {
        fields.insert(entry.name.clone(), reader.value(entry.primitive)?);
    }

    let time = reader.time_block()?;
    if layout.exposes_time() {
        for (name, value) in TIME_FIELDS.iter().zip(time.values()) {
            fields.insert((*name).to_string(), value);
        }
    }
    fields.insert(FLAG_FIELD.to_string(), reader.value(Primitive::Bool)?);

    Ok((time.timestamp(), fields))
}

/// Decode a payload, falling back to raw bytes on any failure.
pub fn decode(kind: MessageKind, payload: &[u8]) -> Decoded {
    match try_decode(kind, payload) {
        Ok((timestamp, fields)) => Decoded::Frame { timestamp, fields },
        Err(e) => {
            debug!(kind = %kind, error = %e, "Falling back to raw payload");
            Decoded::Raw(payload.to_vec())
        }
    }
}

/// Decode one transport message into a reading.
///
/// Returns `None` when the topic names no known frame kind. Raw fallbacks
/// are stamped with the ingest time.
pub fn decode_message(asset: &str, topic: &str, payload: &[u8]) -> Option<Reading> {
    let kind = MessageKind::from_topic(topic)?;
    Some(match decode(kind, payload) {
        Decoded::Frame { timestamp, fields } => {
            Reading::new(asset, timestamp, topic).with_fields(fields)
        }
        Decoded::Raw(bytes) => Reading::raw(asset, now_timestamp(), topic, &bytes),
    })
}
