//! Tuya DP tunnel wire protocol (private cluster 0xEF00).
//! Handles data point record framing, value encodings and the sequence-numbered envelope.

use crate::error::{HybridError, Result};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, Timelike};
use serde_json::Value;
use std::io::Cursor;

/// Numeric id of the proprietary tunnel cluster.
pub const TUNNEL_CLUSTER_ID: u16 = 0xEF00;
/// Largest value a 16-bit length field can describe.
pub const MAX_DP_VALUE_LEN: usize = 0xFFFF;
/// DP carrying the device clock.
pub const TIME_SYNC_DP: u8 = 0x24;

const SEQ_LEN: usize = 2;
const RECORD_HEADER_LEN: usize = 4;

define_dp_type! {
    Raw = 0x00 => "RAW",
    Bool = 0x01 => "BOOL",
    Number = 0x02 => "NUMBER",
    String = 0x03 => "STRING",
    Enum = 0x04 => "ENUM",
    Bitmap = 0x05 => "BITMAP",
}

/// A decoded Data Point value.
#[derive(Debug, Clone, PartialEq)]
pub enum DpValue {
    Raw(Vec<u8>),
    Bool(bool),
    /// 4-byte big-endian signed integer
    Number(i32),
    String(String),
    Enum(u8),
    Bitmap(u32),
}

impl DpValue {
    pub fn dp_type(&self) -> DpType {
        match self {
            DpValue::Raw(_) => DpType::Raw,
            DpValue::Bool(_) => DpType::Bool,
            DpValue::Number(_) => DpType::Number,
            DpValue::String(_) => DpType::String,
            DpValue::Enum(_) => DpType::Enum,
            DpValue::Bitmap(_) => DpType::Bitmap,
        }
    }

    /// Converts a capability value into the wire value for `dp_type`.
    ///
    /// `scale` only applies to `NUMBER`: the value sent is `round(value * scale)`.
    pub fn from_capability(dp_type: DpType, value: &Value, scale: Option<f64>) -> Result<Self> {
        match dp_type {
            DpType::Bool => Ok(DpValue::Bool(is_truthy(value))),
            DpType::Number => {
                let n = number_of(value).ok_or_else(|| invalid(dp_type, value))?;
                let scaled = (n * scale.unwrap_or(1.0)).round();
                if !scaled.is_finite() || scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
                    return Err(HybridError::ValueOutOfRange(format!(
                        "{} does not fit a 32-bit DP value",
                        scaled
                    )));
                }
                Ok(DpValue::Number(scaled as i32))
            }
            DpType::Enum => {
                let n = number_of(value).ok_or_else(|| invalid(dp_type, value))?;
                if n.fract() != 0.0 || !(0.0..=255.0).contains(&n) {
                    return Err(HybridError::ValueOutOfRange(format!(
                        "enum value {} outside 0..=255",
                        n
                    )));
                }
                Ok(DpValue::Enum(n as u8))
            }
            DpType::Bitmap => {
                let n = number_of(value).ok_or_else(|| invalid(dp_type, value))?;
                if n.fract() != 0.0 || !(0.0..=u32::MAX as f64).contains(&n) {
                    return Err(HybridError::ValueOutOfRange(format!(
                        "bitmap value {} outside 32 bits",
                        n
                    )));
                }
                Ok(DpValue::Bitmap(n as u32))
            }
            DpType::String => match value {
                Value::String(s) => Ok(DpValue::String(s.clone())),
                Value::Number(n) => Ok(DpValue::String(n.to_string())),
                Value::Bool(b) => Ok(DpValue::String(b.to_string())),
                _ => Err(invalid(dp_type, value)),
            },
            DpType::Raw => match value {
                Value::String(s) => Ok(DpValue::Raw(hex::decode(s)?)),
                Value::Array(items) => items
                    .iter()
                    .map(|item| {
                        item.as_u64()
                            .and_then(|b| u8::try_from(b).ok())
                            .ok_or_else(|| invalid(dp_type, value))
                    })
                    .collect::<Result<Vec<u8>>>()
                    .map(DpValue::Raw),
                _ => Err(invalid(dp_type, value)),
            },
        }
    }

    /// JSON form of the raw value as delivered to the classifier. RAW becomes a hex string.
    pub fn to_json(&self) -> Value {
        match self {
            DpValue::Raw(bytes) => Value::String(hex::encode(bytes)),
            DpValue::Bool(b) => Value::Bool(*b),
            DpValue::Number(n) => Value::from(*n),
            DpValue::String(s) => Value::String(s.clone()),
            DpValue::Enum(e) => Value::from(*e),
            DpValue::Bitmap(b) => Value::from(*b),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            DpValue::Raw(bytes) => bytes.clone(),
            DpValue::Bool(b) => vec![u8::from(*b)],
            DpValue::Number(n) => n.to_be_bytes().to_vec(),
            DpValue::String(s) => s.as_bytes().to_vec(),
            DpValue::Enum(e) => vec![*e],
            DpValue::Bitmap(b) => b.to_be_bytes().to_vec(),
        }
    }

    fn from_bytes(dp_type: DpType, index: u8, data: &[u8]) -> Result<Self> {
        let bad_len = |expected: &str| {
            HybridError::MalformedFrame(format!(
                "DP {} of type {} has length {}, expected {}",
                index,
                dp_type,
                data.len(),
                expected
            ))
        };

        match dp_type {
            DpType::Raw => Ok(DpValue::Raw(data.to_vec())),
            DpType::Bool => match data {
                [b] => Ok(DpValue::Bool(*b != 0)),
                _ => Err(bad_len("1")),
            },
            DpType::Number => match data.len() {
                4 => Ok(DpValue::Number(BigEndian::read_i32(data))),
                _ => Err(bad_len("4")),
            },
            DpType::String => String::from_utf8(data.to_vec())
                .map(DpValue::String)
                .map_err(|e| HybridError::DecodeError(format!("DP {}: {}", index, e))),
            DpType::Enum => match data {
                [e] => Ok(DpValue::Enum(*e)),
                _ => Err(bad_len("1")),
            },
            DpType::Bitmap => match data.len() {
                1 => Ok(DpValue::Bitmap(data[0] as u32)),
                2 => Ok(DpValue::Bitmap(BigEndian::read_u16(data) as u32)),
                4 => Ok(DpValue::Bitmap(BigEndian::read_u32(data))),
                _ => Err(bad_len("1, 2 or 4")),
            },
        }
    }
}

/// One data point as carried inside the tunnel: `[dp:1][type:1][len:2][value:len]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// DP index
    pub index: u8,
    /// Typed value
    pub value: DpValue,
}

impl DataPoint {
    pub fn new(index: u8, value: DpValue) -> Self {
        Self { index, value }
    }

    pub fn value_type(&self) -> DpType {
        self.value.dp_type()
    }

    /// Empty RAW record asking the device to report `index` again.
    pub fn query(index: u8) -> Self {
        Self::new(index, DpValue::Raw(Vec::new()))
    }

    /// Clock record on [`TIME_SYNC_DP`]: `[year-2000, month, day, hour, minute, second, weekday]`,
    /// weekday counted from Monday = 0.
    pub fn time_sync<T: Datelike + Timelike>(time: &T) -> Result<Self> {
        let year = u8::try_from(time.year() - 2000).map_err(|_| {
            HybridError::ValueOutOfRange(format!("year {} outside 2000..=2255", time.year()))
        })?;
        let payload = vec![
            year,
            time.month() as u8,
            time.day() as u8,
            time.hour() as u8,
            time.minute() as u8,
            time.second() as u8,
            time.weekday().num_days_from_monday() as u8,
        ];
        Ok(Self::new(TIME_SYNC_DP, DpValue::Raw(payload)))
    }
}

/// Tunnel payload: a sequence number followed by one or more data point records.
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelFrame {
    /// Sequence number
    pub seq: u16,
    /// Data points in wire order
    pub dps: Vec<DataPoint>,
}

/// Encodes and decodes tunnel payloads.
///
/// The adapter only talks to the codec through this trait.
pub trait FrameCodec: Send + Sync {
    fn encode(&self, frame: &TunnelFrame) -> Result<Vec<u8>>;
    fn decode(&self, data: &[u8]) -> Result<TunnelFrame>;
}

/// The standard 0xEF00 codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct TuyaCodec;

impl FrameCodec for TuyaCodec {
    fn encode(&self, frame: &TunnelFrame) -> Result<Vec<u8>> {
        pack_frame(frame)
    }

    fn decode(&self, data: &[u8]) -> Result<TunnelFrame> {
        unpack_frame(data)
    }
}

/// Pack a single data point record.
pub fn encode_dp(dp: &DataPoint) -> Result<Vec<u8>> {
    let data = dp.value.to_bytes();
    if data.len() > MAX_DP_VALUE_LEN {
        return Err(HybridError::PayloadTooLarge(data.len()));
    }

    let mut out = Vec::with_capacity(RECORD_HEADER_LEN + data.len());
    out.write_u8(dp.index)?;
    out.write_u8(dp.value_type().as_u8())?;
    out.write_u16::<BigEndian>(data.len() as u16)?;
    out.extend_from_slice(&data);
    Ok(out)
}

/// Parse a buffer that holds exactly one data point record.
pub fn decode_dp(data: &[u8]) -> Result<DataPoint> {
    let mut cursor = Cursor::new(data);
    let dp = read_dp(&mut cursor)?;
    let trailing = data.len() - cursor.position() as usize;
    if trailing != 0 {
        return Err(HybridError::MalformedFrame(format!(
            "{} trailing bytes after DP {}",
            trailing, dp.index
        )));
    }
    Ok(dp)
}

/// Pack a tunnel frame: sequence number followed by every record.
pub fn pack_frame(frame: &TunnelFrame) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.write_u16::<BigEndian>(frame.seq)?;
    for dp in &frame.dps {
        data.extend_from_slice(&encode_dp(dp)?);
    }
    Ok(data)
}

/// Unpack a tunnel frame. At least one record must follow the sequence number.
pub fn unpack_frame(data: &[u8]) -> Result<TunnelFrame> {
    if data.len() < SEQ_LEN + RECORD_HEADER_LEN {
        return Err(HybridError::MalformedFrame(format!(
            "frame too short ({} bytes)",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let seq = cursor.read_u16::<BigEndian>()?;
    let mut dps = Vec::new();
    while (cursor.position() as usize) < data.len() {
        dps.push(read_dp(&mut cursor)?);
    }
    Ok(TunnelFrame { seq, dps })
}

fn read_dp(cursor: &mut Cursor<&[u8]>) -> Result<DataPoint> {
    let buf = *cursor.get_ref();
    let start = cursor.position() as usize;
    if buf.len() - start < RECORD_HEADER_LEN {
        return Err(HybridError::MalformedFrame(format!(
            "record header truncated at offset {}",
            start
        )));
    }

    let index = cursor.read_u8()?;
    let tag = cursor.read_u8()?;
    let len = cursor.read_u16::<BigEndian>()? as usize;
    let dp_type = DpType::from_u8(tag).ok_or(HybridError::UnknownDpType(tag))?;

    let value_start = cursor.position() as usize;
    let value_end = value_start + len;
    if value_end > buf.len() {
        return Err(HybridError::MalformedFrame(format!(
            "DP {} declares {} bytes, {} available",
            index,
            len,
            buf.len() - value_start
        )));
    }

    let value = DpValue::from_bytes(dp_type, index, &buf[value_start..value_end])?;
    cursor.set_position(value_end as u64);
    Ok(DataPoint { index, value })
}

/// Truthiness of a JSON value: false, null, zero, NaN and the empty string are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric view of a JSON value. Booleans count as 0/1, numeric strings are parsed.
pub fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn invalid(dp_type: DpType, value: &Value) -> HybridError {
    HybridError::InvalidValue {
        value_type: dp_type.name(),
        reason: format!("cannot convert {}", value),
    }
}
