//! Conversion of raw holding register words into typed values.
//!
//! Words are concatenated big-endian, most significant byte first. All functions are pure and
//! report inconsistent descriptors as [`DecodeError`] so callers can treat the value as unknown.

use crate::error::DecodeError;
use crate::register::{BitField, Conversion, ConversionKind, DataType, Descriptor, FieldKind, Value};

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Local, TimeDelta, Timelike};

/// Decode the register value described by `descriptor`.
///
/// Integer results found in the descriptor's choice table resolve to their label. A scale
/// other than `1.0` turns the result into [`Value::F64`].
pub fn decode(words: &[u16], descriptor: &Descriptor) -> Result<Value, DecodeError> {
    let value = scalar(words, descriptor)?;
    if let Some(label) = value.as_integer().and_then(|v| descriptor.choice(v)) {
        return Ok(Value::Label(label.to_owned()));
    }
    Ok(scaled(value, descriptor.scale))
}

/// Decode one bit-field of the register value.
///
/// The mask is applied to the unscaled integer, followed by the right shift. Binary fields
/// yield [`Value::Bool`]. Value fields resolve through the field's choice table, or the
/// register's table if the field has none, and are scaled otherwise.
pub fn decode_field(
    words: &[u16],
    descriptor: &Descriptor,
    field: &BitField,
) -> Result<Value, DecodeError> {
    let bits = scalar(words, descriptor)?
        .as_bits()
        .ok_or_else(|| DecodeError::NotInteger {
            name: descriptor.name.clone(),
            field: field.name.clone(),
            data_type: descriptor.data_type.to_string(),
        })?;
    let masked = bits & field.mask;

    if field.kind == FieldKind::Binary {
        return Ok(Value::Bool(masked != 0));
    }

    let shifted = masked.checked_shr(field.shift).unwrap_or(0);
    let label = if field.choices.is_empty() {
        descriptor.choice(shifted as i128)
    } else {
        field.choice(shifted as i128)
    };
    if let Some(label) = label {
        return Ok(Value::Label(label.to_owned()));
    }
    Ok(scaled(Value::U64(shifted), descriptor.scale))
}

/// Derive a value from the decoded register value.
pub fn convert(
    words: &[u16],
    descriptor: &Descriptor,
    conversion: &Conversion,
) -> Result<Value, DecodeError> {
    let failed = || DecodeError::Conversion {
        name: descriptor.name.clone(),
        conversion: conversion.name.clone(),
    };
    let value = scalar(words, descriptor)?.as_integer().ok_or_else(failed)?;
    match conversion.kind {
        ConversionKind::BootTime => {
            let uptime = i64::try_from(value).map_err(|_| failed())?;
            boot_time(uptime, Local::now())
                .map(Value::Timestamp)
                .ok_or_else(failed)
        }
    }
}

/// Wall clock time `uptime` seconds before `now`, truncated to the minute.
pub fn boot_time(uptime: i64, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let delta = TimeDelta::try_seconds(uptime)?;
    now.checked_sub_signed(delta)?
        .with_second(0)?
        .with_nanosecond(0)
}

fn scaled(value: Value, scale: Option<f64>) -> Value {
    match (scale, value.as_f64()) {
        (Some(scale), Some(v)) if scale != 1.0 => Value::F64(v * scale),
        _ => value,
    }
}

fn scalar(words: &[u16], descriptor: &Descriptor) -> Result<Value, DecodeError> {
    match descriptor.data_type {
        DataType::U8 => Ok(Value::U8(low_byte(words, descriptor)?)),
        DataType::I8 => Ok(Value::I8(low_byte(words, descriptor)? as i8)),
        DataType::U16 => Ok(Value::U16(BigEndian::read_u16(&bytes(words, descriptor)?))),
        DataType::I16 => Ok(Value::I16(BigEndian::read_i16(&bytes(words, descriptor)?))),
        DataType::U32 => Ok(Value::U32(BigEndian::read_u32(&bytes(words, descriptor)?))),
        DataType::I32 => Ok(Value::I32(BigEndian::read_i32(&bytes(words, descriptor)?))),
        DataType::U64 => Ok(Value::U64(BigEndian::read_u64(&bytes(words, descriptor)?))),
        DataType::I64 => Ok(Value::I64(BigEndian::read_i64(&bytes(words, descriptor)?))),
        DataType::F32 => Ok(Value::F32(BigEndian::read_f32(&bytes(words, descriptor)?))),
        DataType::F64 => Ok(Value::F64(BigEndian::read_f64(&bytes(words, descriptor)?))),
    }
}

/// 8-bit values live in the second byte of the big-endian pair of the first word.
fn low_byte(words: &[u16], descriptor: &Descriptor) -> Result<u8, DecodeError> {
    if descriptor.count > 1 {
        return Err(DecodeError::ByteCount {
            name: descriptor.name.clone(),
            data_type: descriptor.data_type.to_string(),
            count: descriptor.count,
        });
    }
    match words.first() {
        Some(word) => Ok(word.to_be_bytes()[1]),
        None => Err(length_error(words, descriptor)),
    }
}

fn bytes(words: &[u16], descriptor: &Descriptor) -> Result<Vec<u8>, DecodeError> {
    if words.len() != descriptor.data_type.width() {
        return Err(length_error(words, descriptor));
    }
    Ok(words.iter().flat_map(|w| w.to_be_bytes()).collect())
}

fn length_error(words: &[u16], descriptor: &Descriptor) -> DecodeError {
    DecodeError::Length {
        name: descriptor.name.clone(),
        data_type: descriptor.data_type.to_string(),
        expected: descriptor.data_type.width(),
        actual: words.len(),
    }
}
