use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Label(String),
    Timestamp(DateTime<Local>),
}

impl Value {
    /// Integer content, `None` for floats, labels and timestamps.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Self::U8(v) => Some(*v as i128),
            Self::U16(v) => Some(*v as i128),
            Self::U32(v) => Some(*v as i128),
            Self::U64(v) => Some(*v as i128),
            Self::I8(v) => Some(*v as i128),
            Self::I16(v) => Some(*v as i128),
            Self::I32(v) => Some(*v as i128),
            Self::I64(v) => Some(*v as i128),
            Self::Bool(v) => Some(*v as i128),
            _ => None,
        }
    }

    /// Raw two's complement bits of integer values, sized to the decoded type.
    pub fn as_bits(&self) -> Option<u64> {
        match self {
            Self::U8(v) => Some(*v as u64),
            Self::U16(v) => Some(*v as u64),
            Self::U32(v) => Some(*v as u64),
            Self::U64(v) => Some(*v),
            Self::I8(v) => Some(*v as u8 as u64),
            Self::I16(v) => Some(*v as u16 as u64),
            Self::I32(v) => Some(*v as u32 as u64),
            Self::I64(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F32(v) => Some(*v as f64),
            Self::F64(v) => Some(*v),
            Self::Label(_) | Self::Timestamp(_) => None,
            _ => self.as_integer().map(|v| v as f64),
        }
    }
}

impl Display for Value {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::U8(v) => write!(fmt, "{v}"),
            Self::U16(v) => write!(fmt, "{v}"),
            Self::U32(v) => write!(fmt, "{v}"),
            Self::U64(v) => write!(fmt, "{v}"),
            Self::I8(v) => write!(fmt, "{v}"),
            Self::I16(v) => write!(fmt, "{v}"),
            Self::I32(v) => write!(fmt, "{v}"),
            Self::I64(v) => write!(fmt, "{v}"),
            Self::F32(v) => write!(fmt, "{v}"),
            Self::F64(v) => write!(fmt, "{v}"),
            Self::Bool(v) => write!(fmt, "{}", if *v { "on" } else { "off" }),
            Self::Label(v) => fmt.write_str(v),
            Self::Timestamp(v) => write!(fmt, "{}", v.format("%d.%m.%Y %H:%M")),
        }
    }
}
