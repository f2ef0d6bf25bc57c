pub mod codec;
pub mod value;
pub mod write;

use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub use codec::{convert, decode, decode_field};
pub use value::Value;
pub use write::{Control, Input, WritePoint};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl DataType {
    /// Number of 16-bit words the type occupies on the wire.
    pub fn width(&self) -> usize {
        match self {
            DataType::U8 | DataType::I8 | DataType::U16 | DataType::I16 => 1,
            DataType::U32 | DataType::I32 | DataType::F32 => 2,
            DataType::U64 | DataType::I64 | DataType::F64 => 4,
        }
    }
}

impl Display for DataType {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.write_str(match self {
            DataType::U8 => "u8",
            DataType::I8 => "i8",
            DataType::U16 => "u16",
            DataType::I16 => "i16",
            DataType::U32 => "u32",
            DataType::I32 => "i32",
            DataType::U64 => "u64",
            DataType::I64 => "i64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        })
    }
}

/// Integer to label mapping entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Choice {
    pub value: i64,
    pub label: String,
}

fn lookup(choices: &[Choice], value: i128) -> Option<&str> {
    choices
        .iter()
        .find(|c| c.value as i128 == value)
        .map(|c| c.label.as_str())
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// `true` if any bit of the mask is set.
    Binary,
    #[default]
    Value,
}

/// Named subset of bits of a register value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BitField {
    pub name: String,
    pub mask: u64,
    #[serde(default)]
    pub shift: u32,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl BitField {
    pub fn choice(&self, value: i128) -> Option<&str> {
        lookup(&self.choices, value)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversionKind {
    /// Uptime in seconds to the wall clock time of the last boot.
    BootTime,
}

/// Value derived from the decoded register value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Conversion {
    pub name: String,
    pub kind: ConversionKind,
}

fn default_count() -> u16 {
    1
}

/// Description of a readable register.
///
/// Descriptors are plain configuration data. Nothing is validated on load, inconsistent
/// combinations are reported by the codec when a value is decoded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub name: String,
    pub address: u16,
    #[serde(default = "default_count")]
    pub count: u16,
    pub data_type: DataType,
    pub scale: Option<f64>,
    /// Poll interval in seconds.
    pub scan_interval: Option<u64>,
    pub unit: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub bitfields: Vec<BitField>,
    #[serde(default)]
    pub conversions: Vec<Conversion>,
}

impl Descriptor {
    pub fn new(name: &str, address: u16, count: u16, data_type: DataType) -> Self {
        Self {
            name: name.to_owned(),
            address,
            count,
            data_type,
            scale: None,
            scan_interval: None,
            unit: None,
            choices: Vec::new(),
            bitfields: Vec::new(),
            conversions: Vec::new(),
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_bitfield(mut self, field: BitField) -> Self {
        self.bitfields.push(field);
        self
    }

    pub fn with_choices(mut self, choices: Vec<Choice>) -> Self {
        self.choices = choices;
        self
    }

    pub fn choice(&self, value: i128) -> Option<&str> {
        lookup(&self.choices, value)
    }
}
