use crate::gateway::Kind;

use std::time::Duration;
use thiserror::Error;

/// Failures reported by a single gateway operation.
///
/// None of these are fatal to the gateway itself. Each one resolves exactly one caller's
/// pending result and the worker moves on to the next queued request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("gateway is not running")]
    NotRunning,

    #[error("transport unavailable [{0}]")]
    TransportUnavailable(LinkError),

    #[error("read of {count} register(s) at {address:#06X} failed [{source}]")]
    Read {
        address: u16,
        count: u16,
        source: LinkError,
    },

    #[error("write to {address:#06X} failed [{source}]")]
    Write { address: u16, source: LinkError },

    #[error("value at {address:#06X} not confirmed after {attempts} attempts")]
    WriteNotConfirmed { address: u16, attempts: u32 },

    #[error("operation {0} aborted unexpectedly")]
    Aborted(u64),

    #[error("expected a {expected} reply, got a {got} reply")]
    UnexpectedReply { expected: Kind, got: Kind },
}

/// Failures of the underlying Modbus link.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("connect to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    #[error("invalid connection setting: {0}")]
    Setting(String),

    #[error("link is closed")]
    Closed,

    #[error("no response within {0:?}")]
    TimedOut(Duration),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("device exception: {0}")]
    Exception(String),
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Inconsistent register configuration or data detected while decoding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("8-bit type {data_type} of '{name}' requires count=1, got count={count}")]
    ByteCount {
        name: String,
        data_type: String,
        count: u16,
    },

    #[error("'{name}' expects {expected} word(s) for {data_type}, got {actual}")]
    Length {
        name: String,
        data_type: String,
        expected: usize,
        actual: usize,
    },

    #[error("bit-field '{field}' of '{name}' cannot be applied to {data_type}")]
    NotInteger {
        name: String,
        field: String,
        data_type: String,
    },

    #[error("conversion '{conversion}' of '{name}' out of range")]
    Conversion { name: String, conversion: String },
}

/// Rejected input for a write point.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("'{name}' does not accept {input}")]
    Mismatch { name: String, input: String },

    #[error("{value} is outside of [{min}, {max}] for '{name}'")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("'{name}' has no option '{option}'")]
    UnknownOption { name: String, option: String },

    #[error("'{name}' value {value} does not fit into a register")]
    Overflow { name: String, value: f64 },
}

pub type Result<T> = std::result::Result<T, Error>;
