use crate::error::Error;

use std::fmt::Display;
use std::time::Duration;
use tokio::sync::oneshot;

/// Unique, monotonically increasing id of a submitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(pub u64);

impl Display for OperationId {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "#{}", self.0)
    }
}

/// How a written value is confirmed by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct WritePolicy {
    /// Register holding the write status. Falls back to `address + status_offset`.
    pub status_register: Option<u16>,
    pub success_status: u16,
    /// Number of status reads before giving up.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl WritePolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(300);
    pub const STATUS_OK: u16 = 0;

    pub fn with_status_register(mut self, register: u16) -> Self {
        self.status_register = Some(register);
        self
    }
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            status_register: None,
            success_status: Self::STATUS_OK,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Read {
        address: u16,
        count: u16,
    },
    Write {
        address: u16,
        values: Vec<u16>,
        policy: WritePolicy,
    },
}

impl Request {
    pub fn kind(&self) -> Kind {
        match self {
            Request::Read { .. } => Kind::Read,
            Request::Write { .. } => Kind::Write,
        }
    }

    pub fn address(&self) -> u16 {
        match self {
            Request::Read { address, .. } | Request::Write { address, .. } => *address,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Raw words of a read, undecoded.
    Words(Vec<u16>),
    /// Write accepted and confirmed by the status register.
    Confirmed,
}

impl Reply {
    pub fn kind(&self) -> Kind {
        match self {
            Reply::Words(_) => Kind::Read,
            Reply::Confirmed => Kind::Write,
        }
    }

    /// Words of a read reply. Any other reply is an error, never an empty read.
    pub fn into_words(self) -> Result<Vec<u16>, Error> {
        match self {
            Reply::Words(words) => Ok(words),
            other => Err(Error::UnexpectedReply {
                expected: Kind::Read,
                got: other.kind(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Read,
    Write,
}

impl Display for Kind {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.write_str(match self {
            Kind::Read => "read",
            Kind::Write => "write",
        })
    }
}

/// Snapshot of the operation the worker currently executes. Diagnostics only.
#[derive(Debug, Clone, PartialEq)]
pub struct Pending {
    pub id: OperationId,
    pub kind: Kind,
    pub address: u16,
}

impl Pending {
    pub fn new(id: OperationId, request: &Request) -> Self {
        Self {
            id,
            kind: request.kind(),
            address: request.address(),
        }
    }
}

/// A queued request and the handle resolving its caller.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub id: OperationId,
    pub request: Request,
    pub reply: oneshot::Sender<Result<Reply, Error>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_is_not_an_empty_read() {
        assert_eq!(Reply::Words(vec![0x0102]).into_words(), Ok(vec![0x0102]));
        assert_eq!(
            Reply::Confirmed.into_words(),
            Err(Error::UnexpectedReply {
                expected: Kind::Read,
                got: Kind::Write,
            })
        );
    }

    #[test]
    fn pending_snapshot() {
        let request = Request::Write {
            address: 0x0031,
            values: vec![450],
            policy: WritePolicy::default().with_status_register(0x0041),
        };
        let pending = Pending::new(OperationId(7), &request);
        assert_eq!(pending.kind, Kind::Write);
        assert_eq!(pending.address, 0x0031);
        assert_eq!(pending.id.to_string(), "#7");
    }
}
