pub mod link;
pub mod rtu;
pub mod tcp;
pub mod udp;

use crate::error::LinkError;

use async_trait::async_trait;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tokio_modbus::SlaveId;

pub use link::{Link, ModbusConnector};

/// Physical or logical encoding of the single Modbus link.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Subcommand)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Connection {
    /// Use Modbus TCP
    Tcp(tcp::Config),

    /// Use Modbus TCP framing over UDP datagrams
    Udp(tcp::Config),

    /// Use RTU framing over a TCP stream (serial gateways)
    RtuOverTcp(tcp::Config),

    /// Use Modbus RTU on a serial port
    Serial(rtu::Config),
}

impl Display for Connection {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connection::Tcp(c) => write!(fmt, "tcp://{}:{}", c.ip, c.port),
            Connection::Udp(c) => write!(fmt, "udp://{}:{}", c.ip, c.port),
            Connection::RtuOverTcp(c) => write!(fmt, "rtu-over-tcp://{}:{}", c.ip, c.port),
            Connection::Serial(c) => write!(fmt, "serial://{}@{}", c.path, c.baud_rate),
        }
    }
}

/// Primitive holding register access on an established link.
///
/// Implementations are owned by exactly one gateway worker. Nothing else ever touches a link,
/// so the methods take `&mut self` and need no interior locking.
#[async_trait]
pub trait Transport: Send {
    /// `false` once the link observed an I/O failure or was closed.
    fn is_connected(&self) -> bool;

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        slave: SlaveId,
    ) -> Result<Vec<u16>, LinkError>;

    async fn write_registers(
        &mut self,
        address: u16,
        values: &[u16],
        slave: SlaveId,
    ) -> Result<(), LinkError>;

    async fn close(&mut self) -> Result<(), LinkError>;
}

/// Factory for fresh links. Called lazily by the gateway whenever no connected link exists.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Link: Transport + 'static;

    async fn connect(&self) -> Result<Self::Link, LinkError>;

    /// Human readable target used in log messages.
    fn target(&self) -> String;
}
