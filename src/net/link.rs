use crate::error::LinkError;
use crate::net::udp::UdpStream;
use crate::net::{Connection, Connector, Transport};

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{error::Elapsed, timeout};
use tokio_modbus::client::Context;
use tokio_modbus::prelude::{rtu, tcp, Client as ModbusClient, Reader, Slave, SlaveContext, Writer};
use tokio_modbus::SlaveId;
use tokio_serial::SerialStream;

/// Connected `tokio-modbus` client context.
///
/// The link considers itself disconnected after any transport level failure or response
/// timeout. Device exceptions keep it connected since the device evidently answered.
pub struct Link {
    context: Context,
    timeout: Duration,
    connected: bool,
}

impl Link {
    pub fn new(context: Context, timeout: Duration) -> Self {
        Self {
            context,
            timeout,
            connected: true,
        }
    }

    fn settle<T>(
        &mut self,
        result: Result<tokio_modbus::Result<T>, Elapsed>,
    ) -> Result<T, LinkError> {
        match result {
            Ok(Ok(Ok(v))) => Ok(v),
            Ok(Ok(Err(code))) => Err(LinkError::Exception(format!("{code:?}"))),
            Ok(Err(e)) => {
                self.connected = false;
                Err(LinkError::Io(e.to_string()))
            }
            Err(_) => {
                self.connected = false;
                Err(LinkError::TimedOut(self.timeout))
            }
        }
    }
}

#[async_trait]
impl Transport for Link {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        slave: SlaveId,
    ) -> Result<Vec<u16>, LinkError> {
        if !self.connected {
            return Err(LinkError::Closed);
        }
        self.context.set_slave(Slave(slave));
        let result = timeout(
            self.timeout,
            self.context.read_holding_registers(address, count),
        )
        .await;
        self.settle(result)
    }

    async fn write_registers(
        &mut self,
        address: u16,
        values: &[u16],
        slave: SlaveId,
    ) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::Closed);
        }
        self.context.set_slave(Slave(slave));
        let result = timeout(
            self.timeout,
            self.context.write_multiple_registers(address, values),
        )
        .await;
        self.settle(result)
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.connected = false;
        self.context.disconnect().await.map_err(LinkError::from)
    }
}

/// Builds links for one configured [`Connection`].
pub struct ModbusConnector {
    connection: Connection,
    timeout: Duration,
}

impl ModbusConnector {
    pub fn new(connection: Connection, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
        }
    }

    async fn open(&self) -> Result<Context, LinkError> {
        // The slave id is set per request, the attached default is never used on the wire.
        let slave = Slave::broadcast();
        match &self.connection {
            Connection::Tcp(config) => {
                let addr = config.resolve().await?;
                Ok(tcp::connect_slave(addr, slave).await?)
            }
            Connection::Udp(config) => {
                let addr = config.resolve().await?;
                let stream = UdpStream::connect(addr).await?;
                Ok(tcp::attach_slave(stream, slave))
            }
            Connection::RtuOverTcp(config) => {
                let addr = config.resolve().await?;
                let stream = TcpStream::connect(addr).await?;
                Ok(rtu::attach_slave(stream, slave))
            }
            Connection::Serial(config) => {
                let builder = config.builder()?;
                let port = SerialStream::open(&builder).map_err(|e| LinkError::Io(e.to_string()))?;
                Ok(rtu::attach_slave(port, slave))
            }
        }
    }
}

#[async_trait]
impl Connector for ModbusConnector {
    type Link = Link;

    async fn connect(&self) -> Result<Link, LinkError> {
        match timeout(self.timeout, self.open()).await {
            Ok(Ok(context)) => Ok(Link::new(context, self.timeout)),
            Ok(Err(e)) => Err(LinkError::Connect {
                target: self.target(),
                reason: e.to_string(),
            }),
            Err(_) => Err(LinkError::Connect {
                target: self.target(),
                reason: format!("no connection within {:?}", self.timeout),
            }),
        }
    }

    fn target(&self) -> String {
        self.connection.to_string()
    }
}
