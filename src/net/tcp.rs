use crate::error::LinkError;

use clap::Args;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::lookup_host;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Args)]
pub struct Config {
    /// The host name or ip of the Modbus device or gateway.
    #[arg(short, long, default_value_t = String::from("127.0.0.1"))]
    pub ip: String,

    /// The port of the Modbus device or gateway.
    #[arg(short, long, default_value_t = 502)]
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    502
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip: String::from("127.0.0.1"),
            port: default_port(),
        }
    }
}

impl Config {
    /// Resolve the configured host. The first resolved address wins.
    pub async fn resolve(&self) -> Result<SocketAddr, LinkError> {
        let target = format!("{}:{}", self.ip, self.port);
        let mut addrs = lookup_host(target.clone())
            .await
            .map_err(|e| LinkError::Connect {
                target: target.clone(),
                reason: e.to_string(),
            })?;
        addrs.next().ok_or_else(|| LinkError::Connect {
            target,
            reason: String::from("host did not resolve"),
        })
    }
}
