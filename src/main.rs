use ecto_gateway::config::AppConfig;
use ecto_gateway::gateway::Gateway;
use ecto_gateway::net::{Connection, ModbusConnector};
use ecto_gateway::register::WritePoint;
use ecto_gateway::replay::Replay;
use ecto_gateway::scan::{Reading, Scanner};
use ecto_gateway::signal::SignalBus;

use anyhow::{anyhow, Context};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML or JSON file providing register map and write points.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Modbus slave id of the adapter. Overrides the configuration file.
    #[arg(long)]
    slave: Option<u8>,

    /// Response timeout in milliseconds.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Distance of the status register from a written register, e.g. 0x10.
    #[arg(long, value_parser = parse_u16)]
    status_offset: Option<u16>,

    /// Write a value once the gateway is running, e.g. `dhw_setpoint=55`.
    #[arg(short, long = "write", value_name = "NAME=VALUE")]
    writes: Vec<String>,

    /// Switch on verbose output.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Link to the adapter. Falls back to the `[connection]` table of the configuration.
    #[command(subcommand)]
    connection: Option<Connection>,
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid register offset '{s}' [{e}]"))
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

/// Resolve `NAME=VALUE` into the write point and the encoded words.
fn parse_write(config: &AppConfig, arg: &str) -> anyhow::Result<(WritePoint, Vec<u16>)> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected NAME=VALUE, got '{arg}'"))?;
    let point = config
        .write_point(name.trim())
        .ok_or_else(|| anyhow!("Unknown write point '{}'", name.trim()))?;
    let input = point.parse_input(value)?;
    let values = point.encode(&input)?;
    Ok((point.clone(), values))
}

fn log_reading(reading: &Reading) {
    let unit = reading.unit.as_deref().unwrap_or("");
    match &reading.value {
        Some(value) => info!("{} = {}{}", reading.name, value, unit),
        None => warn!("{} = unknown", reading.name),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = match &args.config {
        Some(path) => AppConfig::read(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?,
        None => AppConfig::bundled()?,
    };
    if let Some(slave) = args.slave {
        config.gateway.slave = slave;
    }
    if let Some(offset) = args.status_offset {
        config.gateway.status_offset = offset;
    }
    let writes = args
        .writes
        .iter()
        .map(|arg| parse_write(&config, arg))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let connection = args
        .connection
        .or_else(|| config.connection.clone())
        .ok_or_else(|| anyhow!("No connection given on the command line or in the configuration"))?;
    info!("Using {connection}");
    let connector = ModbusConnector::new(connection, Duration::from_millis(args.timeout_ms));
    let gateway = Arc::new(Gateway::new(connector, config.gateway.clone()));
    gateway.start().await;

    let bus = Arc::new(SignalBus::new());
    let (sink, mut readings) = mpsc::unbounded_channel();
    let scanner = Scanner::spawn(gateway.clone(), bus.clone(), &config.registers, sink);
    if scanner.is_empty() {
        warn!("No registers configured, nothing will be scanned");
    }

    let last_values: HashMap<String, watch::Sender<Option<Vec<u16>>>> = config
        .writes
        .iter()
        .map(|point| (point.name.clone(), watch::Sender::new(None)))
        .collect();
    let replays: Vec<_> = config
        .writes
        .iter()
        .filter_map(|point| {
            let signal = point.replay.as_ref()?;
            let last = last_values.get(&point.name)?.subscribe();
            let replay = Replay::new(point.clone(), signal, last);
            Some(tokio::spawn(replay.run(gateway.clone(), bus.clone())))
        })
        .collect();

    for (point, values) in writes {
        match gateway
            .write(point.address, values.clone(), point.policy())
            .await
        {
            Ok(()) => {
                info!("Successfully set '{}' to {:?}", point.name, values);
                if let Some(last) = last_values.get(&point.name) {
                    last.send_replace(Some(values));
                }
            }
            Err(e) => error!("Failed to set '{}' [{e}]", point.name),
        }
    }

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            reading = readings.recv() => match reading {
                Some(reading) => log_reading(&reading),
                None => break,
            },
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Waiting for Ctrl-C failed [{e}]");
                }
                break;
            }
        }
    }

    info!("Shutting down");
    scanner.stop().await;
    for replay in replays {
        replay.abort();
    }
    gateway.stop().await;
    Ok(())
}
