use crate::error::LinkError;

use clap::Args;
use serde::{Deserialize, Serialize};
use tokio_serial::{DataBits, Parity, SerialPortBuilder, StopBits};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Args)]
pub struct Config {
    /// The device path to use for communication.
    pub path: String,

    /// The baud rate to use for the serial connection.
    #[arg(short, long, default_value_t = 19200)]
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// The Modbus parity bit [values: N, E, O]
    #[arg(short, long, default_value_t = String::from("N"))]
    #[serde(default = "default_parity")]
    pub parity: String,

    /// The Modbus data bits [values: 5, 6, 7, 8]
    #[arg(short, long, default_value_t = 8)]
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    /// The Modbus stop bits [values: 1, 2]
    #[arg(short, long, default_value_t = 1)]
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

fn default_baud_rate() -> u32 {
    19200
}

fn default_parity() -> String {
    String::from("N")
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

impl Config {
    pub fn builder(&self) -> Result<SerialPortBuilder, LinkError> {
        let data_bits = match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            v => return Err(LinkError::Setting(format!("invalid data bits {v}"))),
        };

        let stop_bits = match self.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            v => return Err(LinkError::Setting(format!("invalid stop bits {v}"))),
        };

        let parity = match self.parity.to_uppercase().as_str() {
            "N" | "NONE" => Parity::None,
            "E" | "EVEN" => Parity::Even,
            "O" | "ODD" => Parity::Odd,
            v => return Err(LinkError::Setting(format!("invalid parity {v}"))),
        };

        Ok(tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity))
    }
}
