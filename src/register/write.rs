use crate::error::EncodeError;
use crate::gateway::WritePolicy;
use crate::register::Choice;

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_max_retries() -> u32 {
    WritePolicy::DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    WritePolicy::DEFAULT_RETRY_DELAY.as_millis() as u64
}

/// One-shot value of a button control.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Button {
    pub name: String,
    pub value: u16,
}

/// The way a user supplies the value of a write point.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Control {
    Number {
        min: f64,
        max: f64,
        scale: Option<f64>,
    },
    Switch {
        on: u16,
        off: u16,
    },
    Select {
        choices: Vec<Choice>,
    },
    Button {
        buttons: Vec<Button>,
    },
}

/// User input for a write point.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Number(f64),
    Switch(bool),
    Select(String),
    Press(String),
}

/// Description of a writable register together with its write-then-verify policy.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WritePoint {
    pub name: String,
    pub address: u16,
    pub control: Control,
    /// Explicit status register, `address + status_offset` of the gateway otherwise.
    pub status_register: Option<u16>,
    #[serde(default)]
    pub success_status: u16,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Name of a binary signal. The last written value is written again whenever it turns on.
    pub replay: Option<String>,
}

impl WritePoint {
    pub fn new(name: &str, address: u16, control: Control) -> Self {
        Self {
            name: name.to_owned(),
            address,
            control,
            status_register: None,
            success_status: 0,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            replay: None,
        }
    }

    pub fn policy(&self) -> WritePolicy {
        WritePolicy {
            status_register: self.status_register,
            success_status: self.success_status,
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// Parse textual input as given on the command line.
    pub fn parse_input(&self, text: &str) -> Result<Input, EncodeError> {
        let mismatch = || EncodeError::Mismatch {
            name: self.name.clone(),
            input: text.to_owned(),
        };
        match &self.control {
            Control::Number { .. } => text
                .trim()
                .parse::<f64>()
                .map(Input::Number)
                .map_err(|_| mismatch()),
            Control::Switch { .. } => match text.trim().to_lowercase().as_str() {
                "on" | "true" | "1" => Ok(Input::Switch(true)),
                "off" | "false" | "0" => Ok(Input::Switch(false)),
                _ => Err(mismatch()),
            },
            Control::Select { .. } => Ok(Input::Select(text.to_owned())),
            Control::Button { .. } => Ok(Input::Press(text.to_owned())),
        }
    }

    /// Register words to write for `input`.
    pub fn encode(&self, input: &Input) -> Result<Vec<u16>, EncodeError> {
        let word = match (&self.control, input) {
            (Control::Number { min, max, scale }, Input::Number(value)) => {
                self.number(*value, *min, *max, *scale)?
            }
            (Control::Switch { on, off }, Input::Switch(state)) => {
                if *state {
                    *on
                } else {
                    *off
                }
            }
            (Control::Select { choices }, Input::Select(option)) => {
                let choice = choices
                    .iter()
                    .find(|c| &c.label == option)
                    .ok_or_else(|| self.unknown(option))?;
                u16::try_from(choice.value).map_err(|_| EncodeError::Overflow {
                    name: self.name.clone(),
                    value: choice.value as f64,
                })?
            }
            (Control::Button { buttons }, Input::Press(button)) => {
                buttons
                    .iter()
                    .find(|b| &b.name == button)
                    .ok_or_else(|| self.unknown(button))?
                    .value
            }
            (_, input) => {
                return Err(EncodeError::Mismatch {
                    name: self.name.clone(),
                    input: format!("{input:?}"),
                })
            }
        };
        Ok(vec![word])
    }

    fn number(
        &self,
        value: f64,
        min: f64,
        max: f64,
        scale: Option<f64>,
    ) -> Result<u16, EncodeError> {
        if !(min..=max).contains(&value) {
            return Err(EncodeError::OutOfRange {
                name: self.name.clone(),
                value,
                min,
                max,
            });
        }
        let raw = match scale {
            Some(scale) if scale > 0.0 => (value * scale).round(),
            _ => value.round(),
        };
        // Negative values are sent as 16-bit two's complement.
        if raw >= 0.0 && raw <= u16::MAX as f64 {
            Ok(raw as u16)
        } else if raw < 0.0 && raw >= i16::MIN as f64 {
            Ok(raw as i16 as u16)
        } else {
            Err(EncodeError::Overflow {
                name: self.name.clone(),
                value: raw,
            })
        }
    }

    fn unknown(&self, option: &str) -> EncodeError {
        EncodeError::UnknownOption {
            name: self.name.clone(),
            option: option.to_owned(),
        }
    }
}
