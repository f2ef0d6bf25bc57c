//! Periodic polling of read registers.
//!
//! Registers sharing a scan interval form one group. Each group runs its own task, issuing
//! one read per register per tick in configured order through the gateway. Decoded values
//! are published as [`Reading`]s, binary bit-fields also to the [`SignalBus`].

use crate::error::Result;
use crate::gateway::Gateway;
use crate::net::Connector;
use crate::register::{self, Descriptor, FieldKind, Value};
use crate::signal::SignalBus;

use chrono::{DateTime, Local};
use futures_util::future::join_all;
use itertools::Itertools;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Interval used for registers without an explicit scan interval.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// One decoded value. `value` is `None` if the read or the decoding failed.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Reading {
    pub name: String,
    pub address: u16,
    pub unit: Option<String>,
    pub value: Option<Value>,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub interval: Duration,
    pub registers: Vec<Descriptor>,
}

fn interval_of(descriptor: &Descriptor) -> Duration {
    descriptor
        .scan_interval
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or(DEFAULT_SCAN_INTERVAL)
}

/// Group descriptors by scan interval, shortest interval first, keeping configured order.
pub fn groups(descriptors: &[Descriptor]) -> Vec<Group> {
    let chunks = descriptors
        .iter()
        .sorted_by_key(|d| interval_of(d))
        .chunk_by(|d| interval_of(d));
    chunks
        .into_iter()
        .map(|(interval, registers)| Group {
            interval,
            registers: registers.cloned().collect(),
        })
        .collect()
}

/// All readings of one register: the value itself, its bit-fields and its conversions.
pub fn readings(
    descriptor: &Descriptor,
    words: Option<&[u16]>,
    timestamp: DateTime<Local>,
) -> Vec<Reading> {
    let reading = |name: &str, unit: Option<&String>, value: Option<Value>| Reading {
        name: name.to_owned(),
        address: descriptor.address,
        unit: unit.cloned(),
        value,
        timestamp,
    };
    let known = |result: std::result::Result<Value, crate::error::DecodeError>| match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{e}");
            None
        }
    };

    let mut readings = Vec::with_capacity(1 + descriptor.bitfields.len() + descriptor.conversions.len());
    readings.push(reading(
        &descriptor.name,
        descriptor.unit.as_ref(),
        words.and_then(|w| known(register::decode(w, descriptor))),
    ));
    for field in descriptor.bitfields.iter() {
        let value = words.and_then(|w| known(register::decode_field(w, descriptor, field)));
        let unit = match field.kind {
            FieldKind::Binary => None,
            FieldKind::Value => descriptor.unit.as_ref(),
        };
        readings.push(reading(&field.name, unit, value));
    }
    for conversion in descriptor.conversions.iter() {
        let value = words.and_then(|w| known(register::convert(w, descriptor, conversion)));
        readings.push(reading(&conversion.name, None, value));
    }
    readings
}

/// Running scan groups.
pub struct Scanner {
    tasks: Vec<JoinHandle<()>>,
}

impl Scanner {
    pub fn spawn<C: Connector>(
        gateway: Arc<Gateway<C>>,
        bus: Arc<SignalBus>,
        descriptors: &[Descriptor],
        sink: UnboundedSender<Reading>,
    ) -> Self {
        let tasks = groups(descriptors)
            .into_iter()
            .map(|group| {
                debug!(
                    "Scan {} register(s) every {:?}",
                    group.registers.len(),
                    group.interval
                );
                tokio::spawn(scan(gateway.clone(), bus.clone(), group, sink.clone()))
            })
            .collect();
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Abort all scan groups and wait until they are gone.
    pub async fn stop(self) {
        for task in self.tasks.iter() {
            task.abort();
        }
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    warn!("Scan group terminated abnormally [{e}]");
                }
            }
        }
    }
}

async fn scan<C: Connector>(
    gateway: Arc<Gateway<C>>,
    bus: Arc<SignalBus>,
    group: Group,
    sink: UnboundedSender<Reading>,
) {
    let mut ticker = interval(group.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        for descriptor in group.registers.iter() {
            let result: Result<Vec<u16>> = gateway.read(descriptor.address, descriptor.count).await;
            let words = match result {
                Ok(words) => Some(words),
                Err(e) => {
                    warn!("Scan of '{}' failed [{e}]", descriptor.name);
                    None
                }
            };
            let readings = readings(descriptor, words.as_deref(), Local::now());
            for (field, reading) in descriptor.bitfields.iter().zip(readings.iter().skip(1)) {
                if field.kind == FieldKind::Binary {
                    let state = match reading.value {
                        Some(Value::Bool(on)) => Some(on),
                        _ => None,
                    };
                    bus.publish(&field.name, state).await;
                }
            }
            for reading in readings {
                if sink.send(reading).is_err() {
                    debug!("Reading sink closed, stop scanning");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::{BitField, DataType};

    fn descriptor(name: &str, address: u16, scan_interval: Option<u64>) -> Descriptor {
        let mut descriptor = Descriptor::new(name, address, 1, DataType::U16);
        descriptor.scan_interval = scan_interval;
        descriptor
    }

    #[test]
    fn group_by_interval() {
        let descriptors = vec![
            descriptor("status", 0x0010, Some(10)),
            descriptor("version", 0x0011, Some(300)),
            descriptor("burner", 0x001D, Some(5)),
            descriptor("errors", 0x001E, None),
            descriptor("modulation", 0x001C, Some(5)),
        ];
        let groups = groups(&descriptors);
        let summary: Vec<_> = groups
            .iter()
            .map(|g| {
                (
                    g.interval.as_secs(),
                    g.registers.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                (5, vec!["burner", "modulation"]),
                (10, vec!["status"]),
                (30, vec!["errors"]),
                (300, vec!["version"]),
            ]
        );
    }

    #[test]
    fn failed_read_is_unknown() {
        let descriptor = descriptor("burner_status", 0x001D, Some(5)).with_bitfield(BitField {
            name: String::from("burner_on"),
            mask: 0x1,
            shift: 0,
            kind: FieldKind::Binary,
            choices: Vec::new(),
        });
        let readings = readings(&descriptor, None, Local::now());
        assert_eq!(readings.len(), 2);
        assert!(readings.iter().all(|r| r.value.is_none()));
        assert!(readings.iter().all(|r| r.address == 0x001D));
    }

    #[test]
    fn bitfields_follow_value() {
        let descriptor = descriptor("burner_status", 0x001D, Some(5)).with_bitfield(BitField {
            name: String::from("burner_on"),
            mask: 0x1,
            shift: 0,
            kind: FieldKind::Binary,
            choices: Vec::new(),
        });
        let readings = readings(&descriptor, Some(&[0x0001]), Local::now());
        assert_eq!(readings[0].value, Some(Value::U16(1)));
        assert_eq!(readings[1].name, "burner_on");
        assert_eq!(readings[1].value, Some(Value::Bool(true)));
    }

    #[test]
    fn decode_error_is_unknown() {
        let mut descriptor = descriptor("broken", 0x0030, None);
        descriptor.data_type = DataType::U8;
        descriptor.count = 2;
        let readings = readings(&descriptor, Some(&[0x0001, 0x0002]), Local::now());
        assert_eq!(readings[0].value, None);
    }
}
