//! Write the last value of a write point again whenever a binary signal turns on.
//!
//! Boilers forget volatile setpoints when the adapter loses its OpenTherm connection. The
//! replay task looks up the connectivity signal, retrying a bounded number of times while
//! the scan scheduler has not published it yet, and then rewrites the last value on every
//! transition to on.

use crate::gateway::Gateway;
use crate::net::Connector;
use crate::register::WritePoint;
use crate::signal::SignalBus;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub const LOOKUP_ATTEMPTS: u32 = 10;
pub const LOOKUP_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the signal to appear, `attempt` counts from 1.
    Lookup { attempt: u32 },
    Subscribed,
    GaveUp,
}

pub struct Replay {
    point: WritePoint,
    signal: String,
    last: watch::Receiver<Option<Vec<u16>>>,
    attempts: u32,
    delay: Duration,
}

impl Replay {
    pub fn new(
        point: WritePoint,
        signal: &str,
        last: watch::Receiver<Option<Vec<u16>>>,
    ) -> Self {
        Self {
            point,
            signal: signal.to_owned(),
            last,
            attempts: LOOKUP_ATTEMPTS,
            delay: LOOKUP_DELAY,
        }
    }

    pub fn with_lookup(mut self, attempts: u32, delay: Duration) -> Self {
        self.attempts = attempts;
        self.delay = delay;
        self
    }

    /// Run until the task is aborted or the signal is dropped. Returns the final phase.
    pub async fn run<C: Connector>(self, gateway: Arc<Gateway<C>>, bus: Arc<SignalBus>) -> Phase {
        let mut phase = Phase::Lookup { attempt: 1 };
        let mut signal = None;
        while let Phase::Lookup { attempt } = phase {
            sleep(self.delay).await;
            phase = match bus.subscribe(&self.signal).await {
                Some(receiver) => {
                    info!("Replay of '{}' subscribed to '{}'", self.point.name, self.signal);
                    signal = Some(receiver);
                    Phase::Subscribed
                }
                None if attempt < self.attempts => {
                    debug!(
                        "Lookup {} of '{}' for '{}' failed, retry in {:?}",
                        attempt, self.signal, self.point.name, self.delay
                    );
                    Phase::Lookup {
                        attempt: attempt + 1,
                    }
                }
                None => Phase::GaveUp,
            };
        }

        let Some(mut signal) = signal else {
            error!(
                "Unable to find signal '{}' for '{}' after {} attempts",
                self.signal, self.point.name, self.attempts
            );
            return Phase::GaveUp;
        };

        let _ = signal.borrow_and_update();
        while signal.changed().await.is_ok() {
            if *signal.borrow_and_update() != Some(true) {
                continue;
            }
            let last = self.last.borrow().clone();
            let Some(values) = last else {
                debug!("'{}' turned on, no value of '{}' to replay", self.signal, self.point.name);
                continue;
            };
            match gateway
                .write(self.point.address, values, self.point.policy())
                .await
            {
                Ok(()) => info!("Replayed '{}' after '{}' turned on", self.point.name, self.signal),
                Err(e) => warn!("Replay of '{}' failed [{e}]", self.point.name),
            }
        }
        Phase::Subscribed
    }
}
