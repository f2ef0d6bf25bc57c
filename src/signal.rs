//! Named boolean signals shared between the scan scheduler and replay tasks.

use std::collections::HashMap;
use tokio::sync::{watch, RwLock};

/// Latest value of a signal, `None` while unknown.
pub type Signal = watch::Receiver<Option<bool>>;

#[derive(Default)]
pub struct SignalBus {
    signals: RwLock<HashMap<String, watch::Sender<Option<bool>>>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a signal known with an unknown value. Existing signals keep their value.
    pub async fn register(&self, name: &str) {
        self.signals
            .write()
            .await
            .entry(name.to_owned())
            .or_insert_with(|| watch::Sender::new(None));
    }

    /// Update a signal. Subscribers are only notified if the value changed.
    pub async fn publish(&self, name: &str, value: Option<bool>) {
        let mut signals = self.signals.write().await;
        let sender = signals
            .entry(name.to_owned())
            .or_insert_with(|| watch::Sender::new(None));
        sender.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    pub async fn subscribe(&self, name: &str) -> Option<Signal> {
        self.signals.read().await.get(name).map(|s| s.subscribe())
    }

    pub async fn get(&self, name: &str) -> Option<bool> {
        self.signals
            .read()
            .await
            .get(name)
            .and_then(|s| *s.borrow())
    }
}

#[cfg(test)]
mod tests {
    use super::SignalBus;

    #[tokio::test]
    async fn unknown_signal_cannot_be_subscribed() {
        let bus = SignalBus::new();
        assert!(bus.subscribe("connected").await.is_none());
        bus.register("connected").await;
        let signal = bus.subscribe("connected").await.unwrap();
        assert_eq!(*signal.borrow(), None);
    }

    #[tokio::test]
    async fn only_changes_notify() {
        let bus = SignalBus::new();
        bus.register("connected").await;
        let mut signal = bus.subscribe("connected").await.unwrap();

        bus.publish("connected", Some(true)).await;
        assert!(signal.has_changed().unwrap());
        assert_eq!(*signal.borrow_and_update(), Some(true));

        bus.publish("connected", Some(true)).await;
        assert!(!signal.has_changed().unwrap());

        bus.publish("connected", Some(false)).await;
        assert!(signal.has_changed().unwrap());
        assert_eq!(bus.get("connected").await, Some(false));
    }
}
