//! Transaction gateway serializing all register access onto one Modbus link.
//!
//! Any number of tasks may submit requests concurrently. They are queued in FIFO order and
//! executed one after another by a single worker task which owns the link. Writes are
//! confirmed by polling a status register before the caller is resolved.

mod request;
mod worker;

pub use request::{Kind, OperationId, Pending, Reply, Request, WritePolicy};
pub use worker::QUEUE_POLL_INTERVAL;

use crate::error::{Error, Result};
use crate::net::{Connector, Transport};

use request::Envelope;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_modbus::SlaveId;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl Display for State {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.write_str(match self {
            State::Stopped => "stopped",
            State::Starting => "starting",
            State::Running => "running",
            State::Stopping => "stopping",
        })
    }
}

fn default_slave() -> SlaveId {
    1
}

fn default_status_offset() -> u16 {
    Config::DEFAULT_STATUS_OFFSET
}

/// Gateway wide settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_slave")]
    pub slave: SlaveId,
    /// Distance of the implicit status register from the written register.
    #[serde(default = "default_status_offset")]
    pub status_offset: u16,
}

impl Config {
    pub const DEFAULT_STATUS_OFFSET: u16 = 0x0010;
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slave: default_slave(),
            status_offset: default_status_offset(),
        }
    }
}

/// State shared between the gateway handle and its worker.
pub(crate) struct Inner<C: Connector> {
    connector: C,
    config: Config,
    state: watch::Sender<State>,
    queue: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    current: watch::Sender<Option<Pending>>,
    depth: AtomicUsize,
    next_id: AtomicU64,
}

/// Handle of a gateway. Share it between callers with an `Arc`.
pub struct Gateway<C: Connector> {
    inner: Arc<Inner<C>>,
    lifecycle: Mutex<Lifecycle<C>>,
}

struct Lifecycle<C: Connector> {
    stop: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<Option<C::Link>>>,
}

impl<C: Connector> Gateway<C> {
    pub fn new(connector: C, config: Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                state: watch::Sender::new(State::Stopped),
                queue: Mutex::new(None),
                current: watch::Sender::new(None),
                depth: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
            }),
            lifecycle: Mutex::new(Lifecycle {
                stop: None,
                handle: None,
            }),
        }
    }

    /// Spawn the worker. Does nothing if the gateway is already running.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.handle.is_some() {
            debug!("Gateway for {} is already running", self.inner.connector.target());
            return;
        }
        self.inner.state.send_replace(State::Starting);

        let (sender, receiver) = mpsc::unbounded_channel();
        let (stop, stop_receiver) = watch::channel(false);
        *self.inner.queue.lock().await = Some(sender);
        lifecycle.handle = Some(tokio::spawn(worker::run(
            self.inner.clone(),
            receiver,
            stop_receiver,
        )));
        lifecycle.stop = Some(stop);

        self.inner.state.send_replace(State::Running);
        info!("Gateway for {} started", self.inner.connector.target());
    }

    /// Stop the worker and close the link.
    ///
    /// An operation already executing runs to completion first. Requests still queued are
    /// discarded and their callers observe [`Error::NotRunning`].
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(handle) = lifecycle.handle.take() else {
            debug!("Gateway for {} is not running", self.inner.connector.target());
            return;
        };
        self.inner.state.send_replace(State::Stopping);

        if let Some(stop) = lifecycle.stop.take() {
            stop.send_replace(true);
        }
        *self.inner.queue.lock().await = None;

        let link = match handle.await {
            Ok(link) => link,
            Err(e) => {
                error!("Gateway worker terminated abnormally [{e}]");
                None
            }
        };
        match link {
            Some(mut link) => {
                if let Err(e) = link.close().await {
                    warn!("Closing link to {} failed [{e}]", self.inner.connector.target());
                }
            }
            None => debug!("No link to {} was open", self.inner.connector.target()),
        }

        self.inner.current.send_replace(None);
        self.inner.depth.store(0, Ordering::SeqCst);
        self.inner.state.send_replace(State::Stopped);
        info!("Gateway for {} stopped", self.inner.connector.target());
    }

    pub fn state(&self) -> State {
        *self.inner.state.borrow()
    }

    /// Operation currently executed by the worker, if any.
    pub fn current_operation(&self) -> Option<Pending> {
        self.inner.current.borrow().clone()
    }

    /// Number of requests waiting in the queue, excluding the one executing.
    pub fn queue_depth(&self) -> usize {
        self.inner.depth.load(Ordering::SeqCst)
    }

    /// Queue the request and wait until the worker resolved it.
    pub async fn submit(&self, request: Request) -> Result<Reply> {
        let receiver = {
            let queue = self.inner.queue.lock().await;
            let Some(sender) = queue.as_ref() else {
                return Err(Error::NotRunning);
            };
            let id = OperationId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
            let (reply, receiver) = oneshot::channel();
            self.inner.depth.fetch_add(1, Ordering::SeqCst);
            if sender.send(Envelope { id, request, reply }).is_err() {
                self.inner.depth.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::NotRunning);
            }
            receiver
        };
        receiver.await.map_err(|_| Error::NotRunning)?
    }

    pub async fn read(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.submit(Request::Read { address, count })
            .await?
            .into_words()
    }

    pub async fn write(&self, address: u16, values: Vec<u16>, policy: WritePolicy) -> Result<()> {
        self.submit(Request::Write {
            address,
            values,
            policy,
        })
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;

    use async_trait::async_trait;
    use futures_util::future::join_all;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    const LATENCY: Duration = Duration::from_millis(10);

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Read(u16, u16),
        Write(u16, Vec<u16>),
        /// Link closed while `in_flight` calls were still executing.
        Close { in_flight: usize },
    }

    #[derive(Default)]
    struct Device {
        calls: Vec<Call>,
        reads: VecDeque<std::result::Result<Vec<u16>, LinkError>>,
        writes: VecDeque<std::result::Result<(), LinkError>>,
        connect_failures: usize,
        connects: usize,
        in_flight: usize,
        max_in_flight: usize,
        closed: usize,
    }

    #[derive(Clone, Default)]
    struct MockConnector {
        device: Arc<StdMutex<Device>>,
        latency: Option<Duration>,
    }

    impl MockConnector {
        fn with_latency(latency: Duration) -> Self {
            Self {
                latency: Some(latency),
                ..Default::default()
            }
        }

        fn device(&self) -> std::sync::MutexGuard<'_, Device> {
            self.device.lock().unwrap()
        }
    }

    struct MockLink {
        device: Arc<StdMutex<Device>>,
        latency: Duration,
        connected: bool,
    }

    impl MockLink {
        async fn transact<T>(
            &mut self,
            call: Call,
            respond: impl FnOnce(&mut Device) -> Option<std::result::Result<T, LinkError>>,
            fallback: T,
        ) -> std::result::Result<T, LinkError> {
            {
                let mut device = self.device.lock().unwrap();
                device.calls.push(call);
                device.in_flight += 1;
                device.max_in_flight = device.max_in_flight.max(device.in_flight);
            }
            sleep(self.latency).await;
            let mut device = self.device.lock().unwrap();
            device.in_flight -= 1;
            let result = respond(&mut *device).unwrap_or(Ok(fallback));
            if matches!(result, Err(LinkError::Io(_))) {
                self.connected = false;
            }
            result
        }
    }

    #[async_trait]
    impl Transport for MockLink {
        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn read_holding_registers(
            &mut self,
            address: u16,
            count: u16,
            _slave: SlaveId,
        ) -> std::result::Result<Vec<u16>, LinkError> {
            if address == 0xDEAD {
                panic!("device exploded");
            }
            let fallback = (0..count).map(|i| address + i).collect();
            self.transact(Call::Read(address, count), |d| d.reads.pop_front(), fallback)
                .await
        }

        async fn write_registers(
            &mut self,
            address: u16,
            values: &[u16],
            _slave: SlaveId,
        ) -> std::result::Result<(), LinkError> {
            self.transact(Call::Write(address, values.to_vec()), |d| d.writes.pop_front(), ())
                .await
        }

        async fn close(&mut self) -> std::result::Result<(), LinkError> {
            self.connected = false;
            let mut device = self.device.lock().unwrap();
            let in_flight = device.in_flight;
            device.calls.push(Call::Close { in_flight });
            device.closed += 1;
            Ok(())
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Link = MockLink;

        async fn connect(&self) -> std::result::Result<MockLink, LinkError> {
            let mut device = self.device.lock().unwrap();
            if device.connect_failures > 0 {
                device.connect_failures -= 1;
                return Err(LinkError::Connect {
                    target: self.target(),
                    reason: String::from("refused"),
                });
            }
            device.connects += 1;
            Ok(MockLink {
                device: self.device.clone(),
                latency: self.latency.unwrap_or(LATENCY),
                connected: true,
            })
        }

        fn target(&self) -> String {
            String::from("mock://device")
        }
    }

    async fn running(connector: &MockConnector) -> Arc<Gateway<MockConnector>> {
        let gateway = Arc::new(Gateway::new(connector.clone(), Config::default()));
        gateway.start().await;
        gateway
    }

    fn status_reads(device: &mut Device, values: &[u16]) {
        device.reads.extend(values.iter().map(|v| Ok(vec![*v])));
    }

    #[tokio::test]
    async fn not_running_never_reaches_transport() {
        let connector = MockConnector::default();
        let gateway = Gateway::new(connector.clone(), Config::default());
        assert_eq!(gateway.state(), State::Stopped);
        assert_eq!(gateway.read(0x0010, 1).await, Err(Error::NotRunning));

        gateway.start().await;
        assert_eq!(gateway.state(), State::Running);
        gateway.stop().await;
        assert_eq!(gateway.state(), State::Stopped);
        assert_eq!(
            gateway.write(0x0031, vec![1], WritePolicy::default()).await,
            Err(Error::NotRunning)
        );

        let device = connector.device();
        assert!(device.calls.is_empty());
        assert_eq!(device.connects, 0);
    }

    #[tokio::test]
    async fn start_twice_is_noop() {
        let connector = MockConnector::default();
        let gateway = running(&connector).await;
        gateway.start().await;
        assert_eq!(gateway.read(0x0020, 2).await.unwrap(), vec![0x0020, 0x0021]);
        gateway.stop().await;
        gateway.stop().await;
        assert_eq!(connector.device().connects, 1);
        assert_eq!(connector.device().closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_are_serialized_in_order() {
        let connector = MockConnector::default();
        let gateway = running(&connector).await;

        let results = join_all((0..5u16).map(|i| gateway.read(0x0010 + i, 1))).await;
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), vec![0x0010 + i as u16]);
        }

        let device = connector.device();
        assert_eq!(device.max_in_flight, 1);
        let expected: Vec<_> = (0..5u16).map(|i| Call::Read(0x0010 + i, 1)).collect();
        assert_eq!(device.calls, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_writers_do_not_overlap() {
        let connector = MockConnector::default();
        status_reads(&mut connector.device(), &[0, 0, 0]);
        let gateway = running(&connector).await;

        let writers: Vec<_> = (0..3u16)
            .map(|i| {
                let gateway = gateway.clone();
                tokio::spawn(async move {
                    gateway
                        .write(0x0031 + i, vec![i], WritePolicy::default())
                        .await
                })
            })
            .collect();
        for writer in join_all(writers).await {
            assert_eq!(writer.unwrap(), Ok(()));
        }

        let device = connector.device();
        assert_eq!(device.max_in_flight, 1);
        assert_eq!(device.calls.len(), 6);
        // Every write is directly followed by its own status read.
        for pair in device.calls.chunks(2) {
            match (&pair[0], &pair[1]) {
                (Call::Write(address, _), Call::Read(status, 1)) => {
                    assert_eq!(*status, address + Config::DEFAULT_STATUS_OFFSET)
                }
                calls => panic!("unexpected sequence {calls:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn write_confirmed_on_later_attempt() {
        let connector = MockConnector::default();
        status_reads(&mut connector.device(), &[5, 0, 0]);
        let gateway = running(&connector).await;

        assert_eq!(
            gateway.write(0x0031, vec![450], WritePolicy::default()).await,
            Ok(())
        );

        let device = connector.device();
        assert_eq!(
            device.calls,
            vec![
                Call::Write(0x0031, vec![450]),
                Call::Read(0x0041, 1),
                Call::Read(0x0041, 1),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn write_not_confirmed_after_retries() {
        let connector = MockConnector::default();
        status_reads(&mut connector.device(), &[1, 1, 1, 1]);
        let gateway = running(&connector).await;

        let started = Instant::now();
        let result = gateway
            .write(0x0031, vec![1], WritePolicy::default())
            .await;
        let elapsed = started.elapsed();

        assert_eq!(
            result,
            Err(Error::WriteNotConfirmed {
                address: 0x0031,
                attempts: 3
            })
        );
        // Two pauses between three attempts, none after the last one.
        assert!(elapsed >= Duration::from_millis(600));
        assert!(elapsed < Duration::from_millis(900));
        assert_eq!(connector.device().calls.len(), 4);
        assert_eq!(connector.device().reads.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn status_read_error_keeps_verifying() {
        let connector = MockConnector::default();
        {
            let mut device = connector.device();
            device
                .reads
                .push_back(Err(LinkError::Exception(String::from("IllegalDataAddress"))));
            device.reads.push_back(Ok(vec![0]));
        }
        let gateway = running(&connector).await;
        assert_eq!(gateway.write(0x0031, vec![1], WritePolicy::default()).await, Ok(()));
    }

    #[tokio::test]
    async fn explicit_status_register_zero() {
        let connector = MockConnector::default();
        status_reads(&mut connector.device(), &[0]);
        let gateway = running(&connector).await;

        let policy = WritePolicy::default().with_status_register(0);
        assert_eq!(gateway.write(0x0080, vec![2], policy).await, Ok(()));
        assert_eq!(connector.device().calls[1], Call::Read(0x0000, 1));
    }

    #[tokio::test]
    async fn custom_success_status() {
        let connector = MockConnector::default();
        status_reads(&mut connector.device(), &[0, 7]);
        let gateway = running(&connector).await;

        let policy = WritePolicy {
            success_status: 7,
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        };
        assert_eq!(gateway.write(0x0031, vec![1], policy).await, Ok(()));
        assert_eq!(connector.device().calls.len(), 3);
    }

    #[tokio::test]
    async fn failed_write_skips_verification() {
        let connector = MockConnector::default();
        connector
            .device()
            .writes
            .push_back(Err(LinkError::Exception(String::from("IllegalDataValue"))));
        let gateway = running(&connector).await;

        let result = gateway.write(0x0031, vec![1], WritePolicy::default()).await;
        assert!(matches!(result, Err(Error::Write { address: 0x0031, .. })));
        assert_eq!(connector.device().calls.len(), 1);
    }

    #[tokio::test]
    async fn read_error_is_reported() {
        let connector = MockConnector::default();
        connector
            .device()
            .reads
            .push_back(Err(LinkError::Io(String::from("broken pipe"))));
        let gateway = running(&connector).await;

        let result = gateway.read(0x0012, 2).await;
        assert!(matches!(
            result,
            Err(Error::Read {
                address: 0x0012,
                count: 2,
                ..
            })
        ));
        // The broken link is replaced on the next operation.
        assert!(gateway.read(0x0012, 2).await.is_ok());
        assert_eq!(connector.device().connects, 2);
    }

    #[tokio::test]
    async fn connect_failure_is_retried_on_next_operation() {
        let connector = MockConnector::default();
        connector.device().connect_failures = 1;
        let gateway = running(&connector).await;

        assert!(matches!(
            gateway.read(0x0010, 1).await,
            Err(Error::TransportUnavailable(LinkError::Connect { .. }))
        ));
        assert_eq!(gateway.read(0x0010, 1).await, Ok(vec![0x0010]));
        assert_eq!(gateway.state(), State::Running);
    }

    #[tokio::test]
    async fn panic_resolves_as_failure() {
        let connector = MockConnector::default();
        let gateway = running(&connector).await;

        assert!(matches!(gateway.read(0xDEAD, 1).await, Err(Error::Aborted(_))));
        assert_eq!(gateway.read(0x0010, 1).await, Ok(vec![0x0010]));
        assert_eq!(gateway.state(), State::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn diagnostics_while_busy() {
        let connector = MockConnector::with_latency(Duration::from_millis(100));
        let gateway = running(&connector).await;
        assert_eq!(gateway.current_operation(), None);

        let readers: Vec<_> = (0..3u16)
            .map(|i| {
                let gateway = gateway.clone();
                tokio::spawn(async move { gateway.read(0x0100 + i, 1).await })
            })
            .collect();
        sleep(Duration::from_millis(1)).await;

        let pending = gateway.current_operation().unwrap();
        assert_eq!(pending.kind, Kind::Read);
        assert_eq!(gateway.queue_depth(), 2);

        for reader in join_all(readers).await {
            assert!(reader.unwrap().is_ok());
        }
        assert_eq!(gateway.current_operation(), None);
        assert_eq!(gateway.queue_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_finishes_in_flight_and_drops_queued() {
        let connector = MockConnector::with_latency(Duration::from_millis(100));
        let gateway = running(&connector).await;

        let readers: Vec<_> = (0..3u16)
            .map(|i| {
                let gateway = gateway.clone();
                tokio::spawn(async move { gateway.read(0x0100 + i, 1).await })
            })
            .collect();
        sleep(Duration::from_millis(1)).await;
        assert!(gateway.current_operation().is_some());

        gateway.stop().await;
        let results: Vec<_> = join_all(readers)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| **r == Err(Error::NotRunning))
                .count(),
            2
        );
        let device = connector.device();
        assert_eq!(
            device.calls,
            vec![Call::Read(0x0100, 1), Call::Close { in_flight: 0 }]
        );
        assert_eq!(device.closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_worker_stops_promptly() {
        let connector = MockConnector::default();
        let gateway = running(&connector).await;
        sleep(QUEUE_POLL_INTERVAL * 3).await;

        let started = Instant::now();
        gateway.stop().await;
        assert!(started.elapsed() < QUEUE_POLL_INTERVAL);
        assert_eq!(connector.device().closed, 0);
    }
}
