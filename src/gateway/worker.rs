use crate::error::{Error, LinkError, Result};
use crate::gateway::request::{Envelope, Pending, Reply, Request, WritePolicy};
use crate::gateway::Inner;
use crate::net::{Connector, Transport};

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc::UnboundedReceiver, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Upper bound for an idle wait on the queue before the run flag is checked again.
pub const QUEUE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Worker loop owning the link.
///
/// Exactly one request is executed at a time. The link is returned on exit so the caller can
/// close it after the loop is gone.
pub(crate) async fn run<C: Connector>(
    inner: Arc<Inner<C>>,
    mut queue: UnboundedReceiver<Envelope>,
    mut stop: watch::Receiver<bool>,
) -> Option<C::Link> {
    let mut link: Option<C::Link> = None;
    debug!("Worker for {} started", inner.connector.target());

    loop {
        if *stop.borrow() {
            break;
        }
        let envelope = tokio::select! {
            biased;
            _ = stop.changed() => break,
            envelope = queue.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
            _ = sleep(QUEUE_POLL_INTERVAL) => continue,
        };
        inner.depth.fetch_sub(1, Ordering::SeqCst);

        let Envelope { id, request, reply } = envelope;
        inner
            .current
            .send_replace(Some(Pending::new(id, &request)));

        let outcome = AssertUnwindSafe(execute(&inner, &mut link, request))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                error!("Operation {id} panicked, dropping the link");
                link = None;
                Err(Error::Aborted(id.0))
            }
        };

        inner.current.send_replace(None);
        if reply.send(result).is_err() {
            debug!("Caller of operation {id} is gone");
        }
    }

    debug!("Worker for {} stopped", inner.connector.target());
    link
}

async fn execute<C: Connector>(
    inner: &Inner<C>,
    link: &mut Option<C::Link>,
    request: Request,
) -> Result<Reply> {
    let slave = inner.config.slave;
    let transport = connected(inner, link).await?;
    match request {
        Request::Read { address, count } => {
            debug!(
                "Perform read operation on [{:#06X}, {:#06X})",
                address,
                address as u32 + count as u32
            );
            transport
                .read_holding_registers(address, count, slave)
                .await
                .map(Reply::Words)
                .map_err(|source| Error::Read {
                    address,
                    count,
                    source,
                })
        }
        Request::Write {
            address,
            values,
            policy,
        } => {
            let status_register = policy
                .status_register
                .unwrap_or_else(|| address.wrapping_add(inner.config.status_offset));
            write_verified(transport, slave, address, &values, status_register, &policy)
                .await
                .map(|_| Reply::Confirmed)
        }
    }
}

/// Cached link, or a fresh one if none exists or the cached one dropped its connection.
async fn connected<'a, C: Connector>(
    inner: &Inner<C>,
    link: &'a mut Option<C::Link>,
) -> Result<&'a mut C::Link> {
    if !link.as_ref().is_some_and(|l| l.is_connected()) {
        if let Some(mut stale) = link.take() {
            if let Err(e) = stale.close().await {
                debug!("Closing stale link failed [{e}]");
            }
        }
        match inner.connector.connect().await {
            Ok(fresh) => {
                info!("Connected to {}", inner.connector.target());
                *link = Some(fresh);
            }
            Err(e) => {
                warn!("Connection to {} failed [{e}]", inner.connector.target());
                return Err(Error::TransportUnavailable(e));
            }
        }
    }
    link.as_mut()
        .ok_or(Error::TransportUnavailable(LinkError::Closed))
}

/// Write the values, then poll the status register until it reports success.
pub(crate) async fn write_verified<T: Transport + ?Sized>(
    transport: &mut T,
    slave: u8,
    address: u16,
    values: &[u16],
    status_register: u16,
    policy: &WritePolicy,
) -> Result<()> {
    debug!(
        "Perform write operation of {} word(s) at {:#06X}",
        values.len(),
        address
    );
    transport
        .write_registers(address, values, slave)
        .await
        .map_err(|source| Error::Write { address, source })?;

    for attempt in 1..=policy.max_retries {
        match transport
            .read_holding_registers(status_register, 1, slave)
            .await
        {
            Ok(words) if words.first() == Some(&policy.success_status) => {
                debug!("Write at {address:#06X} confirmed on attempt {attempt}");
                return Ok(());
            }
            Ok(words) => debug!(
                "Status {:#06X} of write at {:#06X} is {:?} (attempt {}/{})",
                status_register, address, words, attempt, policy.max_retries
            ),
            Err(e) => warn!(
                "Reading status {:#06X} failed on attempt {}/{} [{}]",
                status_register, attempt, policy.max_retries, e
            ),
        }
        if attempt < policy.max_retries {
            sleep(policy.retry_delay).await;
        }
    }

    Err(Error::WriteNotConfirmed {
        address,
        attempts: policy.max_retries,
    })
}
