//! Drives one configured session: connect, wait for discovery, then run the
//! configured reads, writes and subscriptions in order.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};

use gattlink_app::engine::BleEngine;
use gattlink_app::ports::Transport;
use gattlink_domain::error::GattError;
use gattlink_domain::event::{Event, Operation};
use gattlink_domain::gatt::CharacteristicRef;
use gattlink_domain::id::PeripheralAddress;

use crate::config::{Config, ConfigError, Target};

/// Delay between retries while the session is busy with a previous operation.
const BUSY_RETRY: Duration = Duration::from_millis(50);

/// Why a configured session stopped early.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Gatt(#[from] GattError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("peripheral disconnected")]
    Disconnected,
    #[error("event bus closed")]
    Closed,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Connect to `target` and run the configured operations in order.
///
/// # Errors
///
/// Fails when the connection or discovery fails, the link drops, or a step
/// outlives the operation timeout. A failed read or write is reported as an
/// event and does not end the session.
pub async fn run_session<T: Transport>(
    engine: &BleEngine<T>,
    events: &mut broadcast::Receiver<Event>,
    config: &Config,
    target: Target,
) -> Result<(), SessionError> {
    let timeout = config.operation_timeout();
    let address = match target {
        Target::Position(position) => engine.connect_by_position(position)?,
        Target::Address(address) => {
            engine.connect_by_address(&address);
            address
        }
    };

    let ready = wait_for(events, &address, timeout, "service discovery", discovery_settles).await?;
    if let Event::Failure { error, .. } = ready {
        return Err(error.into());
    }
    for characteristic in engine.supported_characteristics(&address)? {
        tracing::info!(
            %address,
            service = %characteristic.service,
            characteristic = %characteristic.uuid,
            properties = %characteristic.properties,
            "characteristic"
        );
    }

    for job in &config.read {
        let characteristic = job.reference();
        submit(timeout, || engine.read(&address, characteristic, job.request())).await?;
        wait_for(events, &address, timeout, "read", |event| {
            read_settles(event, characteristic)
        })
        .await?;
    }
    for job in &config.write {
        let characteristic = job.reference();
        let value = job.value()?;
        submit(timeout, || engine.write(&address, characteristic, value.clone())).await?;
        wait_for(events, &address, timeout, "write", |event| {
            write_settles(event, characteristic)
        })
        .await?;
    }
    for job in &config.subscribe {
        submit(timeout, || {
            engine.subscribe(&address, job.reference(), job.request())
        })
        .await?;
    }

    if !config.subscribe.is_empty() {
        tracing::info!(listen_secs = config.scan.listen_secs, "listening for notifications");
        tokio::time::sleep(config.listen_duration()).await;
    }
    Ok(())
}

/// Issue an operation, retrying while the session is busy.
async fn submit(
    timeout: Duration,
    mut operation: impl FnMut() -> Result<(), GattError>,
) -> Result<(), SessionError> {
    let attempt = async {
        loop {
            match operation() {
                Err(GattError::OperationInProgress) => tokio::time::sleep(BUSY_RETRY).await,
                other => return other,
            }
        }
    };
    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| SessionError::Timeout("an idle session"))?
        .map_err(SessionError::from)
}

fn discovery_settles(event: &Event) -> bool {
    matches!(
        event,
        Event::ServicesDiscovered { .. }
            | Event::Failure {
                operation: Operation::Connect | Operation::Discover,
                ..
            }
    )
}

fn read_settles(event: &Event, expected: CharacteristicRef) -> bool {
    match event {
        Event::ValueRead { characteristic, .. }
        | Event::Failure {
            operation: Operation::Read(characteristic),
            ..
        } => *characteristic == expected,
        _ => false,
    }
}

fn write_settles(event: &Event, expected: CharacteristicRef) -> bool {
    match event {
        Event::ValueWritten { characteristic, .. }
        | Event::Failure {
            operation: Operation::Write(characteristic),
            ..
        } => *characteristic == expected,
        _ => false,
    }
}

/// Wait for the first event about `address` accepted by `accept`.
async fn wait_for(
    events: &mut broadcast::Receiver<Event>,
    address: &PeripheralAddress,
    timeout: Duration,
    what: &'static str,
    accept: impl Fn(&Event) -> bool,
) -> Result<Event, SessionError> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if event.address() != Some(address) => {}
                Ok(Event::Disconnected { .. }) => return Err(SessionError::Disconnected),
                Ok(event) if accept(&event) => return Ok(event),
                Ok(Event::Failure {
                    operation, error, ..
                }) => {
                    tracing::debug!(%operation, %error, waiting_for = what, "unrelated failure");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "session watcher fell behind");
                }
                Err(RecvError::Closed) => return Err(SessionError::Closed),
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| SessionError::Timeout(what))?
}
