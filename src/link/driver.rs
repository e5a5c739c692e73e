//! Async driver that owns the transport and runs the protocol state machine.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::protocol::{LinkAction, LinkEvent, LinkProtocol};
use super::transport::{SerialConfig, SerialTransport, Transport};
use crate::{AcquisitionError, Result};

/// Read chunk size; comfortably larger than one streaming package.
const READ_BUF_SIZE: usize = 8192;

/// Event fan-out capacity. Consumers that fall this far behind lose the
/// oldest events rather than stalling the link task.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug)]
enum LinkCommand {
    Start,
    Stop,
}

/// Handle to a running detector link task.
///
/// The task exclusively owns the transport and the [`LinkProtocol`] session;
/// this handle only sends control commands and hands out event receivers.
/// Dropping the handle cancels the task.
pub struct DetectorLink {
    commands: mpsc::UnboundedSender<LinkCommand>,
    events: broadcast::Sender<LinkEvent>,
    cancel: CancellationToken,
}

impl DetectorLink {
    /// Open the configured serial port and spawn the link task over it.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let transport = SerialTransport::open(config)?;
        Ok(Self::spawn(transport))
    }

    /// Spawn the link task over an already-open transport.
    pub fn spawn<T>(transport: T) -> Self
    where
        T: Transport,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        let task_events = event_tx.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            link_task(transport, command_rx, task_events, task_cancel).await;
        });

        Self { commands: command_tx, events: event_tx, cancel }
    }

    /// Subscribe to link events. Every subscriber sees every event from the
    /// moment of subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Begin the handshake and start streaming.
    pub fn start(&self) -> Result<()> {
        self.commands
            .send(LinkCommand::Start)
            .map_err(|_| AcquisitionError::link_failed("link task is not running"))
    }

    /// Stop the session and return the link to idle. Safe to call at any
    /// time, including when already idle.
    pub fn stop(&self) -> Result<()> {
        self.commands
            .send(LinkCommand::Stop)
            .map_err(|_| AcquisitionError::link_failed("link task is not running"))
    }

    /// Cancel the link task and release the transport.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for DetectorLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The link task: reads transport bytes, feeds the protocol core and
/// executes the actions it returns. The response timer lives here as an
/// optional deadline so the select loop stays timer-free while idle.
async fn link_task<T>(
    mut transport: T,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: broadcast::Sender<LinkEvent>,
    cancel: CancellationToken,
) where
    T: Transport,
{
    info!("link task started");
    let mut protocol = LinkProtocol::new();
    let mut deadline: Option<Instant> = None;
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let actions = tokio::select! {
            _ = cancel.cancelled() => {
                info!("link task cancelled");
                break;
            }
            command = commands.recv() => {
                match command {
                    Some(LinkCommand::Start) => match protocol.start() {
                        Ok(actions) => actions,
                        Err(e) => {
                            warn!(error = %e, "start rejected");
                            Vec::new()
                        }
                    },
                    Some(LinkCommand::Stop) => protocol.stop(),
                    None => {
                        debug!("command sender dropped, shutting down");
                        break;
                    }
                }
            }
            result = transport.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        error!("transport closed");
                        let e = AcquisitionError::link_failed("transport closed");
                        let _ = events.send(LinkEvent::LinkError(Arc::new(e)));
                        break;
                    }
                    Ok(n) => protocol.on_bytes(&buf[..n]),
                    Err(e) => {
                        error!(error = %e, "transport read failed");
                        let _ = events.send(LinkEvent::LinkError(Arc::new(e)));
                        break;
                    }
                }
            }
            _ = async { sleep_until(deadline.unwrap_or_else(Instant::now)).await },
                if deadline.is_some() =>
            {
                deadline = None;
                protocol.on_timeout()
            }
        };

        if execute(&mut transport, &events, &mut deadline, actions)
            .await
            .is_err()
        {
            break;
        }
    }

    info!("link task ended");
}

/// Execute one transition's actions in order. A failed transport write is
/// fatal: the error is published and the task stops.
async fn execute<T>(
    transport: &mut T,
    events: &broadcast::Sender<LinkEvent>,
    deadline: &mut Option<Instant>,
    actions: Vec<LinkAction>,
) -> Result<()>
where
    T: Transport,
{
    for action in actions {
        match action {
            LinkAction::Send(bytes) => {
                if let Err(e) = transport.write_all(bytes).await {
                    error!(error = %e, "transport write failed");
                    let _ = events.send(LinkEvent::LinkError(Arc::new(e)));
                    return Err(AcquisitionError::link_failed("transport write failed"));
                }
            }
            LinkAction::ArmTimeout(duration) => {
                *deadline = Some(Instant::now() + duration);
            }
            LinkAction::CancelTimeout => {
                *deadline = None;
            }
            LinkAction::Emit(event) => {
                // Send fails only when no subscriber exists yet; events are
                // not load-bearing for the protocol itself.
                let _ = events.send(event);
            }
        }
    }
    Ok(())
}
