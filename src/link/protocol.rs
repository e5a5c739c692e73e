//! Command/response state machine for the detector link.
//!
//! The protocol core is fully synchronous: the async driver feeds it bytes,
//! timer expirations and control calls, and it answers with an ordered list
//! of [`LinkAction`]s (send bytes, arm/cancel the response timer, emit an
//! event). Keeping the core free of I/O makes every transition testable
//! without a serial port.
//!
//! ## Handshake
//!
//! `start()` runs a three-command handshake before streaming:
//!
//! 1. `"A4"` (stop streaming): the detector answers with *silence*, so the
//!    response timeout is the success signal
//! 2. `"GS"` (get info): answered with a 28-byte [`InfoFrame`]
//! 3. `"A2"` (start streaming): any bytes acknowledge it and are already
//!    package data
//!
//! Each command arms a 1000 ms response timer and is retried unchanged on
//! expiry; the third consecutive timeout on one command emits a single
//! `LinkError` and returns the machine to `Idle`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::frame::{FrameBuffer, InfoFrame, PackageFrame};
use crate::{AcquisitionError, Result};

/// Stop-streaming command.
pub const CMD_STOP_STREAMING: &[u8] = b"A4";
/// Get-info command.
pub const CMD_GET_INFO: &[u8] = b"GS";
/// Start-streaming command.
pub const CMD_START_STREAMING: &[u8] = b"A2";

/// Response window per command.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Consecutive timeouts on one command before the link gives up.
pub const MAX_RETRIES: u32 = 3;

/// Protocol states the link can rest in.
///
/// Sending a command is atomic within the transition into the corresponding
/// waiting state, so no separate sending states exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Idle,
    WaitingForStopResponse,
    WaitingForInfoResponse,
    WaitingForStartResponse,
    ReceivingPackage,
}

/// Typed events the link publishes to its consumers.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Detector identity parsed during the handshake.
    InfoReceived(Arc<InfoFrame>),
    /// A validated streaming package.
    PackageReceived(Arc<PackageFrame>),
    /// Fatal session failure; the link is back in `Idle`.
    LinkError(Arc<AcquisitionError>),
}

/// Side effects requested by a protocol transition, in order.
#[derive(Debug)]
pub enum LinkAction {
    /// Write these command bytes to the transport.
    Send(&'static [u8]),
    /// Arm (or re-arm) the response timer.
    ArmTimeout(Duration),
    /// Cancel the response timer.
    CancelTimeout,
    /// Publish an event.
    Emit(LinkEvent),
}

/// The link's command session: current state, last command sent, retry
/// counter and the partially filled package scratch buffer.
#[derive(Debug, Default)]
pub struct LinkProtocol {
    state: LinkState,
    buffer: FrameBuffer,
    /// In-flight partial package; at most [`PackageFrame::SIZE`] bytes.
    scratch: Vec<u8>,
    last_command: Option<&'static [u8]>,
    retries: u32,
}

impl LinkProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Begin the handshake. Only valid from `Idle`.
    pub fn start(&mut self) -> Result<Vec<LinkAction>> {
        if self.state != LinkState::Idle {
            return Err(AcquisitionError::config(format!(
                "start() is only valid from Idle (current state {:?})",
                self.state
            )));
        }
        debug!("starting handshake");
        let mut actions = Vec::new();
        self.send_command(CMD_STOP_STREAMING, &mut actions);
        self.state = LinkState::WaitingForStopResponse;
        Ok(actions)
    }

    /// Abort the session: cancel the timer, clear all buffers, reset the
    /// retry counter and force `Idle`. Valid from any state.
    pub fn stop(&mut self) -> Vec<LinkAction> {
        debug!(state = ?self.state, "stopping link");
        self.state = LinkState::Idle;
        self.buffer.clear();
        self.scratch.clear();
        self.last_command = None;
        self.retries = 0;
        vec![LinkAction::CancelTimeout]
    }

    /// Handle bytes arriving from the transport.
    pub fn on_bytes(&mut self, data: &[u8]) -> Vec<LinkAction> {
        let mut actions = Vec::new();
        match self.state {
            LinkState::Idle => {
                trace!(len = data.len(), "discarding bytes while idle");
            }
            LinkState::WaitingForStopResponse => {
                // The stop command's contract is silence; data here is
                // stale streaming output still draining out of the detector.
                warn!(
                    len = data.len(),
                    "unexpected data while waiting for stop silence, discarding"
                );
            }
            LinkState::WaitingForInfoResponse => {
                self.buffer.extend(data);
                self.try_take_info(&mut actions);
            }
            LinkState::WaitingForStartResponse => {
                // Any response acknowledges the start command; what arrived
                // is already package data and must not be discarded.
                self.buffer.extend(data);
                actions.push(LinkAction::CancelTimeout);
                self.retries = 0;
                self.state = LinkState::ReceivingPackage;
                debug!("streaming acknowledged, receiving packages");
                self.process_packages(&mut actions);
            }
            LinkState::ReceivingPackage => {
                self.buffer.extend(data);
                self.process_packages(&mut actions);
            }
        }
        actions
    }

    /// Handle expiry of the response timer.
    pub fn on_timeout(&mut self) -> Vec<LinkAction> {
        let mut actions = Vec::new();
        match self.state {
            LinkState::Idle => {
                warn!("spurious timeout while idle");
            }
            LinkState::WaitingForStopResponse => {
                // No data for a full window means the detector honored the
                // stop command: timeout is success here.
                debug!("stop confirmed by silence, requesting detector info");
                self.retries = 0;
                self.send_command(CMD_GET_INFO, &mut actions);
                self.state = LinkState::WaitingForInfoResponse;
            }
            LinkState::WaitingForInfoResponse
            | LinkState::WaitingForStartResponse
            | LinkState::ReceivingPackage => {
                self.retries += 1;
                if self.retries >= MAX_RETRIES {
                    warn!(
                        state = ?self.state,
                        retries = self.retries,
                        "response retries exhausted, link failed"
                    );
                    let command = self.last_command.unwrap_or_default();
                    let error = AcquisitionError::link_failed(format!(
                        "no response to command {:02X?} after {} attempts",
                        command, self.retries
                    ));
                    actions.push(LinkAction::CancelTimeout);
                    actions.push(LinkAction::Emit(LinkEvent::LinkError(Arc::new(error))));
                    self.state = LinkState::Idle;
                    self.buffer.clear();
                    self.scratch.clear();
                    self.last_command = None;
                    self.retries = 0;
                } else if let Some(command) = self.last_command {
                    debug!(
                        command = ?command,
                        attempt = self.retries,
                        "response timeout, resending command"
                    );
                    self.send_command(command, &mut actions);
                }
            }
        }
        actions
    }

    /// Send a command: clear the read buffer, record the command bytes and
    /// arm the response timer.
    fn send_command(&mut self, command: &'static [u8], actions: &mut Vec<LinkAction>) {
        self.buffer.clear();
        self.last_command = Some(command);
        actions.push(LinkAction::Send(command));
        actions.push(LinkAction::ArmTimeout(RESPONSE_TIMEOUT));
    }

    /// Look for a complete info frame; on success consume it, emit
    /// `InfoReceived` and advance the handshake to the start command.
    fn try_take_info(&mut self, actions: &mut Vec<LinkAction>) {
        let Some(offset) = self.buffer.find(InfoFrame::HEADER) else {
            return;
        };
        if self.buffer.len() - offset < InfoFrame::SIZE {
            return; // header seen, frame still incomplete
        }

        self.buffer.drain(offset);
        let bytes = self.buffer.take(InfoFrame::SIZE);
        match InfoFrame::parse(&bytes) {
            Ok(info) => {
                debug!(serial = %info.serial_string(), "detector info received");
                actions.push(LinkAction::CancelTimeout);
                actions.push(LinkAction::Emit(LinkEvent::InfoReceived(Arc::new(info))));
                self.retries = 0;
                self.send_command(CMD_START_STREAMING, actions);
                self.state = LinkState::WaitingForStartResponse;
            }
            Err(e) => {
                // find() matched the header so this is effectively
                // unreachable; skip past the match and keep waiting.
                warn!(error = %e, "info frame failed to parse, resynchronizing");
            }
        }
    }

    /// Resynchronizing package loop: drains every complete package out of
    /// the buffer, recovering alignment via header search when byte-count
    /// sync is lost.
    fn process_packages(&mut self, actions: &mut Vec<LinkAction>) {
        loop {
            if self.scratch.is_empty() {
                match self.buffer.find(PackageFrame::HEADER) {
                    None => {
                        // A header may straddle this read and the next; keep
                        // just enough tail to find it later.
                        self.buffer.keep_tail(PackageFrame::HEADER.len() - 1);
                        break;
                    }
                    Some(offset) => {
                        if offset > 0 {
                            trace!(skipped = offset, "resynchronized to package header");
                            self.buffer.drain(offset);
                        }
                        // Accumulate only the header here; the partial branch
                        // below fills the rest so a header appearing mid-fill
                        // is still noticed.
                        self.scratch = self.buffer.take(PackageFrame::HEADER.len());
                    }
                }
            } else {
                let needed = PackageFrame::SIZE - self.scratch.len();
                if self.buffer.is_empty() {
                    break;
                }
                match self.buffer.find(PackageFrame::HEADER) {
                    Some(offset) if offset == needed => {
                        // The bytes before the next header exactly complete
                        // the in-flight package.
                        let rest = self.buffer.take(offset);
                        self.scratch.extend_from_slice(&rest);
                        self.finish_package(actions);
                    }
                    Some(offset) => {
                        warn!(
                            have = self.scratch.len(),
                            needed,
                            offset,
                            "package alignment lost, dropping partial package"
                        );
                        self.scratch.clear();
                        self.buffer.drain(offset);
                    }
                    None => {
                        let take = needed.min(self.buffer.len());
                        let chunk = self.buffer.take(take);
                        self.scratch.extend_from_slice(&chunk);
                        if self.scratch.len() == PackageFrame::SIZE {
                            self.finish_package(actions);
                        } else {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Validate and emit the completed scratch package, then reset the
    /// accumulator to search for the next header.
    fn finish_package(&mut self, actions: &mut Vec<LinkAction>) {
        match PackageFrame::parse(&self.scratch) {
            Ok(pkg) => {
                trace!(timestamp = pkg.timestamp, "package received");
                actions.push(LinkAction::Emit(LinkEvent::PackageReceived(Arc::new(pkg))));
            }
            Err(e) => {
                warn!(error = %e, "dropping invalid package");
            }
        }
        self.scratch.clear();
    }
}
