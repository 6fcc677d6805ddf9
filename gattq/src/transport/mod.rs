/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Transport capability seen by the scheduler.
//!
//! The platform binding supplies a [`TransportFactory`].  Dispatching a
//! `Connect` asks the factory for a per-device [`Transport`] handle; every
//! other operation is a method call on that handle.  All calls are
//! non-blocking: an accepted call returns `Ok(())` at once and later yields
//! exactly one [`TerminalEvent`] through the device's [`EventSink`], tagged
//! with the [`RequestId`] it was given.
//!
//! A call that cannot even be started (no such characteristic in the
//! discovered table, adapter switched off, …) returns a [`TransportError`]
//! and produces no event.

pub mod sim;

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::operation::{RequestId, TerminalEvent};
use crate::scheduler::Command;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Synchronous refusal of a transport call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The attribute is not present in the device's discovered table.
    #[error("attribute {0} not found on device")]
    AttributeNotFound(Uuid),

    /// The underlying link is not usable for this call.
    #[error("link unavailable: {0}")]
    LinkUnavailable(String),

    /// The platform refused the call for another reason.
    #[error("request refused: {0}")]
    Refused(String),
}

// ── Event sink ────────────────────────────────────────────────────────────────

/// Channel end a transport uses to report terminal events.
///
/// Events are posted into the scheduler's own command channel, so they are
/// processed by the same serial loop that owns the queue and the device
/// registry.  Cloning is cheap.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Command>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { tx }
    }

    /// Post `event` to the scheduler.  Returns `false` once the scheduler has
    /// shut down.
    pub fn deliver(&self, event: TerminalEvent) -> bool {
        self.tx.send(Command::Transport(event)).is_ok()
    }
}

// ── Capability traits ─────────────────────────────────────────────────────────

/// Opens per-device transport handles.
pub trait TransportFactory: Send + 'static {
    /// Start connecting to `address`.
    ///
    /// The returned handle is owned by the device's registry entry from this
    /// point on.  The outcome of the connection attempt arrives later as an
    /// `EventKind::Connect` event for `request`; link loss at any later time
    /// arrives as an unsolicited `EventKind::Disconnect` event.
    fn connect(
        &mut self,
        address: &str,
        request: RequestId,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Per-device handle.  Each method starts one call and returns immediately.
pub trait Transport: Send {
    fn disconnect(&mut self, request: RequestId) -> Result<(), TransportError>;

    fn discover_services(&mut self, request: RequestId) -> Result<(), TransportError>;

    fn read_characteristic(
        &mut self,
        request: RequestId,
        characteristic: Uuid,
    ) -> Result<(), TransportError>;

    fn write_characteristic(
        &mut self,
        request: RequestId,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError>;

    fn write_descriptor(
        &mut self,
        request: RequestId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError>;

    fn set_notification(
        &mut self,
        request: RequestId,
        characteristic: Uuid,
        enable: bool,
    ) -> Result<(), TransportError>;

    /// Release platform resources.  Called exactly once, when the device
    /// leaves the connected state (or its connection attempt fails).
    fn close(&mut self);
}
