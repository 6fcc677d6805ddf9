/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! In-process simulated transport.
//!
//! [`SimNetwork`] stands in for a radio: it accepts every transport call,
//! answers it according to a per-`(address, kind)` script and records what
//! happened.  It is what the demo binary and the scheduler tests run against.
//!
//! | Reply                | Effect of the call                                   |
//! |----------------------|------------------------------------------------------|
//! | [`Reply::Succeed`]   | `Ok(())`, later a success event                      |
//! | [`Reply::Fail`]      | `Ok(())`, later an event with the given status       |
//! | [`Reply::Ignore`]    | `Ok(())`, no event ever (drives timeouts)            |
//! | [`Reply::Reject`]    | `Err(TransportError::Refused)`, no event             |
//!
//! Scripted replies are consumed front to back; once a script runs dry the
//! per-key default applies, and without a default the call succeeds.
//!
//! With zero latency the event is posted to the scheduler's channel before
//! the call returns.  It is still processed only after the scheduler has
//! finished handling the current command.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use super::{EventSink, Transport, TransportError, TransportFactory};
use crate::operation::{EventKind, GattStatus, OperationKind, RequestId, TerminalEvent};

// ── Script and trace types ────────────────────────────────────────────────────

/// How the simulated device answers one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Succeed,
    Fail(GattStatus),
    Ignore,
    Reject,
}

/// One transport call as seen by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimCall {
    pub address: String,
    pub kind: OperationKind,
    pub request: RequestId,
    pub characteristic: Option<Uuid>,
    pub descriptor: Option<Uuid>,
    pub value: Option<Vec<u8>>,
}

impl SimCall {
    fn new(address: &str, kind: OperationKind, request: RequestId) -> Self {
        Self {
            address: address.to_string(),
            kind,
            request,
            characteristic: None,
            descriptor: None,
            value: None,
        }
    }
}

/// Chronological record of everything that crossed the simulated link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimTrace {
    Called(SimCall),
    /// A terminal event was handed to the scheduler.
    Resolved {
        address: String,
        kind: EventKind,
        request: Option<RequestId>,
        status: GattStatus,
    },
    /// A transport handle was closed.
    Closed { address: String },
}

// ── Shared state ──────────────────────────────────────────────────────────────

type Key = (String, OperationKind);

#[derive(Debug, Default)]
struct SimState {
    scripts: HashMap<Key, VecDeque<Reply>>,
    defaults: HashMap<Key, Reply>,
    latency: Duration,
    latencies: HashMap<Key, Duration>,
    values: HashMap<(String, Uuid), Vec<u8>>,
    sinks: HashMap<String, EventSink>,
    trace: Vec<SimTrace>,
}

impl SimState {
    fn next_reply(&mut self, key: &Key) -> Reply {
        if let Some(reply) = self.scripts.get_mut(key).and_then(VecDeque::pop_front) {
            return reply;
        }
        self.defaults.get(key).copied().unwrap_or(Reply::Succeed)
    }

    fn latency_for(&self, key: &Key) -> Duration {
        self.latencies.get(key).copied().unwrap_or(self.latency)
    }
}

// ── SimNetwork ────────────────────────────────────────────────────────────────

/// Scriptable simulated radio.  Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimNetwork {
    state: Arc<Mutex<SimState>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock leaves the state usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends `replies` to the script for `(address, kind)`.
    pub fn script(
        &self,
        address: &str,
        kind: OperationKind,
        replies: impl IntoIterator<Item = Reply>,
    ) -> &Self {
        self.lock()
            .scripts
            .entry((address.to_string(), kind))
            .or_default()
            .extend(replies);
        self
    }

    /// Reply used for `(address, kind)` once its script is exhausted.
    pub fn set_default(&self, address: &str, kind: OperationKind, reply: Reply) -> &Self {
        self.lock().defaults.insert((address.to_string(), kind), reply);
        self
    }

    /// Delay between a call and its event, for every call without an
    /// override.
    pub fn set_latency(&self, latency: Duration) -> &Self {
        self.lock().latency = latency;
        self
    }

    pub fn set_latency_for(&self, address: &str, kind: OperationKind, latency: Duration) -> &Self {
        self.lock().latencies.insert((address.to_string(), kind), latency);
        self
    }

    /// Value returned by successful reads of `characteristic`.
    pub fn set_value(
        &self,
        address: &str,
        characteristic: Uuid,
        value: impl Into<Vec<u8>>,
    ) -> &Self {
        self.lock()
            .values
            .insert((address.to_string(), characteristic), value.into());
        self
    }

    /// Current stored value (successful writes update it).
    pub fn value(&self, address: &str, characteristic: Uuid) -> Option<Vec<u8>> {
        self.lock()
            .values
            .get(&(address.to_string(), characteristic))
            .cloned()
    }

    /// Pushes an unsolicited characteristic-change notification.
    ///
    /// Returns `false` if `address` was never connected.
    pub fn notify(&self, address: &str, characteristic: Uuid, payload: impl Into<Vec<u8>>) -> bool {
        let event = TerminalEvent::changed(address, characteristic, payload.into());
        self.push_unsolicited(event)
    }

    /// Simulates link loss: an unsolicited failed disconnect event.
    ///
    /// Returns `false` if `address` was never connected.
    pub fn drop_link(&self, address: &str) -> bool {
        let event = TerminalEvent {
            address: address.to_string(),
            kind: EventKind::Disconnect,
            status: GattStatus::Failure,
            request: None,
            characteristic: None,
            descriptor: None,
            payload: None,
        };
        self.push_unsolicited(event)
    }

    fn push_unsolicited(&self, event: TerminalEvent) -> bool {
        let sink = self.lock().sinks.get(&event.address).cloned();
        match sink {
            Some(sink) => self.resolve(&sink, event),
            None => false,
        }
    }

    pub fn trace(&self) -> Vec<SimTrace> {
        self.lock().trace.clone()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<SimCall> {
        self.lock()
            .trace
            .iter()
            .filter_map(|t| match t {
                SimTrace::Called(call) => Some(call.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn calls_for(&self, address: &str) -> Vec<SimCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.address == address)
            .collect()
    }

    /// Number of calls of `kind` against `address`.
    pub fn count(&self, address: &str, kind: OperationKind) -> usize {
        self.calls_for(address)
            .iter()
            .filter(|c| c.kind == kind)
            .count()
    }

    // ── Call handling ─────────────────────────────────────────────────────────

    fn handle(&self, call: SimCall) -> Result<(), TransportError> {
        let mut state = self.lock();
        let key = (call.address.clone(), call.kind);
        let reply = state.next_reply(&key);
        debug!(
            address = %call.address,
            kind = %call.kind,
            request = %call.request,
            ?reply,
            "sim call"
        );
        state.trace.push(SimTrace::Called(call.clone()));

        let status = match reply {
            Reply::Succeed => GattStatus::Success,
            Reply::Fail(status) => status,
            Reply::Ignore => return Ok(()),
            Reply::Reject => {
                return Err(TransportError::Refused(format!(
                    "simulated rejection of {}",
                    call.kind
                )))
            }
        };

        let sink = state
            .sinks
            .get(&call.address)
            .cloned()
            .ok_or_else(|| TransportError::LinkUnavailable(call.address.clone()))?;

        let mut event =
            TerminalEvent::completion(&call.address, call.kind.into(), status, call.request)
                .with_characteristic(call.characteristic)
                .with_descriptor(call.descriptor);

        if status.is_success() {
            if let Some(c) = call.characteristic {
                let slot = (call.address.clone(), c);
                match call.kind {
                    OperationKind::Read => {
                        let value = state.values.get(&slot).cloned().unwrap_or_default();
                        event = event.with_payload(value);
                    }
                    OperationKind::Write => {
                        if let Some(value) = &call.value {
                            state.values.insert(slot, value.clone());
                        }
                    }
                    _ => {}
                }
            }
        }

        let latency = state.latency_for(&key);
        drop(state);

        if latency.is_zero() {
            self.resolve(&sink, event);
        } else {
            let net = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                net.resolve(&sink, event);
            });
        }
        Ok(())
    }

    fn resolve(&self, sink: &EventSink, event: TerminalEvent) -> bool {
        self.lock().trace.push(SimTrace::Resolved {
            address: event.address.clone(),
            kind: event.kind,
            request: event.request,
            status: event.status,
        });
        sink.deliver(event)
    }
}

impl TransportFactory for SimNetwork {
    fn connect(
        &mut self,
        address: &str,
        request: RequestId,
        sink: EventSink,
    ) -> Result<Box<dyn Transport>, TransportError> {
        self.lock().sinks.insert(address.to_string(), sink);
        self.handle(SimCall::new(address, OperationKind::Connect, request))?;
        Ok(Box::new(SimLink {
            address: address.to_string(),
            net: self.clone(),
        }))
    }
}

// ── SimLink ───────────────────────────────────────────────────────────────────

/// Per-device handle handed out by [`SimNetwork`].
#[derive(Debug)]
struct SimLink {
    address: String,
    net: SimNetwork,
}

impl SimLink {
    fn call(&self, kind: OperationKind, request: RequestId) -> SimCall {
        SimCall::new(&self.address, kind, request)
    }
}

impl Transport for SimLink {
    fn disconnect(&mut self, request: RequestId) -> Result<(), TransportError> {
        self.net.handle(self.call(OperationKind::Disconnect, request))
    }

    fn discover_services(&mut self, request: RequestId) -> Result<(), TransportError> {
        self.net.handle(self.call(OperationKind::Discover, request))
    }

    fn read_characteristic(
        &mut self,
        request: RequestId,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        let mut call = self.call(OperationKind::Read, request);
        call.characteristic = Some(characteristic);
        self.net.handle(call)
    }

    fn write_characteristic(
        &mut self,
        request: RequestId,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let mut call = self.call(OperationKind::Write, request);
        call.characteristic = Some(characteristic);
        call.value = Some(value.to_vec());
        self.net.handle(call)
    }

    fn write_descriptor(
        &mut self,
        request: RequestId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let mut call = self.call(OperationKind::WriteDescriptor, request);
        call.characteristic = Some(characteristic);
        call.descriptor = Some(descriptor);
        call.value = Some(value.to_vec());
        self.net.handle(call)
    }

    fn set_notification(
        &mut self,
        request: RequestId,
        characteristic: Uuid,
        enable: bool,
    ) -> Result<(), TransportError> {
        let mut call = self.call(OperationKind::SetNotification, request);
        call.characteristic = Some(characteristic);
        call.value = Some(vec![u8::from(enable)]);
        self.net.handle(call)
    }

    fn close(&mut self) {
        debug!(address = %self.address, "sim link closed");
        self.net.lock().trace.push(SimTrace::Closed {
            address: self.address.clone(),
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
