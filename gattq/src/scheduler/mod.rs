/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Single-flight operation scheduler.
//!
//! [`Scheduler`] owns the [`OperationQueue`], the [`DeviceRegistry`] and the
//! in-flight slot, and runs as one tokio task.  Everything that can change
//! that state arrives as a [`Command`] on one unbounded channel:
//!
//! ```text
//!  SchedulerHandle ──Enqueue/Configure/RegisterDevice──┐
//!  EventSink (transport) ──────────Transport(event)────┤
//!  delay / timeout timers ──DispatchDue / TimedOut─────┼──► Scheduler::run
//!                                                      │        │
//!                                   broadcast ◄────────┘        ├─► Transport calls
//!                          (SchedulerEvent to observers)        └─► watch (link snapshot)
//! ```
//!
//! # Decision table
//!
//! What happens to a dequeued operation depends on its device's link state:
//!
//! | Link state | Dispatched | Already satisfied | Needs first |
//! |---|---|---|---|
//! | Disconnected | `Connect` | `Disconnect` | `Connect` |
//! | Connected | `Discover`, `Disconnect` | `Connect` | `Discover` |
//! | Discovered | I/O, `Disconnect` | `Connect`, `Discover` | – |
//!
//! With fault correction on, a missing prerequisite is injected at the head
//! of the queue with the deferred operation right behind it.  With it off,
//! the operation fails with [`OperationError::NotReady`].  An injected
//! prerequisite that is refused or times out takes the device's dependent
//! operations down with it ([`OperationError::PrerequisiteFailed`]).
//!
//! # Attempt limit
//! While `attempt_limit != 0` every dequeue of an operation for a device
//! counts as one attempt; any success resets the count.  Reaching the limit
//! purges the device's queued operations and forces a `Disconnect`.

pub mod correlator;
pub mod error;
pub mod queue;

pub use error::OperationError;
pub use queue::OperationQueue;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SchedulerPolicy;
use crate::device::{DeviceRegistry, DeviceState, LinkState};
use crate::events::{OperationRecord, SchedulerEvent, EVENT_CHANNEL_CAPACITY};
use crate::operation::{
    Action, Operation, OperationKind, RequestId, TerminalEvent, CCCD_UUID,
    DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};
use crate::template::{AttributeValue, TemplateRegistry};
use crate::transport::{EventSink, Transport, TransportError, TransportFactory};

// ── Commands ──────────────────────────────────────────────────────────────────

/// Messages processed by the scheduler task, in arrival order.
#[derive(Debug)]
pub(crate) enum Command {
    Enqueue {
        op: Operation,
        reply: oneshot::Sender<bool>,
    },
    Configure(SchedulerPolicy),
    RegisterDevice {
        address: String,
        name: Option<String>,
    },
    /// Terminal event posted by a transport through its [`EventSink`].
    Transport(TerminalEvent),
    /// The pre-dispatch delay of `RequestId` has elapsed.
    DispatchDue(RequestId),
    /// The completion timeout of `RequestId` has elapsed.
    TimedOut(RequestId),
    /// Typed write, encoded through the device's template before queuing.
    WriteValue {
        address: String,
        characteristic: Uuid,
        value: AttributeValue,
        timeout_ms: u64,
        reply: oneshot::Sender<Result<bool, OperationError>>,
    },
    Pending {
        reply: oneshot::Sender<Vec<Operation>>,
    },
    Shutdown,
}

/// State readable without a round trip to the scheduler task.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    links: HashMap<String, LinkState>,
    active: bool,
}

// ── Decision table ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Dispatch,
    Satisfied,
    Requires(OperationKind),
}

fn plan(state: LinkState, kind: OperationKind) -> Plan {
    use OperationKind::{Connect, Disconnect, Discover};

    match (state, kind) {
        (LinkState::Disconnected, Connect) => Plan::Dispatch,
        (LinkState::Disconnected, Disconnect) => Plan::Satisfied,
        (LinkState::Disconnected, _) => Plan::Requires(Connect),
        (LinkState::Connected, Connect) => Plan::Satisfied,
        (LinkState::Connected, Discover | Disconnect) => Plan::Dispatch,
        (LinkState::Connected, _) => Plan::Requires(Discover),
        (LinkState::Discovered, Connect | Discover) => Plan::Satisfied,
        (LinkState::Discovered, _) => Plan::Dispatch,
    }
}

// ── In-flight slot ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting out `delay_ms`; no transport call made yet.
    Delayed,
    /// Transport call made; waiting for the terminal event.
    Dispatched,
}

/// Pending delayed message.  Dropping it cancels the message.
#[derive(Debug)]
struct Timer(JoinHandle<()>);

impl Drop for Timer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug)]
struct InFlight {
    op: Operation,
    request: RequestId,
    phase: Phase,
    /// Injected by fault correction ahead of other operations.
    prerequisite: bool,
    _timer: Option<Timer>,
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// The scheduling engine.  Build with [`Scheduler::new`], drive with
/// [`Scheduler::run`] (or use [`spawn`]).
pub struct Scheduler {
    policy: SchedulerPolicy,
    queue: OperationQueue,
    devices: DeviceRegistry,
    templates: TemplateRegistry,
    factory: Box<dyn TransportFactory>,
    in_flight: Option<InFlight>,
    /// `(address, kind)` of queued prerequisites injected by fault correction.
    injected: HashSet<(String, OperationKind)>,
    next_request: u64,
    active: bool,
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<SchedulerEvent>,
    snapshot: watch::Sender<Snapshot>,
}

/// Builds a scheduler and runs it on a new tokio task.
pub fn spawn(
    factory: impl TransportFactory,
    policy: SchedulerPolicy,
    templates: TemplateRegistry,
) -> (SchedulerHandle, JoinHandle<()>) {
    let (scheduler, handle) = Scheduler::new(factory, policy, templates);
    (handle, tokio::spawn(scheduler.run()))
}

impl Scheduler {
    pub fn new(
        factory: impl TransportFactory,
        policy: SchedulerPolicy,
        templates: TemplateRegistry,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot, snapshot_rx) = watch::channel(Snapshot::default());

        let handle = SchedulerHandle {
            tx: tx.clone(),
            events: events.clone(),
            snapshot: snapshot_rx,
        };
        let scheduler = Self {
            policy,
            queue: OperationQueue::new(),
            devices: DeviceRegistry::new(),
            templates,
            factory: Box::new(factory),
            in_flight: None,
            injected: HashSet::new(),
            next_request: 0,
            active: false,
            tx,
            rx,
            events,
            snapshot,
        };
        (scheduler, handle)
    }

    /// Processes commands until [`SchedulerHandle::shutdown`] is called.
    pub async fn run(mut self) {
        info!(
            attempt_limit = self.policy.attempt_limit,
            fault_correction = self.policy.fault_correction,
            auto_reconnect = self.policy.auto_reconnect,
            "scheduler started"
        );

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Enqueue { op, reply } => {
                    let accepted = self.enqueue(op);
                    let _ = reply.send(accepted);
                }
                Command::Configure(policy) => {
                    info!(?policy, "policy updated");
                    self.policy = policy;
                }
                Command::RegisterDevice { address, name } => {
                    debug!(address = %address, name = ?name, "device registered");
                    self.devices.register(&address, name);
                    self.publish_link(&address);
                }
                Command::Transport(event) => self.on_event(event),
                Command::DispatchDue(request) => self.on_dispatch_due(request),
                Command::TimedOut(request) => self.on_timeout(request),
                Command::WriteValue {
                    address,
                    characteristic,
                    value,
                    timeout_ms,
                    reply,
                } => {
                    let result = self.write_value(address, characteristic, value, timeout_ms);
                    let _ = reply.send(result);
                }
                Command::Pending { reply } => {
                    let _ = reply.send(self.queue.iter().cloned().collect());
                }
                Command::Shutdown => break,
            }
        }

        self.in_flight = None;
        self.devices.release_all();
        self.snapshot.send_modify(|s| {
            s.links.values_mut().for_each(|link| *link = LinkState::Disconnected);
        });
        self.set_active(false);
        info!(dropped = self.queue.len(), "scheduler stopped");
    }

    // ── Queue entry ───────────────────────────────────────────────────────────

    /// Queues `op` at the back and starts processing if idle.
    fn enqueue(&mut self, op: Operation) -> bool {
        debug!(op = %op, queued = self.queue.len(), "enqueue");
        let accepted = self.queue.enqueue(op);
        if accepted && !self.active {
            self.set_active(true);
            self.advance();
        }
        accepted
    }

    fn write_value(
        &mut self,
        address: String,
        characteristic: Uuid,
        value: AttributeValue,
        timeout_ms: u64,
    ) -> Result<bool, OperationError> {
        let name = self.device_name(&address);
        let bytes = self
            .templates
            .encode(name, characteristic, &value)
            .ok_or_else(|| OperationError::Unencodable {
                characteristic,
                value,
            })?;
        let op = Operation::write(address, characteristic, bytes).with_timeout_ms(timeout_ms);
        Ok(self.enqueue(op))
    }

    /// Pops and processes operations until one occupies the in-flight slot or
    /// the queue runs dry.
    fn advance(&mut self) {
        while self.in_flight.is_none() {
            let Some(op) = self.queue.pop() else {
                self.set_active(false);
                return;
            };
            self.process(op);
        }
    }

    fn process(&mut self, op: Operation) {
        let prerequisite = self.injected.remove(&(op.address.clone(), op.kind()));
        let limit = self.policy.attempt_limit;
        let device = self.devices.get(&op.address);
        if limit != 0 {
            if device.attempts >= limit {
                device.attempts = 0;
                self.escalate(op, limit);
                return;
            }
            device.attempts += 1;
        }
        let state = device.link_state();
        debug!(op = %op, state = %state, attempts = device.attempts, "processing");

        match plan(state, op.kind()) {
            Plan::Dispatch => self.start(op, prerequisite),
            Plan::Satisfied => self.satisfy(op),
            Plan::Requires(prerequisite) => self.require(op, prerequisite, state),
        }
    }

    fn escalate(&mut self, op: Operation, limit: u32) {
        let purged = self.queue.remove_all_for(&op.address, |_| true);
        self.injected.retain(|(address, _)| *address != op.address);
        warn!(
            address = %op.address,
            limit,
            purged,
            "attempt limit reached, forcing disconnect"
        );
        let disconnect = Operation::disconnect(op.address.clone()).with_timeout_ms(op.timeout_ms);
        self.queue.enqueue_front(disconnect);
        let record = self.record_for(&op, Err(OperationError::AttemptLimitReached { limit }));
        self.publish(record);
    }

    fn satisfy(&mut self, op: Operation) {
        debug!(op = %op, "already satisfied");
        self.devices.get(&op.address).attempts = 0;
        let record = self.record_for(&op, Ok(()));
        self.publish(record);
    }

    fn require(&mut self, op: Operation, prerequisite: OperationKind, state: LinkState) {
        if !self.policy.fault_correction {
            let error = OperationError::NotReady {
                address: op.address.clone(),
                state,
            };
            let record = self.record_for(&op, Err(error));
            self.publish(record);
            return;
        }

        let address = op.address.clone();
        let first = match prerequisite {
            OperationKind::Connect => Operation::connect(address.clone()),
            _ => Operation::discover(address.clone()),
        }
        .with_timeout_ms(op.timeout_ms);

        if !self.queue.enqueue_front(op) {
            debug!(address = %address, "deferred operation already queued");
        }
        if self.queue.enqueue_front(first) {
            info!(address = %address, prerequisite = %prerequisite, "injected prerequisite");
        } else {
            self.queue.promote(&address, prerequisite);
            debug!(
                address = %address,
                prerequisite = %prerequisite,
                "promoted queued prerequisite"
            );
        }
        self.injected.insert((address, prerequisite));
    }

    /// An injected prerequisite was refused or timed out.  Everything queued
    /// for `address` that still needs a prerequisite is failed instead of
    /// injecting it again.
    fn drop_dependents(&mut self, address: &str, prerequisite: OperationKind) {
        let state = self.devices.get(address).link_state();
        let dependents = self
            .queue
            .take_all_for(address, |op| matches!(plan(state, op.kind()), Plan::Requires(_)));
        if dependents.is_empty() {
            return;
        }
        warn!(
            address = %address,
            prerequisite = %prerequisite,
            dropped = dependents.len(),
            "prerequisite failed, dropping dependent operations"
        );
        for op in dependents {
            let record =
                self.record_for(&op, Err(OperationError::PrerequisiteFailed { prerequisite }));
            self.publish(record);
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    fn next_request_id(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }

    /// Posts `command` to this scheduler after `after`.
    fn schedule(&self, after: Duration, command: Command) -> Timer {
        let tx = self.tx.clone();
        Timer(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(command);
        }))
    }

    fn start(&mut self, op: Operation, prerequisite: bool) {
        let request = self.next_request_id();
        match op.delay() {
            Some(delay) => {
                debug!(op = %op, request = %request, delay_ms = op.delay_ms, "dispatch delayed");
                let timer = self.schedule(delay, Command::DispatchDue(request));
                self.in_flight = Some(InFlight {
                    op,
                    request,
                    phase: Phase::Delayed,
                    prerequisite,
                    _timer: Some(timer),
                });
            }
            None => self.dispatch(op, request, prerequisite),
        }
    }

    /// Makes the transport call.  On refusal the slot stays empty.
    fn dispatch(&mut self, op: Operation, request: RequestId, prerequisite: bool) {
        debug!(op = %op, request = %request, "dispatching");
        match self.call_transport(&op, request) {
            Ok(()) => {
                let timer = op
                    .timeout()
                    .map(|timeout| self.schedule(timeout, Command::TimedOut(request)));
                self.in_flight = Some(InFlight {
                    op,
                    request,
                    phase: Phase::Dispatched,
                    prerequisite,
                    _timer: timer,
                });
            }
            Err(err) => {
                warn!(op = %op, request = %request, error = %err, "transport refused call");
                let record = self.record_for(&op, Err(OperationError::Rejected(err.to_string())));
                self.publish(record);
                if prerequisite {
                    self.drop_dependents(&op.address, op.kind());
                }
            }
        }
    }

    fn call_transport(
        &mut self,
        op: &Operation,
        request: RequestId,
    ) -> Result<(), TransportError> {
        if op.kind() == OperationKind::Connect {
            let sink = EventSink::new(self.tx.clone());
            let transport = self.factory.connect(&op.address, request, sink)?;
            self.devices.get(&op.address).attach_transport(transport);
            return Ok(());
        }
        let transport = self
            .devices
            .get(&op.address)
            .transport_mut()
            .ok_or_else(|| {
                TransportError::LinkUnavailable(format!("no transport handle for {}", op.address))
            })?;
        invoke(transport, &op.action, request)
    }

    fn on_dispatch_due(&mut self, request: RequestId) {
        let due = matches!(
            &self.in_flight,
            Some(f) if f.request == request && f.phase == Phase::Delayed
        );
        if !due {
            debug!(request = %request, "stale dispatch timer ignored");
            return;
        }
        if let Some(InFlight {
            op, prerequisite, ..
        }) = self.in_flight.take()
        {
            self.dispatch(op, request, prerequisite);
        }
        if self.in_flight.is_none() {
            self.advance();
        }
    }

    fn on_timeout(&mut self, request: RequestId) {
        let expired = matches!(
            &self.in_flight,
            Some(f) if f.request == request && f.phase == Phase::Dispatched
        );
        if !expired {
            debug!(request = %request, "stale timeout ignored");
            return;
        }
        let Some(InFlight {
            op, prerequisite, ..
        }) = self.in_flight.take()
        else {
            return;
        };
        warn!(op = %op, request = %request, timeout_ms = op.timeout_ms, "operation timed out");
        let record = self.record_for(
            &op,
            Err(OperationError::Timeout {
                timeout_ms: op.timeout_ms,
            }),
        );
        self.publish(record);
        if prerequisite {
            self.drop_dependents(&op.address, op.kind());
        }
        self.advance();
    }

    // ── Publishing ────────────────────────────────────────────────────────────

    /// Record for an outcome the scheduler decided on `op` itself.
    fn record_for(&self, op: &Operation, result: Result<(), OperationError>) -> OperationRecord {
        let name = self.device_name(&op.address);
        let characteristic = op.action.characteristic();
        OperationRecord {
            address: op.address.clone(),
            kind: op.kind().into(),
            result,
            characteristic: characteristic.map(|c| self.templates.resolve_characteristic(name, c)),
            descriptor: op
                .action
                .descriptor()
                .map(|d| self.templates.resolve_descriptor(name, characteristic, d)),
            payload: match &op.action {
                Action::Write { value, .. } | Action::WriteDescriptor { value, .. } => {
                    Some(value.clone())
                }
                _ => None,
            },
            value: None,
            matched: true,
        }
    }

    fn device_name(&self, address: &str) -> Option<&str> {
        self.devices.find(address).and_then(|d| d.name.as_deref())
    }

    fn publish(&self, record: OperationRecord) {
        debug!(
            address = %record.address,
            kind = %record.kind,
            matched = record.matched,
            "publish {}",
            record
        );
        // No subscribers is not an error.
        let _ = self.events.send(SchedulerEvent::Operation(record));
    }

    fn set_active(&mut self, active: bool) {
        if self.active == active {
            return;
        }
        self.active = active;
        debug!(active, "queue activity changed");
        self.snapshot.send_modify(|s| s.active = active);
        let _ = self.events.send(SchedulerEvent::QueueActiveChanged(active));
    }

    fn publish_link(&self, address: &str) {
        let state = self
            .devices
            .find(address)
            .map(DeviceState::link_state)
            .unwrap_or_default();
        self.snapshot.send_modify(|s| {
            s.links.insert(address.to_string(), state);
        });
    }
}

fn invoke(
    transport: &mut dyn Transport,
    action: &Action,
    request: RequestId,
) -> Result<(), TransportError> {
    match action {
        Action::Connect => Err(TransportError::Refused(
            "connections are opened through the transport factory".into(),
        )),
        Action::Disconnect => transport.disconnect(request),
        Action::Discover => transport.discover_services(request),
        Action::Read { characteristic } => transport.read_characteristic(request, *characteristic),
        Action::Write {
            characteristic,
            value,
        } => transport.write_characteristic(request, *characteristic, value),
        Action::WriteDescriptor {
            characteristic,
            descriptor,
            value,
        } => transport.write_descriptor(request, *characteristic, *descriptor, value),
        Action::SetNotification {
            characteristic,
            enable,
        } => transport.set_notification(request, *characteristic, *enable),
    }
}

// ── SchedulerHandle ───────────────────────────────────────────────────────────

/// Cloneable front door to a running [`Scheduler`].
///
/// Link-state queries read a snapshot the scheduler keeps current, so they
/// never block.  After the scheduler has stopped, `enqueue` returns `false`
/// and the other commands are silently dropped.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SchedulerEvent>,
    snapshot: watch::Receiver<Snapshot>,
}

impl SchedulerHandle {
    fn request_enqueue(&self, op: Operation) -> oneshot::Receiver<bool> {
        let (reply, rx) = oneshot::channel();
        // On a closed channel the reply sender is dropped and `rx` resolves
        // to an error.
        let _ = self.tx.send(Command::Enqueue { op, reply });
        rx
    }

    /// Queues `op`.  Returns `false` if it duplicates a queued lifecycle
    /// operation for the same device.
    pub async fn enqueue(&self, op: Operation) -> bool {
        self.request_enqueue(op).await.unwrap_or(false)
    }

    /// Enables or disables notifications on `characteristic`: a CCCD write
    /// followed by the matching `SetNotification`.
    ///
    /// Returns `true` only if both operations were accepted.
    pub async fn subscribe_notifications(
        &self,
        address: &str,
        characteristic: Uuid,
        enable: bool,
        timeout_ms: u64,
    ) -> bool {
        let value = if enable {
            ENABLE_NOTIFICATION_VALUE
        } else {
            DISABLE_NOTIFICATION_VALUE
        };
        let cccd = Operation::write_descriptor(address, characteristic, CCCD_UUID, value)
            .with_timeout_ms(timeout_ms);
        let toggle = Operation::set_notification(address, characteristic, enable)
            .with_timeout_ms(timeout_ms);

        let first = self.request_enqueue(cccd);
        let second = self.request_enqueue(toggle);
        let first = first.await.unwrap_or(false);
        let second = second.await.unwrap_or(false);
        first && second
    }

    /// Queues a write of a typed `value`, encoded with the format the device's
    /// template declares for `characteristic`.
    ///
    /// Returns `Ok(false)` once the scheduler has stopped.
    ///
    /// # Errors
    /// [`OperationError::Unencodable`] if the value does not fit the format,
    /// or the characteristic has no template and `value` is not raw bytes.
    pub async fn write_value(
        &self,
        address: impl Into<String>,
        characteristic: Uuid,
        value: AttributeValue,
        timeout_ms: u64,
    ) -> Result<bool, OperationError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::WriteValue {
            address: address.into(),
            characteristic,
            value,
            timeout_ms,
            reply,
        });
        rx.await.unwrap_or(Ok(false))
    }

    /// Replaces the policy.  Applies to every operation dequeued afterwards.
    pub fn configure(&self, policy: SchedulerPolicy) {
        let _ = self.tx.send(Command::Configure(policy));
    }

    /// Records `name` for `address`, used for template lookups.
    pub fn register_device(&self, address: impl Into<String>, name: Option<String>) {
        let _ = self.tx.send(Command::RegisterDevice {
            address: address.into(),
            name,
        });
    }

    pub fn link_state(&self, address: &str) -> LinkState {
        self.snapshot
            .borrow()
            .links
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    /// `false` for addresses the scheduler has never seen.
    pub fn is_connected(&self, address: &str) -> bool {
        self.link_state(address).is_connected()
    }

    /// `false` for addresses the scheduler has never seen.
    pub fn is_discovered(&self, address: &str) -> bool {
        self.link_state(address).is_discovered()
    }

    /// Whether an operation is queued or in flight.
    pub fn is_active(&self) -> bool {
        self.snapshot.borrow().active
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Copy of the queued (not in-flight) operations, head first.
    pub async fn pending(&self) -> Vec<Operation> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Pending { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Resolves once the queue is empty and nothing is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.snapshot.clone();
        // An error means the scheduler is gone, which is idle too.
        let _ = rx.wait_for(|s| !s.active).await;
    }

    /// Stops the scheduler task.  Queued operations are dropped, every open
    /// transport handle is closed and every device reads as disconnected.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
