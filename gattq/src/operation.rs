/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Operation and terminal-event value types.
//!
//! Two distinct types model the two directions of the pipeline:
//!
//! ```text
//! caller ──(Operation)──► scheduler ──(transport call)──► device
//!                              ▲
//!                              └──(TerminalEvent)──── transport adapter
//! ```
//!
//! An [`Operation`] is immutable once built.  Retries re-enqueue a clone of
//! the very same value, so the payload of a retried write is byte-identical
//! to the first attempt.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

// ── Well-known attribute identities ───────────────────────────────────────────

/// Client Characteristic Configuration descriptor (`0x2902`).
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// CCCD value that enables notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value that disables notifications and indications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

// ── Request id ────────────────────────────────────────────────────────────────

/// Monotonically increasing tag attached to every dispatched transport call.
///
/// Terminal events echo it back so that a late event (one that arrives after
/// its operation timed out) can never be mistaken for the completion of the
/// operation that replaced it in the in-flight slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Operation kind ────────────────────────────────────────────────────────────

/// Payload-free discriminant of [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Connect,
    Disconnect,
    Discover,
    Read,
    Write,
    WriteDescriptor,
    SetNotification,
}

impl OperationKind {
    /// `Connect`, `Discover` and `Disconnect` manage the link itself; at most
    /// one of each may be queued per device.
    pub fn is_lifecycle(self) -> bool {
        matches!(
            self,
            OperationKind::Connect | OperationKind::Discover | OperationKind::Disconnect
        )
    }

    /// Whether a failed terminal event for this kind is retried.
    ///
    /// Reads and notification toggles are reported as terminal failures; a
    /// failed disconnect has already dropped the link.
    pub fn retries_on_failure(self) -> bool {
        matches!(
            self,
            OperationKind::Connect
                | OperationKind::Discover
                | OperationKind::Write
                | OperationKind::WriteDescriptor
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Connect => "connect",
            OperationKind::Disconnect => "disconnect",
            OperationKind::Discover => "discover",
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::WriteDescriptor => "write_descriptor",
            OperationKind::SetNotification => "set_notification",
        };
        f.write_str(s)
    }
}

// ── Action ────────────────────────────────────────────────────────────────────

/// What an [`Operation`] asks the transport to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Connect,
    Disconnect,
    Discover,
    Read {
        characteristic: Uuid,
    },
    Write {
        characteristic: Uuid,
        value: Vec<u8>,
    },
    WriteDescriptor {
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    },
    SetNotification {
        characteristic: Uuid,
        enable: bool,
    },
}

impl Action {
    pub fn kind(&self) -> OperationKind {
        match self {
            Action::Connect => OperationKind::Connect,
            Action::Disconnect => OperationKind::Disconnect,
            Action::Discover => OperationKind::Discover,
            Action::Read { .. } => OperationKind::Read,
            Action::Write { .. } => OperationKind::Write,
            Action::WriteDescriptor { .. } => OperationKind::WriteDescriptor,
            Action::SetNotification { .. } => OperationKind::SetNotification,
        }
    }

    /// Characteristic this action targets, if any.
    pub fn characteristic(&self) -> Option<Uuid> {
        match self {
            Action::Read { characteristic }
            | Action::Write { characteristic, .. }
            | Action::WriteDescriptor { characteristic, .. }
            | Action::SetNotification { characteristic, .. } => Some(*characteristic),
            Action::Connect | Action::Disconnect | Action::Discover => None,
        }
    }

    /// Descriptor this action targets, if any.
    pub fn descriptor(&self) -> Option<Uuid> {
        match self {
            Action::WriteDescriptor { descriptor, .. } => Some(*descriptor),
            _ => None,
        }
    }
}

// ── Operation ─────────────────────────────────────────────────────────────────

/// One request against one device.
///
/// # Timing fields
/// * `delay_ms` – wait before the transport call is made (0 = immediately).
/// * `timeout_ms` – how long to wait for the terminal event once the call has
///   been made (0 = wait forever).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Stable device identity (e.g. `"C4:7C:8D:6A:1F:02"`).
    pub address: String,
    pub action: Action,
    pub delay_ms: u64,
    pub timeout_ms: u64,
}

impl Operation {
    pub fn new(address: impl Into<String>, action: Action) -> Self {
        Self {
            address: address.into(),
            action,
            delay_ms: 0,
            timeout_ms: 0,
        }
    }

    pub fn connect(address: impl Into<String>) -> Self {
        Self::new(address, Action::Connect)
    }

    pub fn disconnect(address: impl Into<String>) -> Self {
        Self::new(address, Action::Disconnect)
    }

    pub fn discover(address: impl Into<String>) -> Self {
        Self::new(address, Action::Discover)
    }

    pub fn read(address: impl Into<String>, characteristic: Uuid) -> Self {
        Self::new(address, Action::Read { characteristic })
    }

    pub fn write(
        address: impl Into<String>,
        characteristic: Uuid,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(
            address,
            Action::Write {
                characteristic,
                value: value.into(),
            },
        )
    }

    pub fn write_descriptor(
        address: impl Into<String>,
        characteristic: Uuid,
        descriptor: Uuid,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(
            address,
            Action::WriteDescriptor {
                characteristic,
                descriptor,
                value: value.into(),
            },
        )
    }

    pub fn set_notification(
        address: impl Into<String>,
        characteristic: Uuid,
        enable: bool,
    ) -> Self {
        Self::new(
            address,
            Action::SetNotification {
                characteristic,
                enable,
            },
        )
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.action.kind()
    }

    /// Pre-dispatch delay, or `None` when the call should be made at once.
    pub fn delay(&self) -> Option<Duration> {
        (self.delay_ms != 0).then(|| Duration::from_millis(self.delay_ms))
    }

    /// Completion timeout, or `None` when the operation may wait forever.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms != 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}", self.kind(), self.address)?;
        if let Some(c) = self.action.characteristic() {
            write!(f, ", {}", c)?;
        }
        if let Some(d) = self.action.descriptor() {
            write!(f, ", {}", d)?;
        }
        f.write_str(")")
    }
}

// ── GATT status ───────────────────────────────────────────────────────────────

/// Status carried by a [`TerminalEvent`].
///
/// The named variants are the attribute-protocol codes a central commonly
/// sees; anything else is preserved verbatim in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GattStatus {
    Success,
    ReadNotPermitted,
    WriteNotPermitted,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidAttributeLength,
    InsufficientEncryption,
    ConnectionCongested,
    Failure,
    Other(u16),
}

impl GattStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => GattStatus::Success,
            0x0002 => GattStatus::ReadNotPermitted,
            0x0003 => GattStatus::WriteNotPermitted,
            0x0005 => GattStatus::InsufficientAuthentication,
            0x0006 => GattStatus::RequestNotSupported,
            0x000d => GattStatus::InvalidAttributeLength,
            0x000f => GattStatus::InsufficientEncryption,
            0x008f => GattStatus::ConnectionCongested,
            0x0101 => GattStatus::Failure,
            other => GattStatus::Other(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            GattStatus::Success => 0x0000,
            GattStatus::ReadNotPermitted => 0x0002,
            GattStatus::WriteNotPermitted => 0x0003,
            GattStatus::InsufficientAuthentication => 0x0005,
            GattStatus::RequestNotSupported => 0x0006,
            GattStatus::InvalidAttributeLength => 0x000d,
            GattStatus::InsufficientEncryption => 0x000f,
            GattStatus::ConnectionCongested => 0x008f,
            GattStatus::Failure => 0x0101,
            GattStatus::Other(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == GattStatus::Success
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GattStatus::Success => f.write_str("SUCCESS"),
            GattStatus::ReadNotPermitted => f.write_str("READ_NOT_PERMITTED"),
            GattStatus::WriteNotPermitted => f.write_str("WRITE_NOT_PERMITTED"),
            GattStatus::InsufficientAuthentication => f.write_str("INSUFFICIENT_AUTHENTICATION"),
            GattStatus::RequestNotSupported => f.write_str("REQUEST_NOT_SUPPORTED"),
            GattStatus::InvalidAttributeLength => f.write_str("INVALID_ATTRIBUTE_LENGTH"),
            GattStatus::InsufficientEncryption => f.write_str("INSUFFICIENT_ENCRYPTION"),
            GattStatus::ConnectionCongested => f.write_str("CONNECTION_CONGESTED"),
            GattStatus::Failure => f.write_str("FAILURE"),
            GattStatus::Other(code) => write!(f, "unknown GATT status 0x{:04x}", code),
        }
    }
}

// ── Terminal event ────────────────────────────────────────────────────────────

/// Kind of a [`TerminalEvent`]: one per operation kind, plus `Changed` for
/// unsolicited characteristic-change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Discover,
    Read,
    Write,
    WriteDescriptor,
    SetNotification,
    Changed,
}

impl EventKind {
    /// The operation kind this event completes, or `None` for `Changed`.
    pub fn operation_kind(self) -> Option<OperationKind> {
        match self {
            EventKind::Connect => Some(OperationKind::Connect),
            EventKind::Disconnect => Some(OperationKind::Disconnect),
            EventKind::Discover => Some(OperationKind::Discover),
            EventKind::Read => Some(OperationKind::Read),
            EventKind::Write => Some(OperationKind::Write),
            EventKind::WriteDescriptor => Some(OperationKind::WriteDescriptor),
            EventKind::SetNotification => Some(OperationKind::SetNotification),
            EventKind::Changed => None,
        }
    }
}

impl From<OperationKind> for EventKind {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Connect => EventKind::Connect,
            OperationKind::Disconnect => EventKind::Disconnect,
            OperationKind::Discover => EventKind::Discover,
            OperationKind::Read => EventKind::Read,
            OperationKind::Write => EventKind::Write,
            OperationKind::WriteDescriptor => EventKind::WriteDescriptor,
            OperationKind::SetNotification => EventKind::SetNotification,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation_kind() {
            Some(kind) => kind.fmt(f),
            None => f.write_str("changed"),
        }
    }
}

/// Completion (or unsolicited notification) reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalEvent {
    pub address: String,
    pub kind: EventKind,
    pub status: GattStatus,
    /// Request this event answers; `None` for unsolicited events.
    pub request: Option<RequestId>,
    pub characteristic: Option<Uuid>,
    pub descriptor: Option<Uuid>,
    pub payload: Option<Vec<u8>>,
}

impl TerminalEvent {
    /// Event answering `request`, with no attribute identity or payload.
    pub fn completion(
        address: impl Into<String>,
        kind: EventKind,
        status: GattStatus,
        request: RequestId,
    ) -> Self {
        Self {
            address: address.into(),
            kind,
            status,
            request: Some(request),
            characteristic: None,
            descriptor: None,
            payload: None,
        }
    }

    /// Unsolicited characteristic-change notification.
    pub fn changed(address: impl Into<String>, characteristic: Uuid, payload: Vec<u8>) -> Self {
        Self {
            address: address.into(),
            kind: EventKind::Changed,
            status: GattStatus::Success,
            request: None,
            characteristic: Some(characteristic),
            descriptor: None,
            payload: Some(payload),
        }
    }

    pub fn with_characteristic(mut self, characteristic: Option<Uuid>) -> Self {
        self.characteristic = characteristic;
        self
    }

    pub fn with_descriptor(mut self, descriptor: Option<Uuid>) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
