/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! What observers see.
//!
//! The scheduler publishes on a `tokio::sync::broadcast` channel; every
//! [`SchedulerHandle::subscribe`](crate::scheduler::SchedulerHandle::subscribe)
//! call gets its own receiver.  A receiver that falls too far behind sees
//! `RecvError::Lagged` and skips ahead; the scheduler never waits for
//! observers.

use std::fmt;

use crate::operation::EventKind;
use crate::scheduler::OperationError;
use crate::template::{AttributeRef, AttributeValue};

/// Buffered events per observer before it starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Operation(OperationRecord),
    /// `true` when the scheduler leaves Idle, `false` when it returns to it.
    QueueActiveChanged(bool),
}

/// Outcome of one operation, or one unsolicited transport event.
///
/// Produced for every terminal event the correlator accepts (matched or
/// not) and for every outcome the scheduler decides on its own (trivially
/// satisfied, not ready, timed out, rejected, escalated, link lost).
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRecord {
    pub address: String,
    pub kind: EventKind,
    pub result: Result<(), OperationError>,
    pub characteristic: Option<AttributeRef>,
    pub descriptor: Option<AttributeRef>,
    pub payload: Option<Vec<u8>>,
    /// Payload decoded with the characteristic's template format.
    pub value: Option<AttributeValue>,
    /// `true` when this record concludes a queued operation; `false` for
    /// unsolicited events and for events that arrive after their operation
    /// was given up on.
    pub matched: bool,
}

impl OperationRecord {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&OperationError> {
        self.result.as_ref().err()
    }
}

impl fmt::Display for OperationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.address)?;
        if let Some(c) = &self.characteristic {
            write!(f, " [{}]", c)?;
        }
        if let Some(d) = &self.descriptor {
            write!(f, " [{}]", d)?;
        }
        match &self.result {
            Ok(()) => f.write_str(": ok")?,
            Err(e) => write!(f, ": {}", e)?,
        }
        match (&self.value, &self.payload) {
            (Some(v), _) => write!(f, " = {}", v),
            (None, Some(p)) if !p.is_empty() => write!(f, " = 0x{}", hex::encode(p)),
            _ => Ok(()),
        }
    }
}
