/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Why an operation did not succeed.
//!
//! [`OperationError`] travels inside every failed
//! [`OperationRecord`](crate::events::OperationRecord), so it is `Clone` and
//! compares by value.  None of these conditions stop the scheduler; each one
//! consumes the in-flight slot and the queue moves on.
//!
//! | Variant | Produced by | Retried? |
//! |---|---|---|
//! | `Transport` | terminal event with a non-success status | connect, discover, writes |
//! | `Timeout` | no terminal event within `timeout_ms` | no |
//! | `Rejected` | transport refused the call synchronously | no |
//! | `NotReady` | prerequisite missing, fault correction off | no |
//! | `AttemptLimitReached` | attempt budget exhausted, disconnect forced | no |
//! | `LinkLost` | link dropped under the in-flight operation | no |
//! | `PrerequisiteFailed` | injected connect / discover gave up | no |
//! | `Unencodable` | typed write value does not fit the characteristic | never queued |

use thiserror::Error;
use uuid::Uuid;

use crate::device::LinkState;
use crate::operation::{GattStatus, OperationKind};
use crate::template::AttributeValue;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The device answered with a non-success status.
    #[error("device reported {0}")]
    Transport(GattStatus),

    #[error("no completion within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The transport refused to start the call; carries its message.
    #[error("transport rejected the call: {0}")]
    Rejected(String),

    /// The device is not in a state that allows this operation and fault
    /// correction is disabled, so no prerequisite was injected.
    #[error("device '{address}' is {state}")]
    NotReady { address: String, state: LinkState },

    #[error("attempt limit of {limit} reached, forcing disconnect")]
    AttemptLimitReached { limit: u32 },

    #[error("link lost while the operation was in flight")]
    LinkLost,

    /// The connect or discover injected ahead of this operation was refused
    /// or timed out, so the operation was dropped with it.
    #[error("injected {prerequisite} did not complete")]
    PrerequisiteFailed { prerequisite: OperationKind },

    /// No template format for `characteristic` can represent `value`.
    #[error("{value} cannot be written to {characteristic}")]
    Unencodable {
        characteristic: Uuid,
        value: AttributeValue,
    },
}

impl OperationError {
    /// GATT status, for failures reported by the device itself.
    pub fn status(&self) -> Option<GattStatus> {
        match self {
            OperationError::Transport(status) => Some(*status),
            _ => None,
        }
    }
}
