/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Terminal-event handling.
//!
//! Every event a transport posts goes through [`Scheduler::on_event`]:
//!
//! 1. Unknown address → logged and dropped.
//! 2. Device flags updated for connect / discover / disconnect events.
//! 3. A record is published, matched or not.
//! 4. If the event completes the in-flight operation, the slot is released
//!    (with a retry at the head of the queue for retryable failures) and the
//!    queue advances.  Anything else leaves the queue alone, except link
//!    loss, which abandons whatever was in flight for that device.

use tracing::{debug, info, warn};

use super::{InFlight, OperationError, Phase, Scheduler};
use crate::events::OperationRecord;
use crate::operation::{EventKind, Operation, OperationKind, RequestId, TerminalEvent};

/// Whether `event` completes `op`, dispatched under `request`.
///
/// Request id, address and kind must all agree; attribute I/O must also
/// name the same characteristic (and descriptor).
pub fn correlates(op: &Operation, request: RequestId, event: &TerminalEvent) -> bool {
    if event.request != Some(request)
        || event.address != op.address
        || event.kind.operation_kind() != Some(op.kind())
    {
        return false;
    }
    match op.kind() {
        OperationKind::Connect | OperationKind::Disconnect | OperationKind::Discover => true,
        OperationKind::Read | OperationKind::Write | OperationKind::SetNotification => {
            event.characteristic == op.action.characteristic()
        }
        OperationKind::WriteDescriptor => {
            event.characteristic == op.action.characteristic()
                && event.descriptor == op.action.descriptor()
        }
    }
}

impl Scheduler {
    pub(super) fn on_event(&mut self, event: TerminalEvent) {
        let matched = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.phase == Phase::Dispatched && correlates(&f.op, f.request, &event));
        let success = event.status.is_success();

        let Some(device) = self.devices.find_mut(&event.address) else {
            warn!(
                address = %event.address,
                kind = %event.kind,
                status = %event.status,
                "event for unknown device dropped"
            );
            return;
        };

        // A failure answering a superseded request says nothing about the
        // current link, so only matched, unsolicited or successful events
        // move the state machine.  A connect success arriving after its
        // handle was released cannot bring the link back.
        let authoritative = matched || success || event.request.is_none();
        let revivable = !success || device.has_transport();
        match event.kind {
            EventKind::Disconnect => device.on_disconnected(),
            EventKind::Connect if authoritative && revivable => {
                device.on_connect_result(success)
            }
            EventKind::Discover if authoritative => device.on_discover_result(success),
            _ => {}
        }
        self.publish_link(&event.address);

        if !matched && event.request.is_some() {
            debug!(
                address = %event.address,
                kind = %event.kind,
                request = ?event.request,
                "late or foreign event"
            );
        }

        let address = event.address.clone();
        let unsolicited_disconnect = event.kind == EventKind::Disconnect && event.request.is_none();
        let record = self.record_for_event(event, matched);
        self.publish(record);

        if matched {
            self.complete_in_flight(success);
        } else if unsolicited_disconnect {
            self.on_link_lost(&address, success);
        }
    }

    fn record_for_event(&self, event: TerminalEvent, matched: bool) -> OperationRecord {
        let name = self.device_name(&event.address);
        let characteristic = event
            .characteristic
            .map(|c| self.templates.resolve_characteristic(name, c));
        let descriptor = event
            .descriptor
            .map(|d| self.templates.resolve_descriptor(name, event.characteristic, d));
        let value = match (event.characteristic, &event.payload) {
            (Some(c), Some(payload)) => self.templates.decode(name, c, payload),
            _ => None,
        };
        let result = if event.status.is_success() {
            Ok(())
        } else {
            Err(OperationError::Transport(event.status))
        };
        OperationRecord {
            address: event.address,
            kind: event.kind,
            result,
            characteristic,
            descriptor,
            payload: event.payload,
            value,
            matched,
        }
    }

    fn complete_in_flight(&mut self, success: bool) {
        let Some(InFlight {
            op,
            request,
            prerequisite,
            ..
        }) = self.in_flight.take()
        else {
            return;
        };
        if success {
            self.devices.get(&op.address).attempts = 0;
        } else if op.kind().retries_on_failure() {
            debug!(op = %op, request = %request, "retrying at head of queue");
            let key = (op.address.clone(), op.kind());
            if !self.queue.enqueue_front(op) {
                debug!(request = %request, "retry superseded by a queued duplicate");
            }
            if prerequisite {
                self.injected.insert(key);
            }
        }
        self.advance();
    }

    /// The device dropped its link without being asked to.
    fn on_link_lost(&mut self, address: &str, clean: bool) {
        let owns_slot = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.op.address == address);
        let abandoned = if owns_slot { self.in_flight.take() } else { None };

        if let Some(InFlight { op, .. }) = &abandoned {
            // A disconnect waiting for its answer got one.
            let result = if op.kind() == OperationKind::Disconnect {
                Ok(())
            } else {
                Err(OperationError::LinkLost)
            };
            let record = self.record_for(op, result);
            self.publish(record);
        }

        if !clean && self.policy.auto_reconnect {
            info!(address = %address, "link lost, queueing reconnect");
            self.enqueue(Operation::connect(address));
        }

        if abandoned.is_some() {
            self.advance();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{GattStatus, CCCD_UUID};
    use uuid::Uuid;

    const U1: Uuid = Uuid::from_u128(0x2a19);
    const U2: Uuid = Uuid::from_u128(0x2a37);

    fn completion(address: &str, kind: EventKind, request: u64) -> TerminalEvent {
        TerminalEvent::completion(address, kind, GattStatus::Success, RequestId(request))
    }

    #[test]
    fn lifecycle_events_match_on_request_address_and_kind() {
        let op = Operation::connect("A");
        assert!(correlates(&op, RequestId(1), &completion("A", EventKind::Connect, 1)));
        assert!(!correlates(&op, RequestId(1), &completion("A", EventKind::Connect, 2)));
        assert!(!correlates(&op, RequestId(1), &completion("B", EventKind::Connect, 1)));
        assert!(!correlates(&op, RequestId(1), &completion("A", EventKind::Discover, 1)));
    }

    #[test]
    fn unsolicited_events_never_match() {
        let op = Operation::read("A", U1);
        let changed = TerminalEvent::changed("A", U1, vec![1]);
        assert!(!correlates(&op, RequestId(1), &changed));
    }

    #[test]
    fn attribute_io_must_name_the_same_characteristic() {
        let op = Operation::read("A", U1);
        let right = completion("A", EventKind::Read, 3).with_characteristic(Some(U1));
        let wrong = completion("A", EventKind::Read, 3).with_characteristic(Some(U2));
        assert!(correlates(&op, RequestId(3), &right));
        assert!(!correlates(&op, RequestId(3), &wrong));
    }

    #[test]
    fn descriptor_writes_must_name_the_same_descriptor() {
        let op = Operation::write_descriptor("A", U1, CCCD_UUID, [1, 0]);
        let right = completion("A", EventKind::WriteDescriptor, 4)
            .with_characteristic(Some(U1))
            .with_descriptor(Some(CCCD_UUID));
        let wrong = completion("A", EventKind::WriteDescriptor, 4)
            .with_characteristic(Some(U1))
            .with_descriptor(Some(Uuid::from_u128(0x2901)));
        assert!(correlates(&op, RequestId(4), &right));
        assert!(!correlates(&op, RequestId(4), &wrong));
    }
}
