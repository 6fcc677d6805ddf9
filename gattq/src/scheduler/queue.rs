/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pending-operation queue.
//!
//! A plain FIFO with one rule: at most one `Connect`, one `Discover` and one
//! `Disconnect` may be queued per device address.  A second one is refused
//! (the caller gets `false`) and the queue is left untouched.  Attribute I/O
//! is never deduplicated; two identical reads are two reads.

use std::collections::VecDeque;

use tracing::debug;

use crate::operation::{Operation, OperationKind};

#[derive(Debug, Default)]
pub struct OperationQueue {
    ops: VecDeque<Operation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn admits(&self, op: &Operation) -> bool {
        let kind = op.kind();
        !(kind.is_lifecycle() && self.contains_lifecycle(&op.address, kind))
    }

    /// Appends `op`.  Returns `false` if it is a duplicate lifecycle operation.
    pub fn enqueue(&mut self, op: Operation) -> bool {
        if !self.admits(&op) {
            debug!(op = %op, "duplicate lifecycle operation refused");
            return false;
        }
        self.ops.push_back(op);
        true
    }

    /// Inserts `op` at the head, under the same duplicate rule.
    pub fn enqueue_front(&mut self, op: Operation) -> bool {
        if !self.admits(&op) {
            debug!(op = %op, "duplicate lifecycle operation refused at head");
            return false;
        }
        self.ops.push_front(op);
        true
    }

    /// Moves the queued `kind` operation for `address` to the head.
    ///
    /// Returns `false` if there is none.
    pub fn promote(&mut self, address: &str, kind: OperationKind) -> bool {
        let Some(pos) = self
            .ops
            .iter()
            .position(|op| op.kind() == kind && op.address == address)
        else {
            return false;
        };
        if let Some(op) = self.ops.remove(pos) {
            self.ops.push_front(op);
        }
        true
    }

    /// Drops every queued operation for `address` that matches `predicate`.
    /// Returns how many were removed.
    pub fn remove_all_for<P>(&mut self, address: &str, predicate: P) -> usize
    where
        P: FnMut(&Operation) -> bool,
    {
        self.take_all_for(address, predicate).len()
    }

    /// Like [`remove_all_for`](Self::remove_all_for), but hands the removed
    /// operations back in queue order.
    pub fn take_all_for<P>(&mut self, address: &str, mut predicate: P) -> Vec<Operation>
    where
        P: FnMut(&Operation) -> bool,
    {
        let (taken, kept): (Vec<Operation>, Vec<Operation>) = self
            .ops
            .drain(..)
            .partition(|op| op.address == address && predicate(op));
        self.ops = kept.into();
        taken
    }

    pub fn pop(&mut self) -> Option<Operation> {
        self.ops.pop_front()
    }

    pub fn contains_lifecycle(&self, address: &str, kind: OperationKind) -> bool {
        self.ops
            .iter()
            .any(|op| op.kind() == kind && op.address == address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const U1: Uuid = Uuid::from_u128(0x2a19);
    const U2: Uuid = Uuid::from_u128(0x2a37);

    fn kinds(q: &OperationQueue) -> Vec<(String, OperationKind)> {
        q.iter().map(|op| (op.address.clone(), op.kind())).collect()
    }

    // ── Dedup ─────────────────────────────────────────────────────────────────

    #[test]
    fn second_connect_for_same_device_is_refused() {
        let mut q = OperationQueue::new();
        assert!(q.enqueue(Operation::connect("A")));
        assert!(!q.enqueue(Operation::connect("A")));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn lifecycle_dedup_is_per_device_and_per_kind() {
        let mut q = OperationQueue::new();
        assert!(q.enqueue(Operation::connect("A")));
        assert!(q.enqueue(Operation::connect("B")));
        assert!(q.enqueue(Operation::discover("A")));
        assert!(q.enqueue(Operation::disconnect("A")));
        assert!(!q.enqueue(Operation::disconnect("A")));
        assert!(!q.enqueue_front(Operation::discover("A")));
        assert_eq!(q.len(), 4);
    }

    #[test]
    fn attribute_io_is_never_deduplicated() {
        let mut q = OperationQueue::new();
        assert!(q.enqueue(Operation::read("A", U1)));
        assert!(q.enqueue(Operation::read("A", U1)));
        assert!(q.enqueue(Operation::write("A", U1, [1])));
        assert!(q.enqueue(Operation::write("A", U1, [1])));
        assert_eq!(q.len(), 4);
    }

    #[test]
    fn popped_connect_can_be_queued_again() {
        let mut q = OperationQueue::new();
        q.enqueue(Operation::connect("A"));
        assert_eq!(q.pop().map(|op| op.kind()), Some(OperationKind::Connect));
        assert!(q.enqueue(Operation::connect("A")));
    }

    // ── Ordering ──────────────────────────────────────────────────────────────

    #[test]
    fn enqueue_front_places_at_head() {
        let mut q = OperationQueue::new();
        q.enqueue(Operation::read("A", U1));
        q.enqueue_front(Operation::connect("A"));
        assert_eq!(
            kinds(&q),
            vec![
                ("A".into(), OperationKind::Connect),
                ("A".into(), OperationKind::Read)
            ]
        );
    }

    #[test]
    fn promote_moves_existing_lifecycle_op_to_head() {
        let mut q = OperationQueue::new();
        q.enqueue(Operation::read("B", U1));
        q.enqueue(Operation::connect("A"));
        assert!(q.promote("A", OperationKind::Connect));
        assert_eq!(q.pop().unwrap().kind(), OperationKind::Connect);
        assert_eq!(q.pop().unwrap().address, "B");
        assert!(!q.promote("A", OperationKind::Connect));
    }

    #[test]
    fn pop_on_empty_queue_is_none() {
        let mut q = OperationQueue::new();
        assert!(q.pop().is_none());
        assert!(q.is_empty());
    }

    // ── Purge ─────────────────────────────────────────────────────────────────

    #[test]
    fn remove_all_for_only_touches_the_given_device() {
        let mut q = OperationQueue::new();
        q.enqueue(Operation::read("A", U1));
        q.enqueue(Operation::read("B", U1));
        q.enqueue(Operation::write("A", U2, [0]));
        q.enqueue(Operation::connect("A"));

        let removed = q.remove_all_for("A", |op| op.kind() != OperationKind::Connect);
        assert_eq!(removed, 2);
        assert_eq!(
            kinds(&q),
            vec![
                ("B".into(), OperationKind::Read),
                ("A".into(), OperationKind::Connect)
            ]
        );

        assert_eq!(q.remove_all_for("A", |_| true), 1);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn take_all_for_returns_removed_ops_in_order() {
        let mut q = OperationQueue::new();
        q.enqueue(Operation::read("A", U1));
        q.enqueue(Operation::connect("B"));
        q.enqueue(Operation::write("A", U2, [7]));

        let taken = q.take_all_for("A", |_| true);
        assert_eq!(
            taken.iter().map(|op| op.kind()).collect::<Vec<_>>(),
            vec![OperationKind::Read, OperationKind::Write]
        );
        assert_eq!(kinds(&q), vec![("B".into(), OperationKind::Connect)]);
    }
}
