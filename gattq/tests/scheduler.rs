/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! End-to-end scheduler behaviour against the simulated transport.

use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use gattq::operation::{EventKind, CCCD_UUID, ENABLE_NOTIFICATION_VALUE};
use gattq::scheduler::{self, SchedulerHandle};
use gattq::template::{
    AttributeValue, CharacteristicTemplate, DeviceTemplate, TemplateRegistry, ValueFormat,
};
use gattq::transport::sim::{Reply, SimNetwork, SimTrace};
use gattq::{
    GattStatus, Operation, OperationError, OperationKind, OperationRecord, SchedulerEvent,
    SchedulerPolicy,
};

const BATTERY_SVC: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
const LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
const ALERT: Uuid = Uuid::from_u128(0x00002a06_0000_1000_8000_00805f9b34fb);
const HEART_RATE: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

// ── Helpers ───────────────────────────────────────────────────────────────────

fn policy(attempt_limit: u32, fault_correction: bool, auto_reconnect: bool) -> SchedulerPolicy {
    SchedulerPolicy {
        attempt_limit,
        fault_correction,
        auto_reconnect,
    }
}

fn start(
    net: &SimNetwork,
    policy: SchedulerPolicy,
) -> (SchedulerHandle, broadcast::Receiver<SchedulerEvent>) {
    let (handle, _task) = scheduler::spawn(net.clone(), policy, TemplateRegistry::new());
    let rx = handle.subscribe();
    (handle, rx)
}

fn records(rx: &mut broadcast::Receiver<SchedulerEvent>) -> Vec<OperationRecord> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SchedulerEvent::Operation(record) = event {
            out.push(record);
        }
    }
    out
}

fn kinds(net: &SimNetwork, address: &str) -> Vec<OperationKind> {
    net.calls_for(address).iter().map(|c| c.kind).collect()
}

/// Connects and discovers `address`, then discards the records.
async fn ready(
    handle: &SchedulerHandle,
    rx: &mut broadcast::Receiver<SchedulerEvent>,
    address: &str,
) {
    assert!(handle.enqueue(Operation::connect(address)).await);
    assert!(handle.enqueue(Operation::discover(address)).await);
    handle.wait_idle().await;
    assert!(handle.is_discovered(address));
    records(rx);
}

// ── Protocol ordering ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn read_on_disconnected_device_synthesizes_connect_and_discover() {
    let net = SimNetwork::new();
    net.set_value("A", LEVEL, [87]);
    let (handle, mut rx) = start(&net, policy(0, true, false));

    assert!(handle.enqueue(Operation::read("A", LEVEL)).await);
    handle.wait_idle().await;

    assert_eq!(
        kinds(&net, "A"),
        vec![OperationKind::Connect, OperationKind::Discover, OperationKind::Read]
    );

    let reads: Vec<_> = records(&mut rx)
        .into_iter()
        .filter(|r| r.kind == EventKind::Read)
        .collect();
    assert_eq!(reads.len(), 1);
    assert!(reads[0].is_success());
    assert!(reads[0].matched);
    assert_eq!(reads[0].payload, Some(vec![87]));
    assert!(handle.is_discovered("A"));
}

#[tokio::test(start_paused = true)]
async fn connect_of_one_device_resolves_before_the_next_starts() {
    let net = SimNetwork::new();
    net.set_latency(Duration::from_millis(25));
    let (handle, _rx) = start(&net, policy(0, false, false));

    assert!(handle.enqueue(Operation::connect("A")).await);
    assert!(handle.enqueue(Operation::connect("B")).await);
    handle.wait_idle().await;

    let trace = net.trace();
    let position =
        |wanted: &dyn Fn(&SimTrace) -> bool| trace.iter().position(|t| wanted(t)).unwrap();
    let a_called = position(&|t| matches!(t, SimTrace::Called(c) if c.address == "A"));
    let a_resolved =
        position(&|t| matches!(t, SimTrace::Resolved { address, .. } if address == "A"));
    let b_called = position(&|t| matches!(t, SimTrace::Called(c) if c.address == "B"));
    assert!(a_called < a_resolved);
    assert!(a_resolved < b_called);
    assert!(handle.is_connected("A"));
    assert!(handle.is_connected("B"));
}

// ── Deduplication ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn duplicate_connect_is_refused_but_reads_are_not() {
    let net = SimNetwork::new();
    net.set_latency(Duration::from_millis(10));
    let (handle, _rx) = start(&net, policy(0, true, false));

    // B occupies the slot so A's operations stay queued.
    assert!(handle.enqueue(Operation::connect("B")).await);
    assert!(handle.enqueue(Operation::connect("A")).await);
    assert!(!handle.enqueue(Operation::connect("A")).await);
    assert!(handle.enqueue(Operation::read("A", LEVEL)).await);
    assert!(handle.enqueue(Operation::read("A", LEVEL)).await);
    assert_eq!(handle.pending().await.len(), 3);

    handle.wait_idle().await;
    assert_eq!(net.count("A", OperationKind::Connect), 1);
    assert_eq!(net.count("A", OperationKind::Read), 2);
}

// ── Retries and the attempt limit ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failing_connect_escalates_after_attempt_limit() {
    let net = SimNetwork::new();
    net.set_default("A", OperationKind::Connect, Reply::Fail(GattStatus::Other(0x85)));
    let (handle, mut rx) = start(&net, policy(3, true, false));

    assert!(handle.enqueue(Operation::connect("A")).await);
    handle.wait_idle().await;

    assert_eq!(net.count("A", OperationKind::Connect), 3);
    assert!(handle.pending().await.is_empty());

    let records = records(&mut rx);
    let escalation: Vec<_> = records
        .iter()
        .filter(|r| r.result == Err(OperationError::AttemptLimitReached { limit: 3 }))
        .collect();
    assert_eq!(escalation.len(), 1);
    assert_eq!(escalation[0].kind, EventKind::Connect);

    // The forced disconnect finds the device already disconnected.
    let disconnects: Vec<_> = records
        .iter()
        .filter(|r| r.kind == EventKind::Disconnect)
        .collect();
    assert_eq!(disconnects.len(), 1);
    assert!(disconnects[0].is_success());
    assert!(!handle.is_connected("A"));

    // Nothing more happens until someone asks again.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(net.count("A", OperationKind::Connect), 3);

    // The counter was reset: a fresh connect gets a full budget.
    net.set_default("A", OperationKind::Connect, Reply::Succeed);
    assert!(handle.enqueue(Operation::connect("A")).await);
    handle.wait_idle().await;
    assert_eq!(net.count("A", OperationKind::Connect), 4);
    assert!(handle.is_connected("A"));
}

#[tokio::test(start_paused = true)]
async fn failing_write_retries_identical_bytes_then_forces_disconnect() {
    let net = SimNetwork::new();
    net.set_default("A", OperationKind::Write, Reply::Fail(GattStatus::WriteNotPermitted));
    let (handle, mut rx) = start(&net, policy(3, true, false));

    assert!(handle.enqueue(Operation::write("A", ALERT, [1, 2, 3])).await);
    assert!(handle.enqueue(Operation::read("A", LEVEL)).await);
    handle.wait_idle().await;

    let writes: Vec<_> = net
        .calls_for("A")
        .into_iter()
        .filter(|c| c.kind == OperationKind::Write)
        .collect();
    assert_eq!(writes.len(), 3);
    assert!(writes.iter().all(|c| c.value.as_deref() == Some(&[1u8, 2, 3][..])));

    // The queued read was purged and the link was torn down.
    assert_eq!(net.count("A", OperationKind::Read), 0);
    assert_eq!(net.count("A", OperationKind::Disconnect), 1);
    assert!(!handle.is_connected("A"));

    let failures: Vec<_> = records(&mut rx)
        .into_iter()
        .filter(|r| r.kind == EventKind::Write)
        .map(|r| r.result)
        .collect();
    assert_eq!(
        failures,
        vec![
            Err(OperationError::Transport(GattStatus::WriteNotPermitted)),
            Err(OperationError::Transport(GattStatus::WriteNotPermitted)),
            Err(OperationError::Transport(GattStatus::WriteNotPermitted)),
            Err(OperationError::AttemptLimitReached { limit: 3 }),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn successful_write_reports_once_and_advances() {
    let net = SimNetwork::new();
    let (handle, mut rx) = start(&net, policy(0, true, false));
    ready(&handle, &mut rx, "A").await;

    assert!(handle.enqueue(Operation::write("A", ALERT, [9])).await);
    assert!(handle.enqueue(Operation::read("A", ALERT)).await);
    handle.wait_idle().await;

    let records = records(&mut rx);
    let writes: Vec<_> = records.iter().filter(|r| r.kind == EventKind::Write).collect();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].is_success());
    let read = records.iter().find(|r| r.kind == EventKind::Read).unwrap();
    assert_eq!(read.payload, Some(vec![9]));
}

#[tokio::test(start_paused = true)]
async fn failed_read_is_not_retried() {
    let net = SimNetwork::new();
    net.script("A", OperationKind::Read, [Reply::Fail(GattStatus::ReadNotPermitted)]);
    let (handle, mut rx) = start(&net, policy(0, true, false));
    ready(&handle, &mut rx, "A").await;

    handle.enqueue(Operation::read("A", LEVEL)).await;
    handle.wait_idle().await;

    assert_eq!(net.count("A", OperationKind::Read), 1);
    let records = records(&mut rx);
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].error().and_then(OperationError::status),
        Some(GattStatus::ReadNotPermitted)
    );
}

#[tokio::test(start_paused = true)]
async fn failed_discover_is_retried_ahead_of_other_devices() {
    let net = SimNetwork::new();
    net.script("A", OperationKind::Discover, [Reply::Fail(GattStatus::Failure)]);
    let (handle, mut rx) = start(&net, policy(0, false, false));

    assert!(handle.enqueue(Operation::connect("A")).await);
    assert!(handle.enqueue(Operation::discover("A")).await);
    assert!(handle.enqueue(Operation::connect("B")).await);
    handle.wait_idle().await;

    let order: Vec<_> = net
        .calls()
        .into_iter()
        .map(|c| (c.address, c.kind))
        .collect();
    assert_eq!(
        order,
        vec![
            ("A".to_string(), OperationKind::Connect),
            ("A".to_string(), OperationKind::Discover),
            ("A".to_string(), OperationKind::Discover),
            ("B".to_string(), OperationKind::Connect),
        ]
    );
    assert!(handle.is_discovered("A"));

    let discovers: Vec<_> = records(&mut rx)
        .into_iter()
        .filter(|r| r.kind == EventKind::Discover)
        .map(|r| r.result)
        .collect();
    assert_eq!(
        discovers,
        vec![Err(OperationError::Transport(GattStatus::Failure)), Ok(())]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_descriptor_write_is_retried_with_identical_bytes() {
    let net = SimNetwork::new();
    net.script(
        "A",
        OperationKind::WriteDescriptor,
        [Reply::Fail(GattStatus::WriteNotPermitted)],
    );
    let (handle, mut rx) = start(&net, policy(0, true, false));
    ready(&handle, &mut rx, "A").await;

    let op = Operation::write_descriptor("A", HEART_RATE, CCCD_UUID, ENABLE_NOTIFICATION_VALUE);
    assert!(handle.enqueue(op).await);
    handle.wait_idle().await;

    let writes: Vec<_> = net
        .calls_for("A")
        .into_iter()
        .filter(|c| c.kind == OperationKind::WriteDescriptor)
        .collect();
    assert_eq!(writes.len(), 2);
    for call in &writes {
        assert_eq!(call.descriptor, Some(CCCD_UUID));
        assert_eq!(call.value.as_deref(), Some(&ENABLE_NOTIFICATION_VALUE[..]));
    }

    let results: Vec<_> = records(&mut rx).into_iter().map(|r| r.result).collect();
    assert_eq!(
        results,
        vec![Err(OperationError::Transport(GattStatus::WriteNotPermitted)), Ok(())]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_notification_toggle_is_not_retried() {
    let net = SimNetwork::new();
    net.script("A", OperationKind::SetNotification, [Reply::Fail(GattStatus::Failure)]);
    let (handle, mut rx) = start(&net, policy(0, true, false));
    ready(&handle, &mut rx, "A").await;

    assert!(handle.enqueue(Operation::set_notification("A", HEART_RATE, true)).await);
    assert!(handle.enqueue(Operation::read("A", LEVEL)).await);
    handle.wait_idle().await;

    assert_eq!(net.count("A", OperationKind::SetNotification), 1);
    assert_eq!(net.count("A", OperationKind::Read), 1);
    let records = records(&mut rx);
    assert_eq!(records[0].kind, EventKind::SetNotification);
    assert_eq!(records[0].result, Err(OperationError::Transport(GattStatus::Failure)));
    assert!(records[1].is_success());
}

#[tokio::test(start_paused = true)]
async fn failed_requested_disconnect_is_not_retried() {
    let net = SimNetwork::new();
    net.script("A", OperationKind::Disconnect, [Reply::Fail(GattStatus::Failure)]);
    let (handle, mut rx) = start(&net, policy(0, true, false));
    ready(&handle, &mut rx, "A").await;

    assert!(handle.enqueue(Operation::disconnect("A")).await);
    handle.wait_idle().await;

    assert_eq!(net.count("A", OperationKind::Disconnect), 1);
    let records = records(&mut rx);
    assert_eq!(records.len(), 1);
    assert!(records[0].matched);
    assert_eq!(records[0].result, Err(OperationError::Transport(GattStatus::Failure)));
    // A disconnect event always ends the link, whatever its status.
    assert!(!handle.is_connected("A"));
}

// ── Failed prerequisites ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn refused_injected_discover_fails_the_read_and_recovers_later() {
    let net = SimNetwork::new();
    net.script("A", OperationKind::Discover, [Reply::Reject]);
    let (handle, mut rx) = start(&net, policy(0, true, false));

    assert!(handle.enqueue(Operation::read("A", LEVEL)).await);
    handle.wait_idle().await;

    let summary: Vec<_> = records(&mut rx)
        .into_iter()
        .map(|r| (r.kind, r.result.is_ok()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (EventKind::Connect, true),
            (EventKind::Discover, false),
            (EventKind::Read, false),
        ]
    );
    assert!(handle.is_connected("A"));
    assert!(!handle.is_discovered("A"));
    assert_eq!(net.count("A", OperationKind::Read), 0);

    // The next read injects a fresh discover, which now goes through.
    assert!(handle.enqueue(Operation::read("A", LEVEL)).await);
    handle.wait_idle().await;
    assert_eq!(net.count("A", OperationKind::Discover), 2);
    assert_eq!(net.count("A", OperationKind::Read), 1);
    assert!(handle.is_discovered("A"));
}

#[tokio::test(start_paused = true)]
async fn late_connect_success_after_link_loss_does_not_revive_the_link() {
    let net = SimNetwork::new();
    net.set_latency_for("A", OperationKind::Connect, Duration::from_millis(100));
    let (handle, mut rx) = start(&net, policy(0, true, false));

    assert!(handle.enqueue(Operation::connect("A")).await);
    // The connect is still outstanding when the link drops.
    assert!(net.drop_link("A"));
    handle.wait_idle().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let connects: Vec<_> = records(&mut rx)
        .into_iter()
        .filter(|r| r.kind == EventKind::Connect)
        .collect();
    assert_eq!(connects.len(), 2);
    assert_eq!(connects[0].result, Err(OperationError::LinkLost));
    assert!(connects[1].is_success());
    assert!(!connects[1].matched);
    assert!(!handle.is_connected("A"));

    // Fault correction still sees a disconnected device and reconnects.
    assert!(handle.enqueue(Operation::read("A", LEVEL)).await);
    handle.wait_idle().await;
    assert_eq!(
        kinds(&net, "A"),
        vec![
            OperationKind::Connect,
            OperationKind::Connect,
            OperationKind::Discover,
            OperationKind::Read
        ]
    );
    assert!(handle.is_discovered("A"));
}

// ── Timeouts and late events ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn late_event_after_timeout_is_published_unmatched() {
    let net = SimNetwork::new();
    net.set_latency_for("A", OperationKind::Read, Duration::from_millis(300));
    let (handle, mut rx) = start(&net, policy(0, true, false));
    ready(&handle, &mut rx, "A").await;

    handle
        .enqueue(Operation::read("A", LEVEL).with_timeout_ms(100))
        .await;
    handle.enqueue(Operation::connect("B")).await;
    handle.wait_idle().await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    let records = records(&mut rx);
    let reads: Vec<_> = records.iter().filter(|r| r.kind == EventKind::Read).collect();
    assert_eq!(reads.len(), 2);
    assert_eq!(reads[0].result, Err(OperationError::Timeout { timeout_ms: 100 }));
    assert!(reads[0].matched);
    assert!(reads[1].is_success());
    assert!(!reads[1].matched, "late completion must not match");
    assert!(handle.is_connected("B"));
    assert!(!handle.is_active());
}

// ── Queries ───────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unknown_addresses_are_not_connected() {
    let net = SimNetwork::new();
    let (handle, _rx) = start(&net, policy(0, false, false));
    assert!(!handle.is_connected("never-seen"));
    assert!(!handle.is_discovered("never-seen"));

    handle.register_device("R", Some("Thermometer".into()));
    handle.wait_idle().await;
    assert!(!handle.is_connected("R"));
}

#[tokio::test(start_paused = true)]
async fn configure_applies_to_later_operations() {
    let net = SimNetwork::new();
    let (handle, mut rx) = start(&net, policy(0, false, false));

    handle.enqueue(Operation::read("A", LEVEL)).await;
    handle.wait_idle().await;
    assert!(matches!(
        records(&mut rx)[0].result,
        Err(OperationError::NotReady { .. })
    ));

    handle.configure(policy(0, true, false));
    handle.enqueue(Operation::read("A", LEVEL)).await;
    handle.wait_idle().await;
    assert_eq!(net.count("A", OperationKind::Read), 1);
}

// ── Supplementary behaviour ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn auto_reconnect_after_link_loss() {
    let net = SimNetwork::new();
    let (handle, mut rx) = start(&net, policy(0, true, true));
    ready(&handle, &mut rx, "A").await;

    assert!(net.drop_link("A"));
    // Let the scheduler see the loss and finish the reconnect.
    while net.count("A", OperationKind::Connect) < 2 {
        tokio::task::yield_now().await;
    }
    handle.wait_idle().await;

    assert!(handle.is_connected("A"));
    assert!(!handle.is_discovered("A"), "rediscovery is left to the next I/O");
}

#[tokio::test(start_paused = true)]
async fn clean_remote_disconnect_does_not_reconnect() {
    let net = SimNetwork::new();
    let (handle, mut rx) = start(&net, policy(0, true, true));
    ready(&handle, &mut rx, "A").await;

    handle.enqueue(Operation::disconnect("A")).await;
    handle.wait_idle().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(net.count("A", OperationKind::Connect), 1);
    assert!(!handle.is_connected("A"));
}

#[tokio::test(start_paused = true)]
async fn subscribe_notifications_writes_cccd_then_toggles() {
    let net = SimNetwork::new();
    let (handle, _rx) = start(&net, policy(0, true, false));

    assert!(handle.subscribe_notifications("A", HEART_RATE, true, 0).await);
    handle.wait_idle().await;

    let calls = net.calls_for("A");
    let kinds: Vec<_> = calls.iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![
            OperationKind::Connect,
            OperationKind::Discover,
            OperationKind::WriteDescriptor,
            OperationKind::SetNotification
        ]
    );
    assert_eq!(calls[2].descriptor, Some(CCCD_UUID));
    assert_eq!(calls[2].value.as_deref(), Some(&ENABLE_NOTIFICATION_VALUE[..]));
    assert_eq!(calls[3].characteristic, Some(HEART_RATE));
}

#[tokio::test(start_paused = true)]
async fn records_carry_template_names_and_decoded_values() {
    let template = DeviceTemplate::builder("Tag")
        .service("Battery", BATTERY_SVC)
        .unwrap()
        .characteristic(
            CharacteristicTemplate::new("Battery Level", LEVEL).with_format(ValueFormat::U8),
        )
        .unwrap()
        .done()
        .build();
    let mut templates = TemplateRegistry::new();
    templates.add(template).unwrap();

    let net = SimNetwork::new();
    net.set_value("A", LEVEL, [64]);
    let (handle, _task) = scheduler::spawn(net.clone(), policy(0, true, false), templates);
    let mut rx = handle.subscribe();
    handle.register_device("A", Some("Tag".into()));

    handle.enqueue(Operation::read("A", LEVEL)).await;
    handle.wait_idle().await;
    assert!(net.notify("A", LEVEL, [63]));
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    let records = records(&mut rx);
    let read = records.iter().find(|r| r.kind == EventKind::Read).unwrap();
    assert_eq!(
        read.characteristic.as_ref().and_then(|c| c.name.as_deref()),
        Some("Battery Level")
    );
    assert_eq!(read.value, Some(AttributeValue::Unsigned(64)));

    let changed = records.iter().find(|r| r.kind == EventKind::Changed).unwrap();
    assert_eq!(changed.value, Some(AttributeValue::Unsigned(63)));
    assert!(!changed.matched);
}
