/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! gattq – single-flight operation scheduler for GATT devices
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── operation/      – operation, terminal event and status value types
//! ├── device/         – per-device link state and registry
//! ├── transport/      – transport capability traits + simulated radio
//! ├── template/       – device templates (UUID → name, value formats)
//! ├── events/         – observer-facing records
//! ├── config/         – YAML policy / template loading, demo scenarios
//! └── scheduler/      – queue, state machine, event correlation
//! ```
//!
//! # Example
//! ```rust,ignore
//! let net = SimNetwork::new();
//! let (handle, _task) = gattq::scheduler::spawn(net, policy, templates);
//! handle.enqueue(Operation::read("C4:7C:8D:6A:1F:02", battery_level)).await;
//! handle.wait_idle().await;
//! ```

pub mod config;
pub mod device;
pub mod events;
pub mod operation;
pub mod scheduler;
pub mod template;
pub mod transport;

pub use config::SchedulerPolicy;
pub use events::{OperationRecord, SchedulerEvent};
pub use operation::{Action, GattStatus, Operation, OperationKind};
pub use scheduler::{OperationError, SchedulerHandle};
