/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-device link state.
//!
//! Every address the scheduler has seen gets one [`DeviceState`], created
//! lazily on first reference and kept until the scheduler task ends.  The
//! registry is owned by the scheduler task; nothing else mutates it.
//!
//! # State machine
//! ```text
//!              connect ok              discover ok
//! Disconnected ──────────► Connected ──────────────► Discovered
//!      ▲                       │                          │
//!      └───────────────────────┴──── disconnect event ────┘
//! ```
//! Transitions happen only on confirmed transport events, never on dispatch.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::transport::Transport;

// ── LinkState ─────────────────────────────────────────────────────────────────

/// Externally visible summary of a device's link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connected,
    Discovered,
}

impl LinkState {
    pub fn is_connected(self) -> bool {
        self != LinkState::Disconnected
    }

    pub fn is_discovered(self) -> bool {
        self == LinkState::Discovered
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connected => "connected",
            LinkState::Discovered => "discovered",
        };
        f.write_str(s)
    }
}

// ── DeviceState ───────────────────────────────────────────────────────────────

/// Mutable state of one remote device.
///
/// Invariant: `discovered ⇒ connected`.  The flags are private so the only
/// way to change them is through the event handlers below, which preserve it.
pub struct DeviceState {
    pub address: String,
    /// Advertised name, used to pick a device template.
    pub name: Option<String>,
    /// Consecutive dispatches without a success (only counted while an
    /// attempt limit is configured).
    pub attempts: u32,
    connected: bool,
    discovered: bool,
    transport: Option<Box<dyn Transport>>,
}

impl DeviceState {
    fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            attempts: 0,
            connected: false,
            discovered: false,
            transport: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_discovered(&self) -> bool {
        self.discovered
    }

    pub fn link_state(&self) -> LinkState {
        match (self.connected, self.discovered) {
            (true, true) => LinkState::Discovered,
            (true, false) => LinkState::Connected,
            (false, _) => LinkState::Disconnected,
        }
    }

    /// Whether a transport handle is currently attached.
    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Take ownership of the handle returned by a connect dispatch.
    ///
    /// A handle left over from an earlier attempt is closed first.
    pub fn attach_transport(&mut self, transport: Box<dyn Transport>) {
        self.release_transport();
        self.transport = Some(transport);
    }

    pub fn transport_mut(&mut self) -> Option<&mut (dyn Transport + 'static)> {
        self.transport.as_deref_mut()
    }

    /// Outcome of a connect attempt.  A failed attempt releases the handle.
    pub fn on_connect_result(&mut self, success: bool) {
        self.connected = success;
        if !success {
            self.discovered = false;
            self.release_transport();
        }
    }

    /// Outcome of a service discovery.
    pub fn on_discover_result(&mut self, success: bool) {
        // Discovery can only succeed on a live link.
        self.discovered = success && self.connected;
    }

    /// The link went down, requested or not.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.discovered = false;
        self.release_transport();
    }

    fn release_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            debug!(address = %self.address, "closing transport handle");
            transport.close();
        }
    }
}

impl fmt::Debug for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceState")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("attempts", &self.attempts)
            .field("connected", &self.connected)
            .field("discovered", &self.discovered)
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}

// ── DeviceRegistry ────────────────────────────────────────────────────────────

/// Map of address → [`DeviceState`].
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceState>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `address`, creating a disconnected one if absent.
    pub fn get(&mut self, address: &str) -> &mut DeviceState {
        self.devices
            .entry(address.to_string())
            .or_insert_with(|| {
                debug!(address = %address, "tracking new device");
                DeviceState::new(address)
            })
    }

    /// Creates the entry if needed and records the device name.
    ///
    /// A `None` name leaves a previously registered name untouched.
    pub fn register(&mut self, address: &str, name: Option<String>) -> &mut DeviceState {
        let device = self.get(address);
        if name.is_some() {
            device.name = name;
        }
        device
    }

    /// Lookup without creation.
    pub fn find(&self, address: &str) -> Option<&DeviceState> {
        self.devices.get(address)
    }

    /// Mutable lookup without creation.
    pub fn find_mut(&mut self, address: &str) -> Option<&mut DeviceState> {
        self.devices.get_mut(address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.devices.contains_key(address)
    }

    /// `false` for unknown addresses.
    pub fn is_connected(&self, address: &str) -> bool {
        self.find(address).is_some_and(DeviceState::is_connected)
    }

    /// `false` for unknown addresses.
    pub fn is_discovered(&self, address: &str) -> bool {
        self.find(address).is_some_and(DeviceState::is_discovered)
    }

    /// Marks every device disconnected and closes all open handles.
    pub fn release_all(&mut self) {
        for device in self.devices.values_mut() {
            device.on_disconnected();
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
