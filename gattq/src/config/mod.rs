/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Scheduler configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! scheduler:
//!   attempt_limit: 3
//!   fault_correction: true
//!   auto_reconnect: false
//!
//! devices:
//!   "C4:7C:8D:6A:1F:02": Thermometer
//!
//! templates:
//!   Thermometer:
//!     - name: Health Thermometer
//!       uuid: "1809"
//!       characteristics:
//!         - name: Temperature Measurement
//!           uuid: "2a1c"
//!           format: i16_le
//!           descriptors:
//!             - name: CCCD
//!               uuid: "2902"
//! ```
//!
//! Every section is optional.  UUIDs may be written in full or as a 16-bit
//! short form, which is expanded against the Bluetooth base UUID.

pub mod scenario;

pub use scenario::Scenario;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::template::{CharacteristicTemplate, DeviceTemplate, TemplateRegistry, ValueFormat};

// ── Scheduler policy ──────────────────────────────────────────────────────────

/// Runtime knobs of the scheduler.
///
/// * `attempt_limit` – consecutive unsuccessful dispatches per device before
///   a disconnect is forced; `0` disables the limit.
/// * `fault_correction` – inject the missing `Connect`/`Discover` instead of
///   failing an operation whose device is not ready.
/// * `auto_reconnect` – queue a `Connect` when a device drops its link
///   unexpectedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct SchedulerPolicy {
    pub attempt_limit: u32,
    pub fault_correction: bool,
    pub auto_reconnect: bool,
}

// ── Private YAML deserialization types ────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    scheduler: SchedulerPolicy,
    devices: BTreeMap<String, String>,
    templates: BTreeMap<String, Vec<ServiceEntry>>,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    name: String,
    uuid: String,
    #[serde(default)]
    characteristics: Vec<CharacteristicEntry>,
}

#[derive(Debug, Deserialize)]
struct CharacteristicEntry {
    name: String,
    uuid: String,
    #[serde(default)]
    format: ValueFormat,
    #[serde(default)]
    descriptors: Vec<DescriptorEntry>,
}

#[derive(Debug, Deserialize)]
struct DescriptorEntry {
    name: String,
    uuid: String,
}

// ── UUID parsing ──────────────────────────────────────────────────────────────

/// Parses a full UUID or a 16/32-bit short form (`"2a19"`, `"0x2A19"`).
pub fn parse_uuid(text: &str) -> Result<Uuid> {
    let trimmed = text.trim();
    let short = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if short.len() <= 8 && !short.is_empty() {
        let value = u32::from_str_radix(short, 16)
            .map_err(|_| anyhow!("invalid short UUID '{}'", text))?;
        return Ok(Uuid::from_u128(
            (u128::from(value) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb,
        ));
    }
    Uuid::parse_str(trimmed).with_context(|| format!("invalid UUID '{}'", text))
}

fn build_template(name: &str, services: Vec<ServiceEntry>) -> Result<DeviceTemplate> {
    let mut builder = DeviceTemplate::builder(name);
    for service in services {
        let uuid = parse_uuid(&service.uuid)?;
        let mut svc = builder.service(service.name, uuid)?;
        for ch in service.characteristics {
            let mut characteristic =
                CharacteristicTemplate::new(ch.name, parse_uuid(&ch.uuid)?).with_format(ch.format);
            for d in ch.descriptors {
                characteristic = characteristic.with_descriptor(d.name, parse_uuid(&d.uuid)?)?;
            }
            svc = svc.characteristic(characteristic)?;
        }
        builder = svc.done();
    }
    Ok(builder.build())
}

// ── ConfigManager ─────────────────────────────────────────────────────────────

/// Loads the scheduler policy, known devices and device templates.
#[derive(Debug, Default)]
pub struct ConfigManager {
    policy: SchedulerPolicy,
    /// Map of address → device name.
    devices: BTreeMap<String, String>,
    templates: TemplateRegistry,
    loaded: bool,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `path` and replaces everything loaded before.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is structurally
    /// invalid, a UUID does not parse, or a template declares something twice.
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading scheduler configuration from: {}", path.display());

        *self = Self::default();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let file: ConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let mut templates = TemplateRegistry::new();
        for (name, services) in file.templates {
            let template = build_template(&name, services)
                .with_context(|| format!("Invalid template '{}' in {}", name, path.display()))?;
            debug!(
                template = %name,
                services = template.services().len(),
                "  template loaded"
            );
            templates.add(template)?;
        }

        for (address, name) in &file.devices {
            if templates.get(name).is_none() {
                warn!(address = %address, name = %name, "device has no matching template");
            }
        }

        self.policy = file.scheduler;
        self.devices = file.devices;
        self.templates = templates;
        self.loaded = true;

        info!(
            attempt_limit = self.policy.attempt_limit,
            fault_correction = self.policy.fault_correction,
            auto_reconnect = self.policy.auto_reconnect,
            devices = self.devices.len(),
            templates = self.templates.len(),
            "Configuration loaded"
        );
        Ok(())
    }

    pub fn policy(&self) -> SchedulerPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: SchedulerPolicy) {
        self.policy = policy;
    }

    pub fn devices(&self) -> &BTreeMap<String, String> {
        &self.devices
    }

    pub fn device_name(&self, address: &str) -> Option<&str> {
        self.devices.get(address).map(String::as_str)
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Returns `true` after a successful [`load_from_file`](Self::load_from_file).
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
