/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Demo scenarios for the simulated transport.
//!
//! ```yaml
//! latency_ms: 20
//! values:
//!   - { device: "AA:01", characteristic: "2a19", value: "57" }
//! faults:
//!   - device: "AA:01"
//!     operation: connect
//!     replies: [fail, "fail:0x85", succeed]
//!     then: succeed
//! steps:
//!   - { device: "AA:01", op: read, characteristic: "2a19", timeout_ms: 500 }
//!   - { device: "AA:01", op: write, characteristic: "2a06", value: "01" }
//!   - { device: "AA:01", op: write_value, characteristic: "2a06", value: 2 }
//!   - { device: "AA:01", op: subscribe, characteristic: "2a1c" }
//!   - { device: "AA:01", op: disconnect }
//! ```
//!
//! Reply words are `succeed`, `fail` (status `FAILURE`), `fail:<code>`,
//! `ignore` and `reject`.  `write` and `write_descriptor` values are hex
//! strings.  `write_value` takes a number or a string and is encoded with
//! the device's template when the step runs.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::parse_uuid;
use crate::operation::{Action, GattStatus, Operation, OperationKind};
use crate::template::AttributeValue;
use crate::transport::sim::{Reply, SimNetwork};

// ── Private YAML deserialization types ────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScenarioFile {
    latency_ms: u64,
    values: Vec<ValueEntry>,
    faults: Vec<FaultEntry>,
    steps: Vec<StepEntry>,
}

#[derive(Debug, Deserialize)]
struct ValueEntry {
    device: String,
    characteristic: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct FaultEntry {
    device: String,
    operation: OperationKind,
    #[serde(default)]
    replies: Vec<String>,
    then: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum StepOp {
    Connect,
    Disconnect,
    Discover,
    Read,
    Write,
    WriteValue,
    WriteDescriptor,
    SetNotification,
    Subscribe,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StepValue {
    Unsigned(u64),
    Signed(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct StepEntry {
    device: String,
    op: StepOp,
    characteristic: Option<String>,
    descriptor: Option<String>,
    value: Option<StepValue>,
    #[serde(default = "default_enable")]
    enable: bool,
    #[serde(default)]
    delay_ms: u64,
    #[serde(default)]
    timeout_ms: u64,
}

fn default_enable() -> bool {
    true
}

// ── Public types ──────────────────────────────────────────────────────────────

/// Scripted behaviour of one `(device, operation)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub device: String,
    pub operation: OperationKind,
    pub replies: Vec<Reply>,
    /// Reply once `replies` is used up.
    pub then: Option<Reply>,
}

/// One thing the demo asks the scheduler to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Enqueue(Operation),
    /// CCCD write followed by the notification toggle.
    Subscribe {
        address: String,
        characteristic: Uuid,
        enable: bool,
        timeout_ms: u64,
    },
    /// Write of a typed value, encoded through the device template.
    WriteValue {
        address: String,
        characteristic: Uuid,
        value: AttributeValue,
        timeout_ms: u64,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scenario {
    pub latency: Duration,
    /// `(device, characteristic, value)` served to reads.
    pub values: Vec<(String, Uuid, Vec<u8>)>,
    pub faults: Vec<Fault>,
    pub steps: Vec<Step>,
}

// ── Parsing helpers ───────────────────────────────────────────────────────────

fn parse_reply(word: &str) -> Result<Reply> {
    let word = word.trim();
    match word {
        "succeed" => return Ok(Reply::Succeed),
        "fail" => return Ok(Reply::Fail(GattStatus::Failure)),
        "ignore" => return Ok(Reply::Ignore),
        "reject" => return Ok(Reply::Reject),
        _ => {}
    }
    let code = word
        .strip_prefix("fail:")
        .ok_or_else(|| anyhow!("unknown reply '{}'", word))?
        .trim();
    let code = match code.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => code.parse::<u16>(),
    }
    .with_context(|| format!("invalid status code in '{}'", word))?;
    Ok(Reply::Fail(GattStatus::from_code(code)))
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits = text.trim().trim_start_matches("0x");
    hex::decode(digits).with_context(|| format!("invalid hex value '{}'", text))
}

impl StepEntry {
    fn characteristic(&self) -> Result<Uuid> {
        let text = self
            .characteristic
            .as_deref()
            .ok_or_else(|| {
                anyhow!("{:?} step for '{}' needs a characteristic", self.op, self.device)
            })?;
        parse_uuid(text)
    }

    fn value(&self) -> Result<Vec<u8>> {
        match &self.value {
            Some(StepValue::Text(text)) => parse_hex(text),
            Some(_) => bail!("{:?} step for '{}' needs a hex string value", self.op, self.device),
            None => bail!("{:?} step for '{}' needs a value", self.op, self.device),
        }
    }

    fn typed_value(&self) -> Result<AttributeValue> {
        match &self.value {
            Some(StepValue::Unsigned(v)) => Ok(AttributeValue::Unsigned(*v)),
            Some(StepValue::Signed(v)) => Ok(AttributeValue::Signed(*v)),
            Some(StepValue::Text(text)) => Ok(AttributeValue::Text(text.clone())),
            None => bail!("{:?} step for '{}' needs a value", self.op, self.device),
        }
    }

    fn into_step(self) -> Result<Step> {
        let action = match self.op {
            StepOp::Connect => Action::Connect,
            StepOp::Disconnect => Action::Disconnect,
            StepOp::Discover => Action::Discover,
            StepOp::Read => Action::Read {
                characteristic: self.characteristic()?,
            },
            StepOp::Write => Action::Write {
                characteristic: self.characteristic()?,
                value: self.value()?,
            },
            StepOp::WriteDescriptor => {
                let descriptor = self
                    .descriptor
                    .as_deref()
                    .ok_or_else(|| {
                        anyhow!("write_descriptor step for '{}' needs a descriptor", self.device)
                    })?;
                Action::WriteDescriptor {
                    characteristic: self.characteristic()?,
                    descriptor: parse_uuid(descriptor)?,
                    value: self.value()?,
                }
            }
            StepOp::SetNotification => Action::SetNotification {
                characteristic: self.characteristic()?,
                enable: self.enable,
            },
            StepOp::Subscribe => {
                return Ok(Step::Subscribe {
                    characteristic: self.characteristic()?,
                    address: self.device,
                    enable: self.enable,
                    timeout_ms: self.timeout_ms,
                })
            }
            StepOp::WriteValue => {
                return Ok(Step::WriteValue {
                    characteristic: self.characteristic()?,
                    value: self.typed_value()?,
                    address: self.device,
                    timeout_ms: self.timeout_ms,
                })
            }
        };
        Ok(Step::Enqueue(
            Operation::new(self.device, action)
                .with_delay_ms(self.delay_ms)
                .with_timeout_ms(self.timeout_ms),
        ))
    }
}

// ── Scenario ──────────────────────────────────────────────────────────────────

impl Scenario {
    /// Parses a scenario file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is invalid, or a
    /// step, fault or value entry is incomplete or malformed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading scenario from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open scenario file: {}", path.display()))?;
        let file: ScenarioFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let values = file
            .values
            .into_iter()
            .map(|v| -> Result<(String, Uuid, Vec<u8>)> {
                Ok((v.device, parse_uuid(&v.characteristic)?, parse_hex(&v.value)?))
            })
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Invalid value entry in {}", path.display()))?;

        let faults = file
            .faults
            .into_iter()
            .map(|f| -> Result<Fault> {
                Ok(Fault {
                    replies: f
                        .replies
                        .iter()
                        .map(|r| parse_reply(r))
                        .collect::<Result<_>>()?,
                    then: f.then.as_deref().map(parse_reply).transpose()?,
                    device: f.device,
                    operation: f.operation,
                })
            })
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Invalid fault entry in {}", path.display()))?;

        let steps = file
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.into_step().with_context(|| format!("step {}", i + 1)))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Invalid step in {}", path.display()))?;

        if steps.is_empty() {
            bail!("scenario {} has no steps", path.display());
        }

        info!(
            steps = steps.len(),
            faults = faults.len(),
            latency_ms = file.latency_ms,
            "Scenario loaded"
        );
        Ok(Self {
            latency: Duration::from_millis(file.latency_ms),
            values,
            faults,
            steps,
        })
    }

    /// Builds a simulated network that behaves as the scenario describes.
    pub fn network(&self) -> SimNetwork {
        let net = SimNetwork::new();
        net.set_latency(self.latency);
        for (device, characteristic, value) in &self.values {
            net.set_value(device, *characteristic, value.clone());
        }
        for fault in &self.faults {
            net.script(&fault.device, fault.operation, fault.replies.iter().copied());
            if let Some(then) = fault.then {
                net.set_default(&fault.device, fault.operation, then);
            }
        }
        net
    }

    /// Every device address the scenario touches, in first-use order.
    pub fn devices(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for step in &self.steps {
            let address = match step {
                Step::Enqueue(op) => op.address.as_str(),
                Step::Subscribe { address, .. } | Step::WriteValue { address, .. } => {
                    address.as_str()
                }
            };
            if !seen.contains(&address) {
                seen.push(address);
            }
        }
        seen
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
