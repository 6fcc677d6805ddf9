/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Device templates: human names for attribute UUIDs.
//!
//! A [`DeviceTemplate`] describes the attribute tree a device of a given name
//! is expected to expose:
//!
//! ```text
//! DeviceTemplate "Thermometer"
//! └── ServiceTemplate "Health Thermometer" (0x1809)
//!     └── CharacteristicTemplate "Temperature Measurement" (0x2a1c, format)
//!         └── DescriptorTemplate "CCCD" (0x2902)
//! ```
//!
//! Templates are built once (from YAML, see [`crate::config`]) and are
//! immutable afterwards.  The builders reject duplicate names or UUIDs at
//! every level.  Lookups never fail: an unknown UUID resolves to an
//! [`AttributeRef`] with no name.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

// ── Errors ────────────────────────────────────────────────────────────────────

/// A template tried to declare the same thing twice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template '{template}' already contains a service named '{name}' or with UUID {uuid}")]
    DuplicateService {
        template: String,
        name: String,
        uuid: Uuid,
    },

    #[error("template '{template}' already contains a characteristic named '{name}' or with UUID {uuid}")]
    DuplicateCharacteristic {
        template: String,
        name: String,
        uuid: Uuid,
    },

    #[error("characteristic '{characteristic}' already contains a descriptor named '{name}' or with UUID {uuid}")]
    DuplicateDescriptor {
        characteristic: String,
        name: String,
        uuid: Uuid,
    },

    #[error("a template named '{0}' is already registered")]
    DuplicateTemplate(String),
}

// ── Values ────────────────────────────────────────────────────────────────────

/// How a characteristic's bytes map to a typed value, both ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFormat {
    #[default]
    Raw,
    Utf8,
    U8,
    U16Le,
    I16Le,
    U32Le,
    I32Le,
}

/// A decoded characteristic value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Bytes(Vec<u8>),
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

impl ValueFormat {
    /// Decode `bytes`.  Returns `None` when the payload is too short for the
    /// format or is not valid UTF-8.  Trailing bytes are ignored.
    pub fn decode(self, bytes: &[u8]) -> Option<AttributeValue> {
        match self {
            ValueFormat::Raw => Some(AttributeValue::Bytes(bytes.to_vec())),
            ValueFormat::Utf8 => std::str::from_utf8(bytes)
                .ok()
                .map(|s| AttributeValue::Text(s.trim_end_matches('\0').to_string())),
            ValueFormat::U8 => bytes.first().map(|&b| AttributeValue::Unsigned(b.into())),
            ValueFormat::U16Le => take::<2>(bytes)
                .map(|b| AttributeValue::Unsigned(u16::from_le_bytes(b).into())),
            ValueFormat::I16Le => {
                take::<2>(bytes).map(|b| AttributeValue::Signed(i16::from_le_bytes(b).into()))
            }
            ValueFormat::U32Le => take::<4>(bytes)
                .map(|b| AttributeValue::Unsigned(u32::from_le_bytes(b).into())),
            ValueFormat::I32Le => {
                take::<4>(bytes).map(|b| AttributeValue::Signed(i32::from_le_bytes(b).into()))
            }
        }
    }

    /// Encode `value` for a write.  Returns `None` when the value's type does
    /// not match the format or the number is out of range.
    pub fn encode(self, value: &AttributeValue) -> Option<Vec<u8>> {
        match (self, value) {
            (ValueFormat::Raw, AttributeValue::Bytes(b)) => Some(b.clone()),
            (ValueFormat::Utf8, AttributeValue::Text(s)) => Some(s.as_bytes().to_vec()),
            (ValueFormat::U8, v) => u8::try_from(integer(v)?).ok().map(|n| vec![n]),
            (ValueFormat::U16Le, v) => u16::try_from(integer(v)?)
                .ok()
                .map(|n| n.to_le_bytes().to_vec()),
            (ValueFormat::I16Le, v) => i16::try_from(integer(v)?)
                .ok()
                .map(|n| n.to_le_bytes().to_vec()),
            (ValueFormat::U32Le, v) => u32::try_from(integer(v)?)
                .ok()
                .map(|n| n.to_le_bytes().to_vec()),
            (ValueFormat::I32Le, v) => i32::try_from(integer(v)?)
                .ok()
                .map(|n| n.to_le_bytes().to_vec()),
            _ => None,
        }
    }
}

fn integer(value: &AttributeValue) -> Option<i128> {
    match value {
        AttributeValue::Unsigned(v) => Some((*v).into()),
        AttributeValue::Signed(v) => Some((*v).into()),
        _ => None,
    }
}

fn take<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
    bytes.get(..N)?.try_into().ok()
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            AttributeValue::Text(s) => write!(f, "{:?}", s),
            AttributeValue::Unsigned(v) => write!(f, "{}", v),
            AttributeValue::Signed(v) => write!(f, "{}", v),
        }
    }
}

// ── Resolved identity ─────────────────────────────────────────────────────────

/// An attribute UUID together with its template name, if one is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRef {
    pub uuid: Uuid,
    pub name: Option<String>,
}

impl AttributeRef {
    pub fn unnamed(uuid: Uuid) -> Self {
        Self { uuid, name: None }
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.uuid),
            None => write!(f, "{}", self.uuid),
        }
    }
}

// ── Tree nodes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorTemplate {
    pub name: String,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicTemplate {
    pub name: String,
    pub uuid: Uuid,
    pub format: ValueFormat,
    descriptors: Vec<DescriptorTemplate>,
}

impl CharacteristicTemplate {
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            uuid,
            format: ValueFormat::Raw,
            descriptors: Vec::new(),
        }
    }

    pub fn with_format(mut self, format: ValueFormat) -> Self {
        self.format = format;
        self
    }

    /// Adds a descriptor, rejecting a duplicate name or UUID.
    pub fn with_descriptor(
        mut self,
        name: impl Into<String>,
        uuid: Uuid,
    ) -> Result<Self, TemplateError> {
        let name = name.into();
        if self.descriptors.iter().any(|d| d.name == name || d.uuid == uuid) {
            return Err(TemplateError::DuplicateDescriptor {
                characteristic: self.name,
                name,
                uuid,
            });
        }
        self.descriptors.push(DescriptorTemplate { name, uuid });
        Ok(self)
    }

    pub fn descriptor(&self, uuid: Uuid) -> Option<&DescriptorTemplate> {
        self.descriptors.iter().find(|d| d.uuid == uuid)
    }

    pub fn descriptors(&self) -> &[DescriptorTemplate] {
        &self.descriptors
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTemplate {
    pub name: String,
    pub uuid: Uuid,
    characteristics: Vec<CharacteristicTemplate>,
}

impl ServiceTemplate {
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            uuid,
            characteristics: Vec::new(),
        }
    }

    pub fn characteristics(&self) -> &[CharacteristicTemplate] {
        &self.characteristics
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicTemplate> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }

    fn clashes_with(&self, name: &str, uuid: Uuid) -> bool {
        self.characteristics
            .iter()
            .any(|c| c.name == name || c.uuid == uuid)
    }
}

/// Attribute tree for one kind of device, keyed by device name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTemplate {
    pub name: String,
    services: Vec<ServiceTemplate>,
}

impl DeviceTemplate {
    pub fn builder(name: impl Into<String>) -> DeviceTemplateBuilder {
        DeviceTemplateBuilder {
            template: DeviceTemplate {
                name: name.into(),
                services: Vec::new(),
            },
        }
    }

    pub fn services(&self) -> &[ServiceTemplate] {
        &self.services
    }

    pub fn service(&self, uuid: Uuid) -> Option<&ServiceTemplate> {
        self.services.iter().find(|s| s.uuid == uuid)
    }

    /// Searches every service for `uuid`.
    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicTemplate> {
        self.services.iter().find_map(|s| s.characteristic(uuid))
    }
}

// ── Builders ──────────────────────────────────────────────────────────────────

/// Checked builder for [`DeviceTemplate`].
///
/// Characteristic names and UUIDs must be unique across the whole template,
/// not just within one service, so that a bare UUID resolves unambiguously.
#[derive(Debug)]
pub struct DeviceTemplateBuilder {
    template: DeviceTemplate,
}

impl DeviceTemplateBuilder {
    /// Starts a new, empty service.
    pub fn service(
        self,
        name: impl Into<String>,
        uuid: Uuid,
    ) -> Result<ServiceBuilder, TemplateError> {
        let name = name.into();
        if self
            .template
            .services
            .iter()
            .any(|s| s.name == name || s.uuid == uuid)
        {
            return Err(TemplateError::DuplicateService {
                template: self.template.name,
                name,
                uuid,
            });
        }
        Ok(ServiceBuilder {
            parent: self,
            service: ServiceTemplate::new(name, uuid),
        })
    }

    pub fn build(self) -> DeviceTemplate {
        self.template
    }
}

/// Builder for one service inside a [`DeviceTemplateBuilder`].
#[derive(Debug)]
pub struct ServiceBuilder {
    parent: DeviceTemplateBuilder,
    service: ServiceTemplate,
}

impl ServiceBuilder {
    pub fn characteristic(
        mut self,
        characteristic: CharacteristicTemplate,
    ) -> Result<Self, TemplateError> {
        let clash = self.service.clashes_with(&characteristic.name, characteristic.uuid)
            || self
                .parent
                .template
                .services
                .iter()
                .any(|s| s.clashes_with(&characteristic.name, characteristic.uuid));
        if clash {
            return Err(TemplateError::DuplicateCharacteristic {
                template: self.parent.template.name,
                name: characteristic.name,
                uuid: characteristic.uuid,
            });
        }
        self.service.characteristics.push(characteristic);
        Ok(self)
    }

    /// Closes the service and returns to the device builder.
    pub fn done(mut self) -> DeviceTemplateBuilder {
        self.parent.template.services.push(self.service);
        self.parent
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// All known templates, keyed by device name.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, DeviceTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, template: DeviceTemplate) -> Result<(), TemplateError> {
        if self.templates.contains_key(&template.name) {
            return Err(TemplateError::DuplicateTemplate(template.name));
        }
        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    pub fn get(&self, device_name: &str) -> Option<&DeviceTemplate> {
        self.templates.get(device_name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    fn characteristic(
        &self,
        device_name: Option<&str>,
        uuid: Uuid,
    ) -> Option<&CharacteristicTemplate> {
        self.get(device_name?)?.characteristic(uuid)
    }

    pub fn resolve_characteristic(&self, device_name: Option<&str>, uuid: Uuid) -> AttributeRef {
        AttributeRef {
            uuid,
            name: self
                .characteristic(device_name, uuid)
                .map(|c| c.name.clone()),
        }
    }

    /// Descriptor lookup is scoped to its characteristic.
    pub fn resolve_descriptor(
        &self,
        device_name: Option<&str>,
        characteristic: Option<Uuid>,
        uuid: Uuid,
    ) -> AttributeRef {
        let name = characteristic
            .and_then(|c| self.characteristic(device_name, c))
            .and_then(|c| c.descriptor(uuid))
            .map(|d| d.name.clone());
        AttributeRef { uuid, name }
    }

    /// Decodes `payload` with the characteristic's declared format.
    ///
    /// Returns `None` when the characteristic is unknown or declares `raw`.
    pub fn decode(
        &self,
        device_name: Option<&str>,
        uuid: Uuid,
        payload: &[u8],
    ) -> Option<AttributeValue> {
        match self.characteristic(device_name, uuid)?.format {
            ValueFormat::Raw => None,
            format => format.decode(payload),
        }
    }

    /// Encodes `value` for a write to `uuid`.
    ///
    /// Without a template for the characteristic only raw bytes pass.
    pub fn encode(
        &self,
        device_name: Option<&str>,
        uuid: Uuid,
        value: &AttributeValue,
    ) -> Option<Vec<u8>> {
        let format = self
            .characteristic(device_name, uuid)
            .map_or(ValueFormat::Raw, |c| c.format);
        format.encode(value)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
