//! Name-keyed tables of what a device can do.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;
use xmltree::Element;

use crate::errors::SonyError;
use crate::xml_path::attribute;

/// One named thing a device advertises: an action of the action list, a
/// remote-control button or a DIAL application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub name: String,
    pub url: Option<String>,
    /// Only meaningful on `register`: the registration dialect.
    pub mode: Option<u8>,
    pub kind: Option<String>,
    /// Opaque payload: an IRCC code or a JSON-RPC method name.
    pub value: Option<String>,
    pub identifier: Option<String>,
}

/// A remote-control button. Its `value` is the IRCC code sent verbatim.
pub type CommandRecord = CapabilityRecord;

impl CapabilityRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_mode(mut self, mode: u8) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Maps the attributes of an `<action>` or `<command>` element.
    ///
    /// Returns `None` when the element has no `name`.
    pub fn from_element(element: &Element) -> Option<Self> {
        let name = attribute(element, "name")?.trim();
        if name.is_empty() {
            return None;
        }

        let mode = attribute(element, "mode").and_then(|m| match m.trim().parse::<u8>() {
            Ok(mode) => Some(mode),
            Err(_) => {
                warn!(name, mode = m, "Ignoring non numeric mode attribute");
                None
            }
        });

        Some(Self {
            name: name.to_string(),
            url: attribute(element, "url").map(str::to_string),
            mode,
            kind: attribute(element, "type").map(str::to_string),
            value: attribute(element, "value").map(str::to_string),
            identifier: attribute(element, "id").map(str::to_string),
        })
    }

    /// Maps one entry of a JSON-RPC result array.
    pub fn from_json(entry: &serde_json::Value) -> Option<Self> {
        let text = |key: &str| entry.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let name = text("name").filter(|n| !n.is_empty())?;

        Some(Self {
            name,
            url: text("url"),
            mode: entry
                .get("mode")
                .and_then(|v| v.as_u64())
                .and_then(|m| u8::try_from(m).ok()),
            kind: text("type"),
            value: text("value"),
            identifier: text("id"),
        })
    }
}

/// Actions, commands and applications of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRegistry {
    actions: BTreeMap<String, CapabilityRecord>,
    commands: BTreeMap<String, CommandRecord>,
    apps: BTreeMap<String, CapabilityRecord>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an action, keyed by its name.
    pub fn register(&mut self, capability: CapabilityRecord) {
        self.actions.insert(capability.name.clone(), capability);
    }

    pub fn get(&self, name: &str) -> Result<&CapabilityRecord, SonyError> {
        self.actions
            .get(name)
            .ok_or_else(|| SonyError::missing_capability(name))
    }

    pub fn actions(&self) -> &BTreeMap<String, CapabilityRecord> {
        &self.actions
    }

    pub fn insert_command(&mut self, command: CommandRecord) {
        self.commands.insert(command.name.clone(), command);
    }

    pub fn command(&self, name: &str) -> Result<&CommandRecord, SonyError> {
        self.commands
            .get(name)
            .ok_or_else(|| SonyError::unknown_command(name))
    }

    pub fn commands(&self) -> &BTreeMap<String, CommandRecord> {
        &self.commands
    }

    pub fn insert_app(&mut self, app: CapabilityRecord) {
        self.apps.insert(app.name.clone(), app);
    }

    pub fn app(&self, name: &str) -> Result<&CapabilityRecord, SonyError> {
        self.apps
            .get(name)
            .ok_or_else(|| SonyError::missing_capability(name))
    }

    pub fn apps(&self) -> &BTreeMap<String, CapabilityRecord> {
        &self.apps
    }

    /// Mode of the `register` action, absent meaning the no-auth dialect.
    pub fn register_mode(&self) -> Option<u8> {
        self.actions.get("register").map(|r| r.mode.unwrap_or(0))
    }

    pub fn has_actions(&self) -> bool {
        !self.actions.is_empty()
    }

    pub fn has_commands(&self) -> bool {
        !self.commands.is_empty()
    }
}
