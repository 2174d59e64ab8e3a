//! Object and resource definitions.
//!
//! The JSON layout is the one used by the OMA registry dumps:
//!
//! ```json
//! { "id": 3, "name": "Device", "instancetype": "single", "mandatory": true,
//!   "description": "...", "resourcedefs": [
//!     { "id": 0, "name": "Manufacturer", "operations": "R",
//!       "instancetype": "single", "mandatory": false, "type": "string",
//!       "range": "", "units": "", "description": "..." } ] }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceType {
    Single,
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operations {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "W")]
    Write,
    #[serde(rename = "RW")]
    ReadWrite,
    #[serde(rename = "E")]
    Execute,
}

impl Operations {
    pub fn is_readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    pub fn is_executable(self) -> bool {
        self == Self::Execute
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    String,
    Integer,
    #[serde(rename = "unsigned integer", alias = "unsigned")]
    Unsigned,
    Float,
    Boolean,
    Opaque,
    Time,
    Objlnk,
    /// Executable resources carry no value.
    #[serde(rename = "", alias = "none")]
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub id: u16,
    pub name: String,
    pub operations: Operations,
    pub instancetype: InstanceType,
    pub mandatory: bool,
    #[serde(rename = "type")]
    pub kind: ResourceType,
    #[serde(default)]
    pub range: String,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDefinition {
    pub id: u16,
    pub name: String,
    pub instancetype: InstanceType,
    pub mandatory: bool,
    #[serde(default)]
    pub description: String,
    pub resourcedefs: Vec<ResourceDefinition>,
}

impl ObjectDefinition {
    pub fn resource(&self, id: u16) -> Option<&ResourceDefinition> {
        self.resourcedefs.iter().find(|r| r.id == id)
    }

    /// Checks the definition is usable for decoding.
    pub fn check(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("object name is empty".to_string());
        }

        let mut seen = HashSet::new();
        for resource in &self.resourcedefs {
            if !seen.insert(resource.id) {
                return Err(format!("resource {} is defined twice", resource.id));
            }
            if resource.operations.is_executable() != (resource.kind == ResourceType::None) {
                return Err(format!(
                    "resource {} mixes executable operations with a value type",
                    resource.id
                ));
            }
        }
        Ok(())
    }
}

/// A definitions file holds either one object or an array of them.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum DefinitionFile {
    Many(Vec<ObjectDefinition>),
    One(Box<ObjectDefinition>),
}

impl DefinitionFile {
    pub(crate) fn into_vec(self) -> Vec<ObjectDefinition> {
        match self {
            Self::Many(objects) => objects,
            Self::One(object) => vec![*object],
        }
    }
}
