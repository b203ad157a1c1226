//! Plugin manifests: what a plugin is, which operations it exposes and which
//! host capabilities it may use.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::PluginError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Http,
    Secrets,
    Storage,
    Kb,
    Auth,
    Cache,
    Log,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Http => "http",
            Capability::Secrets => "secrets",
            Capability::Storage => "storage",
            Capability::Kb => "kb",
            Capability::Auth => "auth",
            Capability::Cache => "cache",
            Capability::Log => "log",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema for `params`. `None` accepts anything.
    #[serde(default)]
    pub input_schema: Option<Value>,
    /// JSON Schema for the returned data. `None` accepts anything.
    #[serde(default)]
    pub output_schema: Option<Value>,
    /// Whether a scheduled feed may run this operation.
    #[serde(default)]
    pub feed_allowed: bool,
}

impl OperationSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: None,
            output_schema: None,
            feed_allowed: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn feed_allowed(mut self, allowed: bool) -> Self {
        self.feed_allowed = allowed;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    pub operations: Vec<OperationSpec>,
}

impl PluginManifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            capabilities: Vec::new(),
            operations: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    pub fn with_operation(mut self, operation: OperationSpec) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn operation(&self, name: &str) -> Option<&OperationSpec> {
        self.operations.iter().find(|op| op.name == name)
    }

    pub fn declares(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Reject empty names, duplicate operations and schemas that do not compile.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.name.trim().is_empty() {
            return Err(PluginError::InvalidManifest(
                "plugin name must not be empty".to_string(),
            ));
        }
        if self.version.trim().is_empty() {
            return Err(PluginError::InvalidManifest(format!(
                "plugin '{}' has an empty version",
                self.name
            )));
        }
        if self.operations.is_empty() {
            return Err(PluginError::InvalidManifest(format!(
                "plugin '{}' declares no operations",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for op in &self.operations {
            if op.name.trim().is_empty() {
                return Err(PluginError::InvalidManifest(format!(
                    "plugin '{}' has an operation with an empty name",
                    self.name
                )));
            }
            if !seen.insert(op.name.as_str()) {
                return Err(PluginError::InvalidManifest(format!(
                    "plugin '{}' declares operation '{}' twice",
                    self.name, op.name
                )));
            }
            for (kind, schema) in [("input", &op.input_schema), ("output", &op.output_schema)] {
                if let Some(schema) = schema {
                    CompiledSchema::compile(schema).map_err(|e| {
                        PluginError::InvalidManifest(format!(
                            "operation '{}' has an invalid {} schema: {}",
                            op.name, kind, e
                        ))
                    })?;
                }
            }
        }
        Ok(())
    }
}

/// A compiled JSON Schema, shareable across executions.
#[derive(Clone)]
pub struct CompiledSchema(Arc<jsonschema::Validator>);

impl CompiledSchema {
    pub fn compile(schema: &Value) -> Result<Self, String> {
        jsonschema::validator_for(schema)
            .map(|v| Self(Arc::new(v)))
            .map_err(|e| e.to_string())
    }

    /// Every violation, formatted with the offending instance path.
    pub fn check(&self, instance: &Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .0
            .iter_errors(instance)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{} at {}", e, path)
                }
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompiledSchema")
    }
}
