//! Plugin interface descriptors.
//!
//! An interface descriptor is a JSON file named after the interface identifier a plugin
//! exports (`client-interface.json`, `service-interface.json`) listing the operations every
//! plugin of that interface must provide:
//!
//! ```json
//! { "functions": ["send", "subscribe", "unsubscribe", "receive", "done"] }
//! ```

use crate::error::{PluginError, PluginResult};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// Upper bound on the number of functions an interface may declare.
pub const MAX_FUNCTIONS: usize = 128;

/// Parsed interface descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    functions: Vec<String>,
}

impl InterfaceDescriptor {
    /// Parses a descriptor document.
    ///
    /// Rejects documents that are not an object, lack a non-empty `functions` array, declare
    /// more than [`MAX_FUNCTIONS`] entries, contain non-string entries or repeat a name.
    pub fn parse(json: &str) -> PluginResult<Self> {
        let document: Value = serde_json::from_str(json)
            .map_err(|e| PluginError::InvalidInterface(e.to_string()))?;

        let object = document
            .as_object()
            .ok_or_else(|| PluginError::InvalidInterface("descriptor is not an object".to_string()))?;

        let functions = object
            .get("functions")
            .ok_or_else(|| PluginError::InvalidInterface("missing 'functions'".to_string()))?
            .as_array()
            .ok_or_else(|| PluginError::InvalidInterface("'functions' is not an array".to_string()))?;

        if functions.is_empty() {
            return Err(PluginError::InvalidInterface(
                "'functions' is empty".to_string(),
            ));
        }
        if functions.len() > MAX_FUNCTIONS {
            return Err(PluginError::InvalidInterface(format!(
                "'functions' has {} entries, at most {} are allowed",
                functions.len(),
                MAX_FUNCTIONS
            )));
        }

        let mut seen = HashSet::with_capacity(functions.len());
        let mut names = Vec::with_capacity(functions.len());
        for (index, entry) in functions.iter().enumerate() {
            let name = entry.as_str().ok_or_else(|| {
                PluginError::InvalidInterface(format!("'functions[{index}]' is not a string"))
            })?;
            if !seen.insert(name) {
                return Err(PluginError::InvalidInterface(format!(
                    "'{name}' is declared more than once"
                )));
            }
            names.push(name.to_string());
        }

        Ok(Self { functions: names })
    }

    /// Reads and parses a descriptor file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> PluginResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents).map_err(|e| match e {
            PluginError::InvalidInterface(reason) => {
                PluginError::InvalidInterface(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })
    }

    /// Declared operation names, in document order.
    pub fn functions(&self) -> &[String] {
        &self.functions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid(json: &str) -> String {
        match InterfaceDescriptor::parse(json) {
            Err(PluginError::InvalidInterface(reason)) => reason,
            other => panic!("expected invalid interface, got {other:?}"),
        }
    }

    #[test]
    fn test_parse() {
        let descriptor =
            InterfaceDescriptor::parse(r#"{ "functions": ["send", "receive", "done"] }"#).unwrap();
        assert_eq!(descriptor.functions(), &["send", "receive", "done"]);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(invalid("[]").contains("not an object"));
        assert!(invalid("{}").contains("missing"));
        assert!(invalid(r#"{ "functions": "send" }"#).contains("not an array"));
        assert!(invalid(r#"{ "functions": [] }"#).contains("empty"));
        assert!(invalid(r#"{ "functions": ["send", 3] }"#).contains("functions[1]"));
        assert!(invalid(r#"{ "functions": ["send", "send"] }"#).contains("more than once"));
        invalid("{ functions");
    }

    #[test]
    fn test_rejects_oversized() {
        let names: Vec<String> = (0..=MAX_FUNCTIONS).map(|i| format!("\"f{i}\"")).collect();
        let json = format!(r#"{{ "functions": [{}] }}"#, names.join(","));
        assert!(invalid(&json).contains("at most"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client-interface.json");
        std::fs::write(&path, r#"{ "functions": [] }"#).unwrap();
        let err = InterfaceDescriptor::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("client-interface.json"));
    }
}
