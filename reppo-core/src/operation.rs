//! Operation descriptors and qualified operation names
//!
//! Operations are exposed externally as `<identity>::<operation>`. Both the
//! joining and the splitting are pure functions so the naming rules can be
//! tested without any running worker.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between worker identity and operation name
pub const SEPARATOR: &str = "::";

/// A single callable operation declared by a worker at handshake time
///
/// The input schema is opaque: it is forwarded to callers for discovery
/// and never used to validate arguments locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_input_schema")]
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl OperationDescriptor {
    /// Create a descriptor, defaulting the schema to an empty object schema
    pub fn new<S1: Into<String>, S2: Into<String>>(
        name: S1,
        description: S2,
        input_schema: Option<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: input_schema.unwrap_or_else(default_input_schema),
        }
    }

    /// Reject names that could not be resolved unambiguously once qualified
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("Operation name cannot be empty"));
        }
        if self.name.contains(SEPARATOR) {
            return Err(Error::validation(format!(
                "Operation name '{}' must not contain '{}'",
                self.name, SEPARATOR
            )));
        }
        Ok(())
    }

    /// Qualified name of this operation under the given worker identity
    pub fn qualified_name(&self, identity: &str) -> String {
        qualify(identity, &self.name)
    }
}

/// Build the external name for an operation
pub fn qualify(identity: &str, operation: &str) -> String {
    format!("{}{}{}", identity, SEPARATOR, operation)
}

/// Split a qualified name into `(identity, operation)`
///
/// Splits on the first separator. Names without a separator, with an empty
/// half, or whose operation half contains a further separator are rejected.
pub fn split_qualified(name: &str) -> Result<(&str, &str)> {
    let (identity, operation) = name.split_once(SEPARATOR).ok_or_else(|| {
        Error::validation(format!(
            "'{}' is not a qualified name (expected <identity>{}<operation>)",
            name, SEPARATOR
        ))
    })?;

    if identity.is_empty() || operation.is_empty() {
        return Err(Error::validation(format!(
            "'{}' has an empty identity or operation part",
            name
        )));
    }
    if operation.contains(SEPARATOR) {
        return Err(Error::validation(format!(
            "'{}' is ambiguous: operation part contains '{}'",
            name, SEPARATOR
        )));
    }

    Ok((identity, operation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualify_and_split() {
        let name = qualify("adder", "add");
        assert_eq!(name, "adder::add");
        assert_eq!(split_qualified(&name).unwrap(), ("adder", "add"));
    }

    #[test]
    fn test_same_operation_under_different_identities() {
        let op = OperationDescriptor::new("query", "", None);
        assert_ne!(op.qualified_name("a"), op.qualified_name("b"));
    }

    #[test]
    fn test_split_rejects_malformed_names() {
        assert!(split_qualified("add").unwrap_err().is_validation());
        assert!(split_qualified("::add").is_err());
        assert!(split_qualified("adder::").is_err());
        assert!(split_qualified("adder::add::more").is_err());
        assert!(split_qualified("").is_err());
    }

    #[test]
    fn test_split_keeps_single_colons() {
        assert_eq!(
            split_qualified("db:main::query").unwrap(),
            ("db:main", "query")
        );
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(OperationDescriptor::new("add", "Add", None).validate().is_ok());
        assert!(OperationDescriptor::new("", "", None).validate().is_err());
        assert!(OperationDescriptor::new("a::b", "", None).validate().is_err());
    }

    #[test]
    fn test_descriptor_defaults_schema() {
        let op: OperationDescriptor = serde_json::from_str(r#"{"name":"add"}"#).unwrap();
        assert_eq!(op.description, "");
        assert_eq!(op.input_schema, serde_json::json!({"type": "object"}));
    }
}
