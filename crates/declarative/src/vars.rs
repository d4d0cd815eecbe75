//! Variable context supplied once at compile time

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Why a variable reference could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    Missing {
        variable: String,
    },
    Mismatch {
        variable: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// A type that can be extracted from a variable value
pub trait FromVariable: Sized {
    /// Name of the expected type, used in error messages
    const EXPECTED: &'static str;

    fn from_variable(value: &Value) -> Option<Self>;
}

impl FromVariable for u32 {
    const EXPECTED: &'static str = "unsigned 32-bit integer";

    fn from_variable(value: &Value) -> Option<Self> {
        value.as_u64().and_then(|n| u32::try_from(n).ok())
    }
}

impl FromVariable for String {
    const EXPECTED: &'static str = "string";

    fn from_variable(value: &Value) -> Option<Self> {
        value.as_str().map(ToString::to_string)
    }
}

impl FromVariable for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_variable(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromVariable for Value {
    const EXPECTED: &'static str = "any value";

    fn from_variable(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

/// Human-readable name of a JSON value's type
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_u64() => "unsigned integer",
        Value::Number(n) if n.is_i64() => "negative integer",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "table",
    }
}

/// Named values referenced by resource specs
///
/// Ordered so that rendering and reporting are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableContext {
    values: BTreeMap<String, Value>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a variable
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Look up a variable and convert it to the expected type
    pub fn get_as<T: FromVariable>(&self, name: &str) -> Result<T, ResolveError> {
        let value = self.values.get(name).ok_or_else(|| ResolveError::Missing {
            variable: name.to_string(),
        })?;

        T::from_variable(value).ok_or_else(|| ResolveError::Mismatch {
            variable: name.to_string(),
            expected: T::EXPECTED,
            found: type_name(value),
        })
    }

    /// Overlay another context; its values win
    pub fn merge(&mut self, other: VariableContext) {
        self.values.extend(other.values);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}

impl FromIterator<(String, Value)> for VariableContext {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, Value>> for VariableContext {
    fn from(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_as_u32() {
        let mut vars = VariableContext::new();
        vars.insert("radio_bridge_uid_gid", 900);
        assert_eq!(vars.get_as::<u32>("radio_bridge_uid_gid"), Ok(900));
    }

    #[test]
    fn test_get_as_missing() {
        let vars = VariableContext::new();
        assert_eq!(
            vars.get_as::<u32>("uid"),
            Err(ResolveError::Missing {
                variable: "uid".to_string()
            })
        );
    }

    #[test]
    fn test_get_as_type_mismatch() {
        let mut vars = VariableContext::new();
        vars.insert("uid", "nine hundred");
        vars.insert("negative", -1);
        vars.insert("huge", u64::from(u32::MAX) + 1);

        assert_eq!(
            vars.get_as::<u32>("uid"),
            Err(ResolveError::Mismatch {
                variable: "uid".to_string(),
                expected: "unsigned 32-bit integer",
                found: "string",
            })
        );
        assert!(matches!(
            vars.get_as::<u32>("negative"),
            Err(ResolveError::Mismatch { found: "negative integer", .. })
        ));
        assert!(vars.get_as::<u32>("huge").is_err());
    }

    #[test]
    fn test_merge_overrides() {
        let mut base = VariableContext::new();
        base.insert("a", 1);
        base.insert("b", 2);

        let mut overrides = VariableContext::new();
        overrides.insert("b", 3);

        base.merge(overrides);
        assert_eq!(base.get("a"), Some(&Value::from(1)));
        assert_eq!(base.get("b"), Some(&Value::from(3)));
    }
}
