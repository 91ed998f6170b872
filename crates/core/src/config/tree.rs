// Layered configuration tree
use crate::error::ConfigError;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Merged configuration of one run
///
/// Fragments are folded left to right: mappings merge key by key, scalars
/// and sequences are replaced wholesale. Replacing a mapping with anything
/// else is a type conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    root: Value,
    sources: Vec<String>,
}

impl Configuration {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
            sources: Vec::new(),
        }
    }

    /// Build a configuration from a single mapping
    pub fn from_value(origin: impl Into<String>, value: Value) -> Result<Self, ConfigError> {
        let mut config = Self::new();
        config.merge(origin, value)?;
        Ok(config)
    }

    /// Merge fragments in order
    pub fn from_fragments<I, S>(fragments: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let mut config = Self::new();
        for (origin, fragment) in fragments {
            config.merge(origin, fragment)?;
        }
        Ok(config)
    }

    /// Merge one fragment on top of this configuration
    pub fn merge(&mut self, origin: impl Into<String>, fragment: Value) -> Result<(), ConfigError> {
        let origin = origin.into();
        let fragment = match fragment {
            Value::Null => Value::Object(Map::new()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(ConfigError::malformed(
                    origin,
                    format!("top level must be a mapping, found {}", kind_of(&other)),
                ));
            }
        };

        let mut path = Vec::new();
        merge_value(&mut self.root, fragment, &mut path, &origin)?;
        self.sources.push(origin);
        Ok(())
    }

    /// Merge another configuration on top of this one
    pub fn merged(mut self, other: &Configuration) -> Result<Self, ConfigError> {
        let origin = other.sources.join(",");
        self.merge(origin, other.root.clone())?;
        Ok(self)
    }

    /// Dotted-path lookup, e.g. `use_case.product_id`
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.root, |node, segment| node.as_object()?.get(segment))
    }

    /// Dotted-path lookup of a string value
    pub fn lookup_str(&self, path: &str) -> Option<&str> {
        self.lookup(path).and_then(Value::as_str)
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Origins of the merged fragments, in merge order
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// SHA-256 of the canonical (key-sorted) JSON form
    pub fn fingerprint(&self) -> String {
        let canonical = canonicalize(&self.root);
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_value(
    base: &mut Value,
    incoming: Value,
    path: &mut Vec<String>,
    origin: &str,
) -> Result<(), ConfigError> {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                path.push(key.clone());
                match base_map.get_mut(&key) {
                    Some(existing) => merge_value(existing, value, path, origin)?,
                    None => {
                        base_map.insert(key, value);
                    }
                }
                path.pop();
            }
            Ok(())
        }
        (Value::Object(_), other) => Err(ConfigError::type_conflict(
            path.join("."),
            origin,
            format!("cannot replace a mapping with {}", kind_of(&other)),
        )),
        (slot, other) => {
            *slot = other;
            Ok(())
        }
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
