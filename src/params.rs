use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde_json::{Map, Value as JValue};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    #[error("Parameter [{name}] not set.\n Caller ID: [{caller_id}] Resolved name: [{resolved}]")]
    NotSet {
        name: String,
        caller_id: String,
        resolved: String,
    },
    #[error("Parameter [{resolved}] is invalid: expected {expected}, got {value}")]
    Invalid {
        resolved: String,
        expected: String,
        value: String,
    },
}

/// The private parameters of a test node. Names are given without the `~`
/// prefix; they resolve to `/<node>/<name>`.
#[derive(Clone, Debug)]
pub struct Params {
    node_name: String,
    values: Map<String, JValue>,
}

impl Params {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into().trim_start_matches('/').to_string(),
            values: Map::new(),
        }
    }

    /// Parse a JSON5 mapping of parameter names to values.
    pub fn from_json5_str(node_name: impl Into<String>, text: &str) -> anyhow::Result<Self> {
        let mut params = Self::new(node_name);
        let parsed: JValue = serde_json5::from_str(text).context("Parameters are not valid JSON5")?;
        let JValue::Object(values) = parsed else {
            return Err(anyhow!("Parameters must be a mapping of names to values"));
        };
        for (name, value) in values {
            params.set(&name, value);
        }
        Ok(params)
    }

    pub fn from_file(node_name: impl Into<String>, path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading test parameters");
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Parameter file {} could not be read", path.display()))?;
        Self::from_json5_str(node_name, &text)
            .with_context(|| format!("Parameter file {} could not be parsed", path.display()))
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn set(&mut self, name: &str, value: JValue) {
        let name = name.trim_start_matches('~').to_string();
        debug!(%name, %value, "Setting parameter");
        self.values.insert(name, value);
    }

    /// Apply a `name=value` override. The value is read as JSON5 and taken
    /// as a plain string when it does not parse.
    pub fn apply_override(&mut self, assignment: &str) -> anyhow::Result<()> {
        let (name, raw) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("Parameter override [{}] is not of the form name=value", assignment))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("Parameter override [{}] has an empty name", assignment));
        }
        let value = serde_json5::from_str::<JValue>(raw)
            .unwrap_or_else(|_| JValue::String(raw.to_string()));
        self.set(name, value);
        Ok(())
    }

    pub fn caller_id(&self) -> String {
        format!("/{}", self.node_name)
    }

    pub fn resolve_name(&self, name: &str) -> String {
        format!("/{}/{}", self.node_name, name.trim_start_matches('~'))
    }

    pub fn get(&self, name: &str) -> Result<&JValue, ParamError> {
        self.values.get(name).ok_or_else(|| ParamError::NotSet {
            name: name.to_string(),
            caller_id: self.caller_id(),
            resolved: self.resolve_name(name),
        })
    }

    pub fn get_opt(&self, name: &str) -> Option<&JValue> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    fn invalid(&self, name: &str, expected: &str, value: &JValue) -> ParamError {
        ParamError::Invalid {
            resolved: self.resolve_name(name),
            expected: expected.to_string(),
            value: value.to_string(),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<String, ParamError> {
        let value = self.get(name)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.invalid(name, "a string", value))
    }

    /// A required parameter holding a mapping, possibly empty.
    pub fn get_mapping(&self, name: &str) -> Result<&JValue, ParamError> {
        let value = self.get(name)?;
        if value.is_object() {
            Ok(value)
        } else {
            Err(self.invalid(name, "a mapping", value))
        }
    }

    /// An optional duration given in seconds, as an integer or a float.
    pub fn get_duration_opt(&self, name: &str) -> Result<Option<Duration>, ParamError> {
        let Some(value) = self.get_opt(name) else {
            return Ok(None);
        };
        value
            .as_f64()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .map(Some)
            .ok_or_else(|| self.invalid(name, "a non-negative number of seconds", value))
    }

    pub fn get_duration_or(&self, name: &str, default: Duration) -> Result<Duration, ParamError> {
        Ok(self.get_duration_opt(name)?.unwrap_or(default))
    }

    /// An optional mapping of names to strings, such as `topic_types`.
    pub fn get_string_map(&self, name: &str) -> Result<BTreeMap<String, String>, ParamError> {
        let Some(value) = self.get_opt(name) else {
            return Ok(BTreeMap::new());
        };
        let JValue::Object(map) = value else {
            return Err(self.invalid(name, "a mapping of names to strings", value));
        };
        map.iter()
            .map(|(k, v)| match v.as_str() {
                Some(s) => Ok((k.clone(), s.to_string())),
                None => Err(self.invalid(name, "a mapping of names to strings", value)),
            })
            .collect()
    }
}

/// Whether a parameter value counts as set to something: null, empty
/// strings, empty lists and empty mappings do not.
pub fn is_truthy(value: &JValue) -> bool {
    match value {
        JValue::Null => false,
        JValue::Bool(b) => *b,
        JValue::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        JValue::String(s) => !s.is_empty(),
        JValue::Array(a) => !a.is_empty(),
        JValue::Object(m) => !m.is_empty(),
    }
}
