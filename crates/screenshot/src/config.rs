//! Declarative YAML button configurations

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

use crate::error::{ScreenshotError, ScreenshotResult};

/// One render configuration of the button widget
///
/// Configurations are read from YAML and never mutated afterwards. The shared
/// test content is merged into a copy of `button` when the render context is
/// built, so it never contributes to the fingerprint or the label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ButtonConfig {
    /// Run only configurations carrying this marker
    #[serde(default, skip_serializing)]
    pub only: bool,

    /// Options passed to the widget factory (style, locale, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<Map<String, Value>>,

    /// Funding eligibility the widget should see
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding_eligibility: Option<Value>,

    /// Wallet state the widget should see
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<Value>,

    /// Remembered funding sources the widget should see
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remembered_funding: Option<Value>,

    /// User agent override; also switches on the mobile viewport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Container sizing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
}

/// Stable baseline identifier derived from a configuration's content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// SHA-256 of a canonical JSON document
    pub fn of_canonical(canonical: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Baseline file name, `<hash>.png`
    pub fn file_name(&self) -> String {
        format!("{}.png", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ButtonConfig {
    /// The configuration as JSON with every object's keys sorted
    pub fn canonical_value(&self) -> ScreenshotResult<Value> {
        Ok(sort_keys(serde_json::to_value(self)?))
    }

    /// Compact canonical JSON, independent of field order in the source
    pub fn canonical_json(&self) -> ScreenshotResult<String> {
        Ok(serde_json::to_string(&self.canonical_value()?)?)
    }

    pub fn fingerprint(&self) -> ScreenshotResult<Fingerprint> {
        Ok(Fingerprint::of_canonical(&self.canonical_json()?))
    }

    /// Human readable `a.b=c, d=e` description, or `base` when empty
    pub fn label(&self) -> ScreenshotResult<String> {
        let mut pairs = Vec::new();
        dotify(&self.canonical_value()?, "", &mut pairs);

        if pairs.is_empty() {
            Ok("base".to_string())
        } else {
            Ok(pairs.join(", "))
        }
    }

    /// Parse a list of configurations from a YAML string
    pub fn list_from_yaml(yaml: &str) -> ScreenshotResult<Vec<Self>> {
        serde_yaml::from_str(yaml).map_err(ScreenshotError::from)
    }

    /// Parse a list of configurations from a YAML file
    pub fn list_from_file(path: &Path) -> ScreenshotResult<Vec<Self>> {
        let content = std::fs::read_to_string(path)?;
        Self::list_from_yaml(&content).map_err(|e| {
            ScreenshotError::ConfigParse(format!("{}: {}", path.display(), e))
        })
    }

    /// Load configurations from a YAML file or from every YAML file in a directory
    ///
    /// Directory entries are visited in file name order so the enumeration is
    /// stable across machines.
    pub fn load_all(path: &Path) -> ScreenshotResult<Vec<Self>> {
        if path.is_file() {
            return Self::list_from_file(path);
        }

        if !path.is_dir() {
            return Err(ScreenshotError::ConfigParse(format!(
                "config path not found: {}",
                path.display()
            )));
        }

        let mut configs = Vec::new();

        for entry in walkdir::WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            configs.extend(Self::list_from_file(entry.path())?);
        }

        Ok(configs)
    }
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

fn dotify(value: &Value, prefix: &str, pairs: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                dotify(child, &format!("{}{}.", prefix, key), pairs);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                dotify(child, &format!("{}{}.", prefix, index), pairs);
            }
        }
        leaf => {
            let key = prefix.trim_end_matches('.');
            let rendered = match leaf {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            pairs.push(format!("{}={}", key, rendered));
        }
    }
}
