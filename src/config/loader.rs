//! Layered configuration resolution
//!
//! A run configuration is composed in this order, later layers winning:
//!
//! 1. built-in defaults for every optional key;
//! 2. entries of the primary file's `defaults:` list, in order;
//! 3. the primary file itself (or at the `_self_` marker if listed);
//! 4. command-line overrides;
//!
//! and is then interpolated, deserialized into [`RunConfig`] and validated.

use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};

use super::interpolate::resolve_interpolations;
use super::overrides::apply_overrides;
use super::schema::{self, RunConfig};
use super::validate::validate_config;
use crate::error::{Error, Result};

const DEFAULTS_KEY: &str = "defaults";
const SELF_MARKER: &str = "_self_";

/// Where a configuration comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    /// Directory holding the primary file and its defaults
    pub config_dir: PathBuf,
    /// Primary file name without `.yaml`
    pub config_name: String,
    /// Command-line overrides, applied in order
    pub overrides: Vec<String>,
}

impl Default for ConfigSource {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("conf"),
            config_name: "config".to_owned(),
            overrides: Vec::new(),
        }
    }
}

impl ConfigSource {
    /// Source for `<config_dir>/<config_name>.yaml`.
    pub fn new(config_dir: impl Into<PathBuf>, config_name: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
            config_name: config_name.into(),
            overrides: Vec::new(),
        }
    }

    /// Append overrides.
    pub fn with_overrides<I, S>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.overrides.extend(overrides.into_iter().map(Into::into));
        self
    }

    /// Path of the primary config file.
    pub fn primary_path(&self) -> PathBuf {
        self.config_dir.join(with_yaml_extension(&self.config_name))
    }
}

fn with_yaml_extension(name: &str) -> String {
    if name.ends_with(".yaml") || name.ends_with(".yml") {
        name.to_owned()
    } else {
        format!("{name}.yaml")
    }
}

/// Built-in values for every optional key.
fn builtin_defaults() -> Result<Value> {
    let mut map = Mapping::new();
    let mut put = |key: &str, value: Value| {
        map.insert(Value::String(key.to_owned()), value);
    };
    put("val_fraction", Value::from(schema::DEFAULT_VAL_FRACTION));
    put("patch_size", Value::from(schema::DEFAULT_PATCH_SIZE));
    put("accelerator", serde_yaml::to_value(crate::device::Accelerator::default())?);
    put("devices", serde_yaml::to_value(crate::device::Devices::default())?);
    put(
        "float32_matmul_precision",
        serde_yaml::to_value(crate::reproducibility::MatmulPrecision::default())?,
    );
    put("log_every_n_steps", Value::from(schema::DEFAULT_LOG_EVERY_N_STEPS));
    put("num_sanity_val_steps", Value::from(schema::DEFAULT_NUM_SANITY_VAL_STEPS));
    put("min_delta", Value::from(0.0));
    Ok(Value::Mapping(map))
}

fn read_yaml(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(Error::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let text = fs::read_to_string(path)
        .map_err(|e| Error::io(format!("reading config {}", path.display()), e))?;
    let value: Value = serde_yaml::from_str(&text)
        .map_err(|e| Error::config(format!("failed to parse {}: {e}", path.display())))?;
    match value {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        Value::Mapping(_) => Ok(value),
        _ => Err(Error::config(format!(
            "{} must contain a mapping at the top level",
            path.display()
        ))),
    }
}

/// Recursively merge `overlay` into `base`. Mappings merge key by key;
/// anything else is replaced.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// One entry of a `defaults:` list
#[derive(Debug, Clone, PartialEq)]
enum DefaultsEntry {
    SelfMarker,
    File(String),
    Group { group: String, option: Option<String> },
}

fn parse_defaults(list: Value, primary: &Path) -> Result<Vec<DefaultsEntry>> {
    let bad = |what: &str| {
        Error::config(format!(
            "invalid defaults entry in {}: {what}",
            primary.display()
        ))
    };
    let Value::Sequence(items) = list else {
        return Err(bad("'defaults' must be a list"));
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) if s == SELF_MARKER => Ok(DefaultsEntry::SelfMarker),
            Value::String(s) => Ok(DefaultsEntry::File(s)),
            Value::Mapping(map) if map.len() == 1 => {
                let Some((Value::String(group), option)) = map.into_iter().next() else {
                    return Err(bad("group names must be strings"));
                };
                let option = match option {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => Some(
                        serde_yaml::to_string(&other)
                            .map(|s| s.trim().to_owned())
                            .map_err(|e| bad(&e.to_string()))?,
                    ),
                };
                Ok(DefaultsEntry::Group { group, option })
            }
            _ => Err(bad("expected a file name, _self_ or a single `group: option` pair")),
        })
        .collect()
}

fn load_default_file(path: &Path) -> Result<Value> {
    let mut value = read_yaml(path)?;
    if let Value::Mapping(map) = &mut value {
        if map.remove(DEFAULTS_KEY).is_some() {
            return Err(Error::config(format!(
                "{}: nested defaults lists are not supported",
                path.display()
            )));
        }
    }
    Ok(value)
}

/// Compose defaults, files and overrides without interpolating.
pub fn compose(source: &ConfigSource) -> Result<Value> {
    let primary_path = source.primary_path();
    let mut primary = read_yaml(&primary_path)?;

    let defaults = match &mut primary {
        Value::Mapping(map) => map.remove(DEFAULTS_KEY),
        _ => None,
    };
    let entries = match defaults {
        Some(list) => parse_defaults(list, &primary_path)?,
        None => Vec::new(),
    };

    let mut tree = builtin_defaults()?;
    let mut primary = Some(primary);
    for entry in entries {
        match entry {
            DefaultsEntry::SelfMarker => {
                if let Some(own) = primary.take() {
                    merge(&mut tree, own);
                }
            }
            DefaultsEntry::File(name) => {
                let path = source.config_dir.join(with_yaml_extension(&name));
                tracing::debug!("Merging defaults file {}", path.display());
                merge(&mut tree, load_default_file(&path)?);
            }
            DefaultsEntry::Group { group, option: None } => {
                tracing::debug!("Defaults group '{group}' disabled");
            }
            DefaultsEntry::Group {
                group,
                option: Some(option),
            } => {
                let path = source
                    .config_dir
                    .join(&group)
                    .join(with_yaml_extension(&option));
                tracing::debug!("Merging group {group}={option} from {}", path.display());
                let mut wrapped = Mapping::new();
                wrapped.insert(Value::String(group), load_default_file(&path)?);
                merge(&mut tree, Value::Mapping(wrapped));
            }
        }
    }
    if let Some(own) = primary {
        merge(&mut tree, own);
    }

    apply_overrides(&mut tree, &source.overrides)?;
    Ok(tree)
}

/// Compose and interpolate the full configuration tree.
pub fn resolve(source: &ConfigSource) -> Result<Value> {
    resolve_interpolations(&compose(source)?)
}

/// Deserialize and validate an already resolved tree.
pub fn config_from_value(tree: Value) -> Result<RunConfig> {
    let config: RunConfig = serde_yaml::from_value(tree)
        .map_err(|e| Error::config(format!("configuration does not match the run schema: {e}")))?;

    if !config.extra.is_empty() {
        let keys: Vec<&str> = config.extra.keys().map(String::as_str).collect();
        tracing::warn!("Configuration keys not used by the run: {}", keys.join(", "));
    }

    validate_config(&config)?;
    Ok(config)
}

/// Resolve, deserialize and validate a run configuration.
pub fn load_config(source: &ConfigSource) -> Result<RunConfig> {
    let tree = resolve(source)?;
    tracing::debug!("Resolved configuration from {}", source.primary_path().display());
    config_from_value(tree)
}

/// Load a single config file (with its defaults list) and no overrides.
pub fn load_config_file<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
    let path = path.as_ref();
    let config_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let config_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::config(format!("invalid config path {}", path.display())))?;
    load_config(&ConfigSource::new(config_dir, config_name))
}
