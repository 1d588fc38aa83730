//! Command-line overrides of the resolved configuration tree
//!
//! Grammar, one override per argument:
//!
//! | Form | Effect |
//! |---|---|
//! | `key=value` | replace an existing key |
//! | `+key=value` | add a key that must not exist yet |
//! | `++key=value` | set a key whether or not it exists |
//! | `~key` or `~key=value` | delete a key (optionally only if it holds `value`) |
//!
//! Keys are dotted paths into nested mappings (`trainer.max_epochs=5`).
//! Values are parsed as YAML scalars or flow collections, so `3` is an
//! integer, `true` a bool and `[1, 2]` a sequence.

use serde_yaml::{Mapping, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Dotted key path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    /// Parse `a.b.c`. Empty segments are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let segments: Vec<String> = raw.split('.').map(str::to_owned).collect();
        if segments.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::config(format!("invalid key '{raw}' in override")));
        }
        Ok(Self(segments))
    }

    fn parents(&self) -> &[String] {
        &self.0[..self.0.len() - 1]
    }

    fn leaf(&self) -> &str {
        // parse() guarantees at least one segment
        &self.0[self.0.len() - 1]
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// One parsed override
#[derive(Debug, Clone, PartialEq)]
pub enum Override {
    /// `key=value`
    Set { key: KeyPath, value: Value },
    /// `+key=value`
    Add { key: KeyPath, value: Value },
    /// `++key=value`
    Force { key: KeyPath, value: Value },
    /// `~key` / `~key=value`
    Delete { key: KeyPath, value: Option<Value> },
}

/// Parse an override value as YAML, falling back to a plain string.
pub fn parse_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

impl FromStr for Override {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix('~') {
            let (key, value) = match rest.split_once('=') {
                Some((k, v)) => (k, Some(parse_value(v))),
                None => (rest, None),
            };
            return Ok(Self::Delete {
                key: KeyPath::parse(key)?,
                value,
            });
        }

        let (raw_key, raw_value) = s.split_once('=').ok_or_else(|| {
            Error::config(format!(
                "override '{s}' is not of the form key=value, +key=value, ++key=value or ~key"
            ))
        })?;
        let value = parse_value(raw_value);

        if let Some(key) = raw_key.strip_prefix("++") {
            Ok(Self::Force {
                key: KeyPath::parse(key)?,
                value,
            })
        } else if let Some(key) = raw_key.strip_prefix('+') {
            Ok(Self::Add {
                key: KeyPath::parse(key)?,
                value,
            })
        } else {
            Ok(Self::Set {
                key: KeyPath::parse(raw_key)?,
                value,
            })
        }
    }
}

/// Walk to the mapping that holds `key`'s leaf, creating missing
/// intermediate mappings when `create` is set.
fn parent_mapping<'a>(root: &'a mut Value, key: &KeyPath, create: bool) -> Result<&'a mut Mapping> {
    let mut node = root;
    for segment in key.parents() {
        let map = node
            .as_mapping_mut()
            .ok_or_else(|| Error::config(format!("cannot address '{key}': '{segment}' is not inside a mapping")))?;
        if create && !map.contains_key(segment.as_str()) {
            map.insert(Value::String(segment.clone()), Value::Mapping(Mapping::new()));
        }
        node = map.get_mut(segment.as_str()).ok_or_else(|| {
            Error::config(format!(
                "could not override '{key}': no key '{segment}' in config (use +{key}=... to add it)"
            ))
        })?;
    }
    node.as_mapping_mut()
        .ok_or_else(|| Error::config(format!("cannot address '{key}': parent is not a mapping")))
}

impl Override {
    /// Apply this override to `root`.
    pub fn apply(&self, root: &mut Value) -> Result<()> {
        match self {
            Self::Set { key, value } => {
                let map = parent_mapping(root, key, false)?;
                let slot = map.get_mut(key.leaf()).ok_or_else(|| {
                    Error::config(format!(
                        "could not override '{key}': no match in config (use +{key}=... to add it)"
                    ))
                })?;
                *slot = value.clone();
            }
            Self::Add { key, value } => {
                let map = parent_mapping(root, key, true)?;
                if map.contains_key(key.leaf()) {
                    return Err(Error::config(format!(
                        "could not add '{key}': key already exists (use {key}=... or ++{key}=...)"
                    )));
                }
                map.insert(Value::String(key.leaf().to_owned()), value.clone());
            }
            Self::Force { key, value } => {
                let map = parent_mapping(root, key, true)?;
                map.insert(Value::String(key.leaf().to_owned()), value.clone());
            }
            Self::Delete { key, value } => {
                let map = parent_mapping(root, key, false)?;
                match (map.get(key.leaf()), value) {
                    (None, _) => {
                        return Err(Error::config(format!(
                            "could not delete '{key}': no match in config"
                        )));
                    }
                    (Some(current), Some(expected)) if current != expected => {
                        return Err(Error::config(format!(
                            "could not delete '{key}': value does not match"
                        )));
                    }
                    _ => {}
                }
                map.remove(key.leaf());
            }
        }
        Ok(())
    }
}

/// Parse and apply every override in order.
pub fn apply_overrides<S: AsRef<str>>(root: &mut Value, overrides: &[S]) -> Result<()> {
    for raw in overrides {
        let parsed: Override = raw.as_ref().parse()?;
        tracing::debug!("Applying override {}", raw.as_ref());
        parsed.apply(root)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Value {
        serde_yaml::from_str(
            r"
seed: 42
task: Task09_Spleen
trainer:
  max_epochs: 10
notes: scratch
",
        )
        .unwrap()
    }

    #[test]
    fn test_set_existing_key() {
        let mut root = tree();
        apply_overrides(&mut root, &["seed=7"]).unwrap();
        assert_eq!(root["seed"], Value::from(7));
    }

    #[test]
    fn test_set_nested_integer() {
        let mut root = tree();
        apply_overrides(&mut root, &["trainer.max_epochs=3"]).unwrap();
        assert_eq!(root["trainer"]["max_epochs"], Value::from(3));
    }

    #[test]
    fn test_set_unknown_key_is_rejected() {
        let mut root = tree();
        let err = apply_overrides(&mut root, &["num_classes=3"]).unwrap_err();
        assert!(err.to_string().contains("+num_classes"));
    }

    #[test]
    fn test_add_new_key() {
        let mut root = tree();
        apply_overrides(&mut root, &["+num_classes=3", "+extra.depth=2"]).unwrap();
        assert_eq!(root["num_classes"], Value::from(3));
        assert_eq!(root["extra"]["depth"], Value::from(2));
    }

    #[test]
    fn test_add_existing_key_is_rejected() {
        let mut root = tree();
        assert!(apply_overrides(&mut root, &["+seed=1"]).is_err());
    }

    #[test]
    fn test_force_sets_either_way() {
        let mut root = tree();
        apply_overrides(&mut root, &["++seed=1", "++fresh=yes"]).unwrap();
        assert_eq!(root["seed"], Value::from(1));
        assert_eq!(root["fresh"], Value::String("yes".into()));
    }

    #[test]
    fn test_delete_key() {
        let mut root = tree();
        apply_overrides(&mut root, &["~notes"]).unwrap();
        assert!(root.get("notes").is_none());
    }

    #[test]
    fn test_delete_with_mismatched_value() {
        let mut root = tree();
        assert!(apply_overrides(&mut root, &["~notes=other"]).is_err());
        apply_overrides(&mut root, &["~notes=scratch"]).unwrap();
        assert!(root.get("notes").is_none());
    }

    #[test]
    fn test_delete_missing_key() {
        let mut root = tree();
        assert!(apply_overrides(&mut root, &["~missing"]).is_err());
    }

    #[test]
    fn test_values_are_yaml_scalars() {
        assert_eq!(parse_value("0.001"), Value::from(0.001));
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("null"), Value::Null);
        assert_eq!(parse_value("/data/msd"), Value::String("/data/msd".into()));
        assert_eq!(parse_value(""), Value::String(String::new()));
        assert!(parse_value("[1, 2]").is_sequence());
    }

    #[test]
    fn test_malformed_overrides() {
        assert!("seed".parse::<Override>().is_err());
        assert!("a..b=1".parse::<Override>().is_err());
        assert!("=1".parse::<Override>().is_err());
    }

    #[test]
    fn test_value_may_contain_equals() {
        let parsed: Override = "notes=a=b".parse().unwrap();
        assert_eq!(
            parsed,
            Override::Set {
                key: KeyPath::parse("notes").unwrap(),
                value: Value::String("a=b".into()),
            }
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Integer overrides land at the addressed nested key
        #[test]
        fn prop_add_then_set_nested(
            a in "[a-z]{1,8}",
            b in "[a-z]{1,8}",
            first in any::<i64>(),
            second in any::<i64>(),
        ) {
            let mut root = Value::Mapping(Mapping::new());
            apply_overrides(&mut root, &[format!("+{a}.{b}={first}")]).unwrap();
            prop_assert_eq!(&root[a.as_str()][b.as_str()], &Value::from(first));
            apply_overrides(&mut root, &[format!("{a}.{b}={second}")]).unwrap();
            prop_assert_eq!(&root[a.as_str()][b.as_str()], &Value::from(second));
        }
    }
}
