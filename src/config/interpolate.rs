//! String interpolation over the composed configuration tree
//!
//! Supported expressions:
//! - `${key}` / `${a.b.c}`: value of another key, resolved recursively.
//!   A string that is exactly one reference takes the referenced value's
//!   type; references embedded in longer strings are stringified.
//! - `${oc.env:VAR}` / `${oc.env:VAR,default}`: environment variable.
//!
//! Nested expressions (`${a.${b}}`) are not supported.

use regex::Regex;
use serde_yaml::{Mapping, Value};

use super::overrides::parse_value;
use crate::error::{Error, Result};

const ENV_PREFIX: &str = "oc.env:";

struct Resolver<'a> {
    root: &'a Value,
    whole: Regex,
    embedded: Regex,
}

/// Resolve every interpolation in `root`, returning a new tree.
pub fn resolve_interpolations(root: &Value) -> Result<Value> {
    let resolver = Resolver::new(root)?;
    resolver.node(root, &mut Vec::new())
}

/// Look up a dotted key, indexing sequences by position.
pub fn lookup<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(root, |node, segment| match node {
        Value::Mapping(map) => map.get(segment),
        Value::Sequence(seq) => segment.parse::<usize>().ok().and_then(|i| seq.get(i)),
        _ => None,
    })
}

fn stringify(expr: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok("null".to_owned()),
        _ => Err(Error::config(format!(
            "'${{{expr}}}' refers to a collection and cannot be embedded in a string"
        ))),
    }
}

impl<'a> Resolver<'a> {
    fn new(root: &'a Value) -> Result<Self> {
        let compile =
            |pattern: &str| Regex::new(pattern).map_err(|e| Error::config(format!("interpolation pattern: {e}")));
        Ok(Self {
            root,
            whole: compile(r"^\$\{([^${}]+)\}$")?,
            embedded: compile(r"\$\{([^${}]+)\}")?,
        })
    }

    fn node(&self, node: &Value, stack: &mut Vec<String>) -> Result<Value> {
        match node {
            Value::String(s) => self.string(s, stack),
            Value::Sequence(items) => items
                .iter()
                .map(|item| self.node(item, stack))
                .collect::<Result<Vec<_>>>()
                .map(Value::Sequence),
            Value::Mapping(map) => {
                let mut out = Mapping::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.node(v, stack)?);
                }
                Ok(Value::Mapping(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn string(&self, s: &str, stack: &mut Vec<String>) -> Result<Value> {
        if let Some(caps) = self.whole.captures(s) {
            return self.expression(&caps[1], stack);
        }
        if !self.embedded.is_match(s) {
            return Ok(Value::String(s.to_owned()));
        }

        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in self.embedded.captures_iter(s) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&s[last..whole.start()]);
            let value = self.expression(&caps[1], stack)?;
            out.push_str(&stringify(&caps[1], &value)?);
            last = whole.end();
        }
        out.push_str(&s[last..]);
        Ok(Value::String(out))
    }

    fn expression(&self, expr: &str, stack: &mut Vec<String>) -> Result<Value> {
        let expr = expr.trim();

        if let Some(args) = expr.strip_prefix(ENV_PREFIX) {
            let (var, default) = match args.split_once(',') {
                Some((var, default)) => (var.trim(), Some(default.trim())),
                None => (args.trim(), None),
            };
            return match (std::env::var(var), default) {
                (Ok(value), _) => Ok(parse_value(&value)),
                (Err(_), Some(default)) => Ok(parse_value(default)),
                (Err(_), None) => Err(Error::config(format!(
                    "environment variable '{var}' is not set and '${{{expr}}}' has no default"
                ))),
            };
        }

        if expr.contains(':') {
            return Err(Error::config(format!(
                "unsupported resolver in '${{{expr}}}' (only oc.env is available)"
            )));
        }

        if stack.iter().any(|k| k == expr) {
            let mut chain = stack.clone();
            chain.push(expr.to_owned());
            return Err(Error::config(format!(
                "interpolation cycle: {}",
                chain.join(" -> ")
            )));
        }

        let target = lookup(self.root, expr).ok_or_else(|| {
            Error::config(format!("interpolation key '{expr}' not found"))
        })?;

        stack.push(expr.to_owned());
        let resolved = self.node(target, stack);
        stack.pop();
        resolved
    }
}
