//! Environment overlays.
//!
//! An overlay is an ordered list of edits to environment variables. Stages
//! build overlays and merge them into new values; nothing here touches the
//! process environment. The edits are resolved against a read-only base
//! environment only when a child process is spawned.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(windows)]
const PATH_SEPARATOR: &str = ";";
#[cfg(not(windows))]
const PATH_SEPARATOR: &str = ":";

/// How an overlay entry changes a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvOp {
    /// Put the value in front of a path list.
    PrependPath,
    /// Append the value separated by a space (flag variables such as `LDFLAGS`).
    Append,
    /// Replace the variable.
    Set,
}

impl fmt::Display for EnvOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvOp::PrependPath => f.write_str("prepend-path"),
            EnvOp::Append => f.write_str("append"),
            EnvOp::Set => f.write_str("set"),
        }
    }
}

/// One variable edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvEdit {
    pub var: String,
    pub op: EnvOp,
    pub value: String,
}

impl EnvEdit {
    fn apply_to(&self, current: Option<&str>) -> String {
        match (self.op, current) {
            (EnvOp::Set, _) | (_, None) => self.value.clone(),
            (_, Some("")) => self.value.clone(),
            (EnvOp::PrependPath, Some(old)) => format!("{}{}{}", self.value, PATH_SEPARATOR, old),
            (EnvOp::Append, Some(old)) => format!("{} {}", old, self.value),
        }
    }
}

/// An immutable, ordered set of environment edits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvOverlay {
    edits: Vec<EnvEdit>,
}

impl EnvOverlay {
    pub fn new() -> Self {
        EnvOverlay::default()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn edits(&self) -> &[EnvEdit] {
        &self.edits
    }

    /// Return a new overlay with one more edit.
    pub fn with(&self, var: impl Into<String>, op: EnvOp, value: impl Into<String>) -> Self {
        let mut edits = self.edits.clone();
        edits.push(EnvEdit {
            var: var.into(),
            op,
            value: value.into(),
        });
        EnvOverlay { edits }
    }

    pub fn prepend_path(&self, var: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(var, EnvOp::PrependPath, value)
    }

    pub fn append(&self, var: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(var, EnvOp::Append, value)
    }

    pub fn set(&self, var: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(var, EnvOp::Set, value)
    }

    /// Combine two overlays; `other`'s edits are applied after ours.
    pub fn merge(&self, other: &EnvOverlay) -> Self {
        let mut edits = self.edits.clone();
        edits.extend(other.edits.iter().cloned());
        EnvOverlay { edits }
    }

    /// Resolve the overlay against `base`, returning the full environment.
    pub fn apply(&self, base: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = base.clone();
        for edit in &self.edits {
            let value = edit.apply_to(env.get(&edit.var).map(String::as_str));
            env.insert(edit.var.clone(), value);
        }
        env
    }

    /// Resolve the overlay against `base`, returning only the variables it
    /// changes. This is what gets passed to a child process.
    pub fn changes(&self, base: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let full = self.apply(base);
        full.into_iter()
            .filter(|(k, v)| base.get(k) != Some(v))
            .collect()
    }
}

/// Snapshot of the current process environment.
pub fn base_environment() -> BTreeMap<String, String> {
    std::env::vars().collect()
}
