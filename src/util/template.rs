//! `{placeholder}` expansion for recipe strings.
//!
//! Flags, step arguments, environment values, generated config entries and
//! caveats may reference variables such as `{prefix}` or `{port}`. A
//! reference to an unknown variable is an error rather than being passed
//! through silently.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_][a-z0-9_]*)\}").expect("valid placeholder regex"));

/// A set of template variables.
#[derive(Debug, Clone, Default)]
pub struct Vars {
    values: BTreeMap<String, String>,
}

impl Vars {
    /// Create an empty variable set.
    pub fn new() -> Self {
        Vars::default()
    }

    /// Bind a variable, returning the updated set.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Bind a path-valued variable.
    pub fn with_path(self, key: impl Into<String>, path: &Path) -> Self {
        self.with(key, path.display().to_string())
    }

    /// Bind a variable in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Look up a variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Expand every `{name}` in `input`.
    pub fn expand(&self, input: &str) -> Result<String> {
        let mut out = String::with_capacity(input.len());
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(input) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let key = &caps[1];
            let value = match self.values.get(key) {
                Some(v) => v,
                None => bail!("unknown placeholder `{{{}}}` in `{}`", key, input),
            };
            out.push_str(&input[last..whole.start()]);
            out.push_str(value);
            last = whole.end();
        }

        out.push_str(&input[last..]);
        Ok(out)
    }

    /// Expand every string in a list.
    pub fn expand_all<'a>(&self, inputs: impl IntoIterator<Item = &'a String>) -> Result<Vec<String>> {
        inputs.into_iter().map(|s| self.expand(s)).collect()
    }
}
