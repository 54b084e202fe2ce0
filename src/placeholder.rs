//! Literal `{key}` placeholder substitution
//!
//! Config text may reference caller variables as `{key}` (and the base
//! config may use `{workerName}`). Every occurrence of `{key}` is replaced,
//! whatever characters the key contains; placeholders without a value are
//! left as written.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Caller-supplied substitutions
pub type Variables = BTreeMap<String, String>;

/// Ordered `{key}` -> value replacements
#[derive(Debug, Clone, Default)]
pub struct Substitutions<'a> {
    pairs: Vec<(String, &'a str)>,
}

impl<'a> Substitutions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// One replacement per variable, in key order
    pub fn from_variables(vars: &'a Variables) -> Self {
        vars.iter()
            .fold(Self::new(), |subs, (key, value)| subs.with(key, value))
    }

    pub fn with(mut self, key: &str, value: &'a str) -> Self {
        self.pairs.push((format!("{{{}}}", key), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Replace every `{key}` in `text`; borrows when nothing matched.
    pub fn render<'t>(&self, text: &'t str) -> Cow<'t, str> {
        let mut out = Cow::Borrowed(text);
        for (placeholder, value) in &self.pairs {
            if out.contains(placeholder.as_str()) {
                out = Cow::Owned(out.replace(placeholder.as_str(), value));
            }
        }
        out
    }

    /// Apply to every string (object keys included) in a JSON tree
    pub fn apply(&self, value: &mut Value) {
        match value {
            Value::String(s) => {
                if let Cow::Owned(rendered) = self.render(s) {
                    *s = rendered;
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.apply(item);
                }
            }
            Value::Object(map) => {
                if map.keys().any(|k| matches!(self.render(k), Cow::Owned(_))) {
                    let old = std::mem::take(map);
                    let mut rebuilt = Map::with_capacity(old.len());
                    for (k, v) in old {
                        rebuilt.insert(self.render(&k).into_owned(), v);
                    }
                    *map = rebuilt;
                }
                for v in map.values_mut() {
                    self.apply(v);
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }
}
