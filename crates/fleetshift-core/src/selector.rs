//! Label and field selectors.
//!
//! A [`Selector`] is a conjunction of requirements written as
//! `key=value`, `key==value`, `key!=value`, `key` (exists) or `!key`
//! (does not exist), separated by commas. The same grammar is used for
//! label selectors (matched against an object's labels) and field
//! selectors (matched against field paths such as `spec.nodeName`).

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Labels, Object, FIELD_NODE_NAME};

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("static regex")
});

static PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("static regex")
});

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty requirement in selector {0:?}")]
    EmptyRequirement(String),

    #[error("invalid label key {0:?}")]
    InvalidKey(String),

    #[error("invalid label value {0:?}")]
    InvalidValue(String),
}

/// Check a label key: optional DNS-subdomain prefix, `/`, then a name.
pub fn validate_label_key(key: &str) -> Result<(), SelectorError> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN || !PREFIX_RE.is_match(prefix) {
            return Err(SelectorError::InvalidKey(key.to_string()));
        }
    }
    if name.is_empty() || name.len() > MAX_NAME_LEN || !NAME_RE.is_match(name) {
        return Err(SelectorError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Check a label value: empty, or a name of at most 63 characters.
pub fn validate_label_value(value: &str) -> Result<(), SelectorError> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_NAME_LEN || !NAME_RE.is_match(value) {
        return Err(SelectorError::InvalidValue(value.to_string()));
    }
    Ok(())
}

/// Coerce arbitrary text into a valid label value.
///
/// Disallowed characters become `-`, the result is trimmed to 63
/// characters and stripped of non-alphanumeric ends.
pub fn sanitize_label_value(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();
    mapped
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Comparison applied by one requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    Exists,
    DoesNotExist,
}

/// A single `key <op> value` clause.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Requirement {
    pub key: String,
    pub op: Operator,
    pub value: String,
}

impl Requirement {
    fn matches(&self, actual: Option<&str>) -> bool {
        match self.op {
            Operator::Equals => actual == Some(self.value.as_str()),
            // Absent keys satisfy `!=`, as in the cluster API.
            Operator::NotEquals => actual != Some(self.value.as_str()),
            Operator::Exists => actual.is_some(),
            Operator::DoesNotExist => actual.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Operator::Equals => write!(f, "{}={}", self.key, self.value),
            Operator::NotEquals => write!(f, "{}!={}", self.key, self.value),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// Conjunction of requirements. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Selector matching every object.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Equality selector built from a label map.
    pub fn from_map(map: &Labels) -> Self {
        let mut selector = Self::default();
        for (key, value) in map {
            selector = selector.eq(key, value);
        }
        selector
    }

    pub fn eq(self, key: &str, value: &str) -> Self {
        self.with(key, Operator::Equals, value)
    }

    pub fn not_eq(self, key: &str, value: &str) -> Self {
        self.with(key, Operator::NotEquals, value)
    }

    pub fn exists(self, key: &str) -> Self {
        self.with(key, Operator::Exists, "")
    }

    pub fn does_not_exist(self, key: &str) -> Self {
        self.with(key, Operator::DoesNotExist, "")
    }

    fn with(mut self, key: &str, op: Operator, value: &str) -> Self {
        let req = Requirement {
            key: key.to_string(),
            op,
            value: value.to_string(),
        };
        if !self.requirements.contains(&req) {
            self.requirements.push(req);
            self.requirements.sort();
        }
        self
    }

    /// Conjunction of two selectors.
    pub fn and(mut self, other: &Selector) -> Self {
        for req in &other.requirements {
            self = self.with(&req.key, req.op, &req.value);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Whether a label map satisfies every requirement.
    pub fn matches(&self, labels: &Labels) -> bool {
        self.matches_with(|key| labels.get(key).map(String::as_str))
    }

    /// Match using an arbitrary key lookup (used for field selectors).
    pub fn matches_with<'a>(&self, lookup: impl Fn(&str) -> Option<&'a str>) -> bool {
        self.requirements
            .iter()
            .all(|req| req.matches(lookup(&req.key)))
    }

    /// Parse the comma-separated textual form.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let mut selector = Self::default();
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(selector);
        }
        for raw in trimmed.split(',') {
            let clause = raw.trim();
            if clause.is_empty() {
                return Err(SelectorError::EmptyRequirement(input.to_string()));
            }
            let (key, op, value) = if let Some((k, v)) = clause.split_once("!=") {
                (k.trim(), Operator::NotEquals, v.trim())
            } else if let Some((k, v)) = clause.split_once("==") {
                (k.trim(), Operator::Equals, v.trim())
            } else if let Some((k, v)) = clause.split_once('=') {
                (k.trim(), Operator::Equals, v.trim())
            } else if let Some(k) = clause.strip_prefix('!') {
                (k.trim(), Operator::DoesNotExist, "")
            } else {
                (clause, Operator::Exists, "")
            };
            if key.is_empty() {
                return Err(SelectorError::InvalidKey(clause.to_string()));
            }
            selector = selector.with(key, op, value);
        }
        Ok(selector)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, req) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{req}")?;
        }
        Ok(())
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Selector {
    type Error = SelectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        selector.to_string()
    }
}

/// Filter passed to `list` and `watch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub label_selector: Selector,
    #[serde(default)]
    pub field_selector: Selector,
}

impl ListParams {
    pub fn labels(selector: Selector) -> Self {
        Self {
            label_selector: selector,
            field_selector: Selector::everything(),
        }
    }

    pub fn with_fields(mut self, selector: Selector) -> Self {
        self.field_selector = self.field_selector.and(&selector);
        self
    }

    /// Restrict to pods bound to `node`.
    pub fn on_node(self, node: &str) -> Self {
        self.with_fields(Selector::everything().eq(FIELD_NODE_NAME, node))
    }

    pub fn matches<K: Object>(&self, obj: &K) -> bool {
        if !self.label_selector.matches(obj.labels()) {
            return false;
        }
        if self.field_selector.is_empty() {
            return true;
        }
        let fields: Vec<(String, Option<String>)> = self
            .field_selector
            .requirements()
            .iter()
            .map(|req| (req.key.clone(), obj.field(&req.key)))
            .collect();
        self.field_selector.matches_with(|key| {
            fields
                .iter()
                .find(|(k, _)| k == key)
                .and_then(|(_, v)| v.as_deref())
        })
    }
}

impl fmt::Display for ListParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "labels={{{}}} fields={{{}}}",
            self.label_selector, self.field_selector
        )
    }
}
