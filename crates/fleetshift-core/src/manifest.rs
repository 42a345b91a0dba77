//! Workload manifest decoding.
//!
//! A rollout request carries the new workload as a single declarative
//! document (YAML, or JSON as a YAML subset). Streams with more than one
//! document, or `List` objects with more than one item, are rejected
//! before anything touches the cluster.

use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

use crate::selector::{validate_label_key, validate_label_value, Selector};
use crate::types::{Labels, Workload, WORKLOAD_KIND};

const LIST_KIND: &str = "List";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest has a bad format: {0}")]
    BadFormat(String),

    #[error("manifest specifies multiple items ({0})")]
    MultipleItems(usize),
}

pub type ManifestResult<T> = Result<T, ManifestError>;

/// Decode and validate exactly one workload from `content`.
pub fn parse_workload(content: &str) -> ManifestResult<Workload> {
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(doc).map_err(|e| ManifestError::BadFormat(e.to_string()))?;
        // `---` separators around a single object yield empty documents.
        if !value.is_null() {
            docs.push(value);
        }
    }

    let value = match docs.len() {
        0 => return Err(ManifestError::BadFormat("no object in manifest".to_string())),
        1 => docs.remove(0),
        n => return Err(ManifestError::MultipleItems(n)),
    };
    let value = unwrap_list(value)?;

    let kind = value.get("kind").and_then(Value::as_str).unwrap_or("<none>");
    if kind != WORKLOAD_KIND {
        return Err(ManifestError::BadFormat(format!(
            "expected kind {WORKLOAD_KIND}, found {kind}"
        )));
    }

    let workload: Workload =
        serde_yaml::from_value(value).map_err(|e| ManifestError::BadFormat(e.to_string()))?;
    validate(&workload)?;
    Ok(workload)
}

/// A `List` wrapper with exactly one item is treated as that item.
fn unwrap_list(value: Value) -> ManifestResult<Value> {
    if value.get("kind").and_then(Value::as_str) != Some(LIST_KIND) {
        return Ok(value);
    }
    let items = match value.get("items") {
        Some(Value::Sequence(items)) => items.clone(),
        Some(_) => return Err(ManifestError::BadFormat("list items is not a sequence".to_string())),
        None => Vec::new(),
    };
    match items.len() {
        0 => Err(ManifestError::BadFormat("list has no items".to_string())),
        1 => Ok(items.into_iter().next().unwrap_or(Value::Null)),
        n => Err(ManifestError::MultipleItems(n)),
    }
}

/// Structural checks the cluster would otherwise reject later.
pub fn validate(workload: &Workload) -> ManifestResult<()> {
    if workload.metadata.name.is_empty() {
        return Err(ManifestError::BadFormat("metadata.name is required".to_string()));
    }
    if workload.spec.selector.is_empty() {
        return Err(ManifestError::BadFormat("spec.selector must not be empty".to_string()));
    }
    if !Selector::from_map(&workload.spec.selector).matches(&workload.spec.template.metadata.labels)
    {
        return Err(ManifestError::BadFormat(
            "spec.selector does not match template labels".to_string(),
        ));
    }

    check_labels("metadata.labels", &workload.metadata.labels)?;
    check_labels("spec.selector", &workload.spec.selector)?;
    check_labels("spec.template.metadata.labels", &workload.spec.template.metadata.labels)?;
    check_labels(
        "spec.template.spec.nodeSelector",
        &workload.spec.template.spec.node_selector,
    )?;
    Ok(())
}

fn check_labels(field: &str, labels: &Labels) -> ManifestResult<()> {
    for (key, value) in labels {
        validate_label_key(key)
            .and_then(|_| validate_label_value(value))
            .map_err(|e| ManifestError::BadFormat(format!("{field}: {e}")))?;
    }
    Ok(())
}
