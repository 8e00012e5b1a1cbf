//! Topic value tracker.
//!
//! A data topic path is `primary` or `primary/secondary`; anything deeper is
//! never declared by a schema and is dropped. Values are only recorded for
//! pairs the device's current schema lists as publishable.

use super::events::ValueUpdate;
use super::model::{TopicSchema, TopicValues};
use crate::error::IngestError;

/// Splits a data topic path into `(primary, secondary)`, secondary being
/// empty for a bare primary topic.
pub fn split_topic_path(path: &str) -> Option<(&str, &str)> {
    let mut levels = path.splitn(3, '/');
    let primary = levels.next().filter(|primary| !primary.is_empty())?;
    let secondary = levels.next().unwrap_or("");
    if levels.next().is_some() {
        return None;
    }
    Some((primary, secondary))
}

/// Resolves a data topic path against the device's schema.
///
/// Fails with [`IngestError::SchemaMismatch`] when there is no schema, the
/// path is too deep, or the pair is not declared publishable.
pub fn resolve_path<'a>(
    device_id: &str,
    schema: Option<&TopicSchema>,
    path: &'a str,
) -> Result<(&'a str, &'a str), IngestError> {
    let mismatch = |primary: &str, secondary: &str| IngestError::SchemaMismatch {
        device_id: device_id.to_string(),
        primary: primary.to_string(),
        secondary: secondary.to_string(),
    };

    let (primary, secondary) = split_topic_path(path).ok_or_else(|| mismatch(path, ""))?;
    match schema {
        Some(schema) if schema.is_publishable(primary, secondary) => Ok((primary, secondary)),
        _ => Err(mismatch(primary, secondary)),
    }
}

/// Stores the raw payload as text at `[primary][secondary]`.
pub fn record_value(
    values: &mut TopicValues,
    primary: &str,
    secondary: &str,
    payload: &[u8],
) -> ValueUpdate {
    let value = String::from_utf8_lossy(payload).into_owned();
    values
        .entry(primary.to_string())
        .or_default()
        .insert(secondary.to_string(), value.clone());

    ValueUpdate {
        topic: primary.to_string(),
        subtopic: secondary.to_string(),
        value,
    }
}

/// Full-topic suffixes (`primary` or `primary/secondary`) of every recorded value.
pub fn recorded_paths(values: &TopicValues) -> Vec<String> {
    values
        .iter()
        .flat_map(|(primary, subtopics)| {
            subtopics.keys().map(move |secondary| {
                if secondary.is_empty() {
                    primary.clone()
                } else {
                    format!("{}/{}", primary, secondary)
                }
            })
        })
        .collect()
}
