//! Topic schema decoding.
//!
//! A schema message is a two element array: a table of topic descriptions
//! and a map from topic name to the index of its description. Firmware in
//! the field sends one of two description shapes:
//!
//! - keyed:  `[{"": 0, "level": 1}, {"set": 1}]` (pub map, sub map)
//! - paired: `[[["", 0], ["level", 1]], [["set", 1]]]` (pub pairs, sub pairs)
//!
//! The description table is either a plain array or a map keyed by index.
//! Each shape has its own parser; [`decode_schema`] tries keyed first and
//! falls back to paired. Both normalise to [`TopicSchema`].

use super::decode_structured;
use crate::devices::model::{TopicDescription, TopicInfo, TopicSchema};
use crate::error::DecodeError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RawSchema<T>(T, BTreeMap<String, usize>);

#[derive(Debug, Deserialize)]
struct KeyedDescription(TopicInfo, TopicInfo);

#[derive(Debug, Deserialize)]
struct PairedDescription(Vec<(String, i32)>, Vec<(String, i32)>);

impl From<KeyedDescription> for TopicDescription {
    fn from(raw: KeyedDescription) -> Self {
        TopicDescription {
            publish: raw.0,
            subscribe: raw.1,
        }
    }
}

impl From<PairedDescription> for TopicDescription {
    fn from(raw: PairedDescription) -> Self {
        TopicDescription {
            publish: raw.0.into_iter().collect(),
            subscribe: raw.1.into_iter().collect(),
        }
    }
}

pub fn decode_schema(payload: &[u8]) -> Result<TopicSchema, DecodeError> {
    decode_keyed_shape(payload).or_else(|_| decode_paired_shape(payload))
}

pub fn decode_keyed_shape(payload: &[u8]) -> Result<TopicSchema, DecodeError> {
    decode_shape::<KeyedDescription>(payload)
}

pub fn decode_paired_shape(payload: &[u8]) -> Result<TopicSchema, DecodeError> {
    decode_shape::<PairedDescription>(payload)
}

fn decode_shape<D>(payload: &[u8]) -> Result<TopicSchema, DecodeError>
where
    D: DeserializeOwned + Into<TopicDescription>,
{
    if let Ok(RawSchema(descriptions, names)) = decode_structured::<RawSchema<Vec<D>>>(payload) {
        let indexed = descriptions.into_iter().enumerate().collect();
        return Ok(assemble(indexed, names));
    }
    match decode_structured::<RawSchema<BTreeMap<usize, D>>>(payload) {
        Ok(RawSchema(descriptions, names)) => Ok(assemble(descriptions, names)),
        Err(_) => Err(DecodeError::UnknownShape("topic schema")),
    }
}

fn assemble<D: Into<TopicDescription>>(
    descriptions: BTreeMap<usize, D>,
    names: BTreeMap<String, usize>,
) -> TopicSchema {
    let descriptions: BTreeMap<usize, TopicDescription> = descriptions
        .into_iter()
        .map(|(index, description)| (index, description.into()))
        .collect();

    let mut topics = BTreeMap::new();
    for (name, index) in names {
        match descriptions.get(&index) {
            Some(description) => {
                topics.insert(name, description.clone());
            }
            None => debug!("Skipping topic {} with description index {} out of range", name, index),
        }
    }
    TopicSchema { topics }
}
