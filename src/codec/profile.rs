//! Device profile codec.
//!
//! A profile is a set of named components, each an ordered list of property
//! tables. It travels the bus in one of two version-tagged generations:
//!
//! - binary: CBOR array `[version, {component: [{key: value}, ...]}]`
//! - JSON:   `{"version": "1.0", "components": {component: [...]}}`
//!
//! and is edited as TOML text, one array of tables per component:
//!
//! ```toml
//! [[dimmer]]
//! pin = 4
//! name = "hall"
//! ```
//!
//! Decoding and encoding either produce the whole output or an error.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Version stamped on binary profiles.
pub const PROFILE_VERSION: u32 = 1;
/// Version stamped on JSON profiles.
pub const PROFILE_JSON_VERSION: &str = "1.0";

pub type ProfileEntry = toml::Table;
pub type ProfileDocument = BTreeMap<String, Vec<ProfileEntry>>;

/// Wire generation used when pushing a profile to a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileWireFormat {
    #[default]
    Cbor,
    Json,
}

#[derive(Debug, Serialize, Deserialize)]
struct BinaryProfile(u32, ProfileDocument);

#[derive(Debug, Serialize, Deserialize)]
struct JsonProfile {
    version: String,
    #[serde(alias = "profile")]
    components: ProfileDocument,
}

/// Wire payload -> editable text.
pub fn decode_profile(payload: &[u8]) -> Result<String, DecodeError> {
    let document = decode_document(payload)?;
    render_document(&document)
}

/// Editable text -> wire payload carrying the current version tag.
pub fn encode_profile(text: &str, format: ProfileWireFormat) -> Result<Vec<u8>, DecodeError> {
    let document = parse_document(text)?;
    match format {
        ProfileWireFormat::Cbor => minicbor_serde::to_vec(&BinaryProfile(PROFILE_VERSION, document))
            .map_err(|e| DecodeError::CborEncode(e.to_string())),
        ProfileWireFormat::Json => Ok(serde_json::to_vec(&JsonProfile {
            version: PROFILE_JSON_VERSION.to_string(),
            components: document,
        })?),
    }
}

pub fn decode_document(payload: &[u8]) -> Result<ProfileDocument, DecodeError> {
    let cbor_err = match minicbor_serde::from_slice::<BinaryProfile>(payload) {
        Ok(BinaryProfile(version, document)) => {
            if version != PROFILE_VERSION {
                debug!("Decoding binary profile with version {}", version);
            }
            return Ok(document);
        }
        Err(e) => e.to_string(),
    };

    match serde_json::from_slice::<JsonProfile>(payload) {
        Ok(profile) => {
            if profile.version != PROFILE_JSON_VERSION {
                debug!("Decoding JSON profile with version {}", profile.version);
            }
            Ok(profile.components)
        }
        Err(json_err) if looks_like_json(payload) => Err(DecodeError::Json(json_err)),
        Err(_) => Err(DecodeError::Cbor(cbor_err)),
    }
}

/// Parses editable text. TOML datetimes have no wire form and are carried
/// as their text.
pub fn parse_document(text: &str) -> Result<ProfileDocument, DecodeError> {
    let mut document: ProfileDocument = toml::from_str(text)?;
    for entry in document.values_mut().flatten() {
        entry.iter_mut().map(|(_, v)| v).for_each(stringify_datetimes);
    }
    Ok(document)
}

pub fn render_document(document: &ProfileDocument) -> Result<String, DecodeError> {
    Ok(toml::to_string(document)?)
}

fn stringify_datetimes(value: &mut toml::Value) {
    match value {
        toml::Value::Datetime(datetime) => {
            let text = datetime.to_string();
            *value = toml::Value::String(text);
        }
        toml::Value::Array(items) => items.iter_mut().for_each(stringify_datetimes),
        toml::Value::Table(table) => table.iter_mut().map(|(_, v)| v).for_each(stringify_datetimes),
        _ => {}
    }
}

fn looks_like_json(payload: &[u8]) -> bool {
    payload
        .iter()
        .find(|byte| !byte.is_ascii_whitespace())
        .is_some_and(|byte| *byte == b'{')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dimmer_document() -> ProfileDocument {
        let mut hall = ProfileEntry::new();
        hall.insert("pin".to_string(), toml::Value::Integer(4));
        hall.insert("name".to_string(), toml::Value::String("hall".to_string()));
        let mut porch = ProfileEntry::new();
        porch.insert("pin".to_string(), toml::Value::Integer(5));
        porch.insert("inverted".to_string(), toml::Value::Boolean(true));

        let mut document = ProfileDocument::new();
        document.insert("dimmer".to_string(), vec![hall, porch]);
        document.insert("relay".to_string(), Vec::new());
        document
    }

    #[test]
    fn test_binary_round_trip() {
        let text = render_document(&dimmer_document()).unwrap();
        let wire = encode_profile(&text, ProfileWireFormat::Cbor).unwrap();

        let decoded = decode_profile(&wire).unwrap();
        assert_eq!(parse_document(&decoded).unwrap(), dimmer_document());
        assert_eq!(encode_profile(&decoded, ProfileWireFormat::Cbor).unwrap(), wire);
    }

    #[test]
    fn test_binary_carries_version() {
        let text = render_document(&dimmer_document()).unwrap();
        let wire = encode_profile(&text, ProfileWireFormat::Cbor).unwrap();
        let BinaryProfile(version, _) = minicbor_serde::from_slice(&wire).unwrap();
        assert_eq!(version, PROFILE_VERSION);
    }

    #[test]
    fn test_json_generation_round_trip() {
        let wire = br#"{"version":"1.0","components":{"dimmer":[{"pin":4,"name":"hall"}]}}"#;
        let text = decode_profile(wire).unwrap();
        assert!(text.contains("[[dimmer]]"));

        let encoded = encode_profile(&text, ProfileWireFormat::Json).unwrap();
        let original: serde_json::Value = serde_json::from_slice(wire).unwrap();
        let round_tripped: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(original, round_tripped);
    }

    #[test]
    fn test_truncated_binary_is_error() {
        let text = render_document(&dimmer_document()).unwrap();
        let wire = encode_profile(&text, ProfileWireFormat::Cbor).unwrap();
        let truncated = &wire[..wire.len() / 2];

        assert!(matches!(decode_profile(truncated), Err(DecodeError::Cbor(_))));
    }

    #[test]
    fn test_corrupt_json_is_error() {
        let err = decode_profile(br#"{"version":"1.0","components":{"dimmer":[{"pin":"#).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_datetimes_travel_as_text() {
        let text = "[[clock]]\nsince = 2024-01-02T03:04:05Z\nwindows = [{ from = 07:30:00 }]\n";

        let wire = encode_profile(text, ProfileWireFormat::Json).unwrap();
        assert!(!String::from_utf8_lossy(&wire).contains("$__toml_private"));
        let json: serde_json::Value = serde_json::from_slice(&wire).unwrap();
        assert_eq!(json["components"]["clock"][0]["since"], "2024-01-02T03:04:05Z");
        assert_eq!(json["components"]["clock"][0]["windows"][0]["from"], "07:30:00");

        let wire = encode_profile(text, ProfileWireFormat::Cbor).unwrap();
        let decoded = decode_profile(&wire).unwrap();
        assert!(decoded.contains(r#"since = "2024-01-02T03:04:05Z""#));
    }

    #[test]
    fn test_invalid_text_is_error() {
        assert!(encode_profile("pin = 4", ProfileWireFormat::Cbor).is_err());
        assert!(encode_profile("[[dimmer]\npin = ", ProfileWireFormat::Json).is_err());
    }
}
