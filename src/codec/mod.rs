//! # Wire Codecs
//!
//! Stateless decoders (and the profile encoder) for every payload a device
//! puts on the bus. Each function is total over its input: it returns a
//! typed value or a [`DecodeError`], and never touches store state.
//!
//! ```text
//! codec/
//! ├── identity.rs     - device/info        (JSON)
//! ├── diagnostics.rs  - device/diag        (JSON)
//! ├── schema.rs       - device/topics      (JSON or CBOR, two shapes)
//! └── profile.rs      - device/profile     (CBOR or JSON generation <-> TOML text)
//! ```
//!
//! Status payloads are plain text and handled by [`decode_status`].

pub mod diagnostics;
pub mod identity;
pub mod profile;
pub mod schema;

pub use diagnostics::decode_diagnostics;
pub use identity::decode_identity;
pub use profile::{decode_profile, encode_profile, ProfileWireFormat};
pub use schema::decode_schema;

use crate::error::DecodeError;
use serde::de::DeserializeOwned;

/// Status text is taken verbatim; invalid UTF-8 is replaced, not rejected.
pub fn decode_status(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

/// Decodes a structured payload, trying JSON first and CBOR second.
///
/// The JSON error is reported when both fail since the text encoding is
/// the one current firmware uses.
pub(crate) fn decode_structured<T: DeserializeOwned>(payload: &[u8]) -> Result<T, DecodeError> {
    match serde_json::from_slice::<T>(payload) {
        Ok(value) => Ok(value),
        Err(json_err) => match minicbor_serde::from_slice::<T>(payload) {
            Ok(value) => Ok(value),
            Err(_) => Err(DecodeError::Json(json_err)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        value: u32,
    }

    #[test]
    fn test_status_is_verbatim() {
        assert_eq!(decode_status(b"online"), "online");
        assert_eq!(decode_status(b""), "");
    }

    #[test]
    fn test_structured_accepts_json_and_cbor() {
        let sample = Sample {
            name: "x".to_string(),
            value: 7,
        };
        let json = serde_json::to_vec(&sample).unwrap();
        let cbor = minicbor_serde::to_vec(&sample).unwrap();

        assert_eq!(decode_structured::<Sample>(&json).unwrap(), sample);
        assert_eq!(decode_structured::<Sample>(&cbor).unwrap(), sample);
    }

    #[test]
    fn test_structured_rejects_garbage() {
        let err = decode_structured::<Sample>(b"\xff\x00not a payload").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }
}
