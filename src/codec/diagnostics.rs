use crate::devices::model::DeviceDiagnostics;
use crate::error::DecodeError;

/// Decodes a diagnostics message. `last_seen` is left empty for the caller
/// to stamp, a value sent by the device is ignored.
pub fn decode_diagnostics(payload: &[u8]) -> Result<DeviceDiagnostics, DecodeError> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_diagnostics() {
        let payload = br#"{
            "uptime": 42,
            "mem": {"free": 20000, "low": 18000},
            "tasks": [{"name": "mqtt", "stackMinLeft": 512}]
        }"#;
        let diag = decode_diagnostics(payload).unwrap();

        assert_eq!(diag.uptime, 42);
        assert_eq!(diag.memory.free, 20000);
        assert_eq!(diag.memory.low, 18000);
        assert_eq!(diag.tasks.len(), 1);
        assert_eq!(diag.tasks[0].name, "mqtt");
        assert_eq!(diag.tasks[0].stack_min_left, 512);
        assert!(diag.last_seen.is_none());
    }

    #[test]
    fn test_device_last_seen_is_ignored() {
        let diag = decode_diagnostics(br#"{"uptime":1,"lastSeen":"2001-01-01T00:00:00Z"}"#).unwrap();
        assert!(diag.last_seen.is_none());
    }

    #[test]
    fn test_truncated_diagnostics_is_error() {
        assert!(decode_diagnostics(br#"{"uptime": 4"#).is_err());
    }
}
