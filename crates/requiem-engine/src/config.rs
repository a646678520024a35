//! Engine startup configuration.
//!
//! `config_json` is small, operator-authored, and untrusted by the same
//! posture as a request: depth- and size-guarded before a single field
//! is read out of it.

use serde_json::Value;

use requiem_error::{ErrorCode, RequiemError};

const MAX_DEPTH: usize = 8;
const MAX_SIZE_BYTES: usize = 64 * 1024;

/// Parsed, defaulted engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the NDJSON provenance log, if recording is enabled.
    pub event_log_path: Option<String>,
    /// Root directory for the content-addressable store.
    pub cas_root: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_log_path: None,
            cas_root: ".requiem/cas/v2".to_string(),
        }
    }
}

/// Parse and validate a `config_json` object.
///
/// Recognizes `event_log_path: string?` and `cas_root: string?`
/// (default `.requiem/cas/v2"`); unrecognized keys are ignored rather
/// than rejected, since `config_json` is forward-compatible by design.
///
/// # Errors
///
/// Returns [`ErrorCode::JsonParseError`] if `config_json` is not valid
/// JSON, is not an object, or exceeds the depth/size guard.
pub fn parse_config(config_json: &str) -> Result<EngineConfig, RequiemError> {
    if config_json.len() > MAX_SIZE_BYTES {
        return Err(RequiemError::new(
            ErrorCode::JsonParseError,
            format!("config_json exceeds {MAX_SIZE_BYTES} bytes"),
        ));
    }
    let value: Value = serde_json::from_str(config_json)
        .map_err(|e| RequiemError::new(ErrorCode::JsonParseError, format!("invalid config_json: {e}")))?;

    let Value::Object(map) = &value else {
        return Err(RequiemError::new(
            ErrorCode::JsonParseError,
            "config_json must be a JSON object",
        ));
    };
    if exceeds_depth(&value, MAX_DEPTH) {
        return Err(RequiemError::new(
            ErrorCode::JsonParseError,
            format!("config_json exceeds maximum nesting depth of {MAX_DEPTH}"),
        ));
    }

    let mut config = EngineConfig::default();
    if let Some(Value::String(s)) = map.get("event_log_path") {
        config.event_log_path = Some(s.clone());
    }
    if let Some(Value::String(s)) = map.get("cas_root") {
        config.cas_root = s.clone();
    }
    Ok(config)
}

fn exceeds_depth(value: &Value, max_depth: usize) -> bool {
    if max_depth == 0 {
        return value.is_object() || value.is_array();
    }
    match value {
        Value::Object(map) => map.values().any(|v| exceeds_depth(v, max_depth - 1)),
        Value::Array(arr) => arr.iter().any(|v| exceeds_depth(v, max_depth - 1)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.cas_root, ".requiem/cas/v2");
        assert!(config.event_log_path.is_none());
    }

    #[test]
    fn overrides_are_read() {
        let config = parse_config(r#"{"cas_root":"/tmp/cas","event_log_path":"/tmp/audit.ndjson"}"#).unwrap();
        assert_eq!(config.cas_root, "/tmp/cas");
        assert_eq!(config.event_log_path.as_deref(), Some("/tmp/audit.ndjson"));
    }

    #[test]
    fn unrecognized_keys_are_ignored() {
        let config = parse_config(r#"{"future_field": 1}"#).unwrap();
        assert_eq!(config.cas_root, ".requiem/cas/v2");
    }

    #[test]
    fn non_object_is_rejected() {
        let err = parse_config("[1,2,3]").unwrap_err();
        assert_eq!(err.code, ErrorCode::JsonParseError);
    }

    #[test]
    fn invalid_json_is_rejected() {
        let err = parse_config("{not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::JsonParseError);
    }

    #[test]
    fn excessive_depth_is_rejected() {
        let mut nested = String::from("1");
        for _ in 0..20 {
            nested = format!("{{\"a\":{nested}}}");
        }
        let err = parse_config(&nested).unwrap_err();
        assert_eq!(err.code, ErrorCode::JsonParseError);
    }
}
