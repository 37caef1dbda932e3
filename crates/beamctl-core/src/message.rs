//! Inbound device messages
//!
//! Every message received from the device is classified into one of five
//! kinds. Raw-mode text arrives as [`DeviceMessage::Raw`] chunks which may
//! hold several lines or a partial line.

use serde_json::Value;

/// A message received from the device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    /// Structured reply to a normal-mode command
    Reply(Value),
    /// Raw text chunk from a sub-task
    Raw(String),
    /// Progress notification for a long-running command
    Progress(Value),
    /// Error notification
    Error(Value),
    /// Unrecoverable error notification
    Fatal(Value),
}

impl DeviceMessage {
    /// Build a raw text message
    pub fn raw(text: impl Into<String>) -> Self {
        DeviceMessage::Raw(text.into())
    }

    /// Build a structured reply carrying a plain text payload
    pub fn reply_text(text: impl Into<String>) -> Self {
        DeviceMessage::Reply(Value::String(text.into()))
    }

    /// Classify a JSON message by its `status` field
    ///
    /// - `raw` becomes [`DeviceMessage::Raw`] using the `text` field
    /// - `error` and `fatal` become the matching notification
    /// - `uploading` and `progress` become [`DeviceMessage::Progress`]
    /// - anything else is a [`DeviceMessage::Reply`]
    pub fn from_json(value: Value) -> Self {
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match status.as_str() {
            "raw" => {
                let text = value
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                DeviceMessage::Raw(text)
            }
            "error" => DeviceMessage::Error(value),
            "fatal" => DeviceMessage::Fatal(value),
            "uploading" | "progress" => DeviceMessage::Progress(value),
            _ => DeviceMessage::Reply(value),
        }
    }

    /// Classify one line of wire text
    ///
    /// JSON objects go through [`DeviceMessage::from_json`]; anything else is
    /// raw text with its line terminator restored.
    pub fn from_line(line: &str) -> Self {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.starts_with('{') {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                return DeviceMessage::from_json(value);
            }
        }
        DeviceMessage::Raw(format!("{}\n", trimmed))
    }

    /// Text form of the payload
    ///
    /// Raw chunks are returned as-is, string replies unquoted, and other
    /// structured payloads prefer their `text` or `info` field before falling
    /// back to compact JSON.
    pub fn text(&self) -> String {
        match self {
            DeviceMessage::Raw(text) => text.clone(),
            DeviceMessage::Reply(value)
            | DeviceMessage::Progress(value)
            | DeviceMessage::Error(value)
            | DeviceMessage::Fatal(value) => value_text(value),
        }
    }

    /// Whether this is a terminal failure notification
    pub fn is_failure(&self) -> bool {
        matches!(self, DeviceMessage::Error(_) | DeviceMessage::Fatal(_))
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => ["text", "info", "error"]
            .iter()
            .find_map(|key| map.get(*key))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_json_status() {
        let msg = DeviceMessage::from_json(json!({"status": "raw", "text": "ok\n"}));
        assert_eq!(msg, DeviceMessage::raw("ok\n"));

        let msg = DeviceMessage::from_json(json!({"status": "fatal", "info": "lost"}));
        assert!(matches!(msg, DeviceMessage::Fatal(_)));
        assert_eq!(msg.text(), "lost");

        let msg = DeviceMessage::from_json(json!({"status": "ok", "cmd": "play report"}));
        assert!(matches!(msg, DeviceMessage::Reply(_)));
    }

    #[test]
    fn test_from_line() {
        assert_eq!(DeviceMessage::from_line("LN3 0\r\n"), DeviceMessage::raw("LN3 0\n"));
        let msg = DeviceMessage::from_line(r#"{"status":"error","error":["BUSY"]}"#);
        assert!(msg.is_failure());
        assert_eq!(msg.text(), r#"["BUSY"]"#);
    }
}
