//! Versioned host command/event envelopes for shell integration.

use crate::error::TellerError;
use serde::{Deserialize, Serialize};

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// V1 command set for host integrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "host.stop")]
    HostStop,
    #[serde(rename = "chat.send")]
    ChatSend,
    #[serde(rename = "chat.cancel")]
    ChatCancel,
    #[serde(rename = "chat.clear")]
    ChatClear,
    #[serde(rename = "chat.messages")]
    ChatMessages,
    #[serde(rename = "connection.test")]
    ConnectionTest,
    #[serde(rename = "connection.status")]
    ConnectionStatus,
    #[serde(rename = "models.list")]
    ModelsList,
    #[serde(rename = "config.get")]
    ConfigGet,
    #[serde(rename = "config.save")]
    ConfigSave,
    #[serde(rename = "actions.list")]
    ActionsList,
}

impl CommandName {
    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::HostStop => "host.stop",
            Self::ChatSend => "chat.send",
            Self::ChatCancel => "chat.cancel",
            Self::ChatClear => "chat.clear",
            Self::ChatMessages => "chat.messages",
            Self::ConnectionTest => "connection.test",
            Self::ConnectionStatus => "connection.status",
            Self::ModelsList => "models.list",
            Self::ConfigGet => "config.get",
            Self::ConfigSave => "config.save",
            Self::ActionsList => "actions.list",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "host.ping" => Some(Self::HostPing),
            "host.stop" => Some(Self::HostStop),
            "chat.send" => Some(Self::ChatSend),
            "chat.cancel" => Some(Self::ChatCancel),
            "chat.clear" => Some(Self::ChatClear),
            "chat.messages" => Some(Self::ChatMessages),
            "connection.test" => Some(Self::ConnectionTest),
            "connection.status" => Some(Self::ConnectionStatus),
            "models.list" => Some(Self::ModelsList),
            "config.get" => Some(Self::ConfigGet),
            "config.save" => Some(Self::ConfigSave),
            "actions.list" => Some(Self::ActionsList),
            _ => None,
        }
    }
}

/// A versioned command envelope from frontend -> backend host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    /// Build a v1 command envelope.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    ///
    /// # Errors
    ///
    /// [`TellerError::Validation`] on a version mismatch or an empty
    /// `request_id`.
    pub fn validate(&self) -> Result<(), TellerError> {
        if self.v != EVENT_VERSION {
            return Err(TellerError::Validation(format!(
                "unsupported contract version {}; expected {}",
                self.v, EVENT_VERSION
            )));
        }
        if self.request_id.trim().is_empty() {
            return Err(TellerError::Validation(
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A versioned response envelope from backend host -> frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Build a successful response envelope.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    /// Build an error response envelope.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned event envelope from backend host -> frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build a v1 event envelope.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    const ALL_COMMANDS: &[CommandName] = &[
        CommandName::HostPing,
        CommandName::HostStop,
        CommandName::ChatSend,
        CommandName::ChatCancel,
        CommandName::ChatClear,
        CommandName::ChatMessages,
        CommandName::ConnectionTest,
        CommandName::ConnectionStatus,
        CommandName::ModelsList,
        CommandName::ConfigGet,
        CommandName::ConfigSave,
        CommandName::ActionsList,
    ];

    #[test]
    fn command_names_round_trip_as_str_parse() {
        for command in ALL_COMMANDS {
            assert_eq!(CommandName::parse(command.as_str()), Some(*command));
        }
        assert_eq!(CommandName::parse("chat.unknown"), None);
    }

    #[test]
    fn command_serde_uses_dotted_names() {
        let json = serde_json::to_string(&CommandName::ChatSend).unwrap();
        assert_eq!(json, "\"chat.send\"");
        let parsed: CommandName = serde_json::from_str("\"connection.test\"").unwrap();
        assert_eq!(parsed, CommandName::ConnectionTest);
    }

    #[test]
    fn command_envelope_roundtrip_json() {
        let envelope = CommandEnvelope::new(
            "req-1",
            CommandName::ChatSend,
            serde_json::json!({"text": "hello"}),
        );
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: CommandEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn response_envelope_roundtrip_json() {
        let resp = ResponseEnvelope::ok("req-1", serde_json::json!({"pong": true}));
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: ResponseEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn validate_rejects_wrong_version() {
        let mut envelope =
            CommandEnvelope::new("req-1", CommandName::HostPing, serde_json::json!({}));
        envelope.v = 99;
        assert!(envelope.validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_request_id() {
        let envelope = CommandEnvelope::new("  ", CommandName::HostPing, serde_json::json!({}));
        assert!(envelope.validate().is_err());
    }

    #[test]
    fn error_envelope_carries_message_and_null_payload() {
        let resp = ResponseEnvelope::error("req-9", "[VALIDATION_FAILED] bad");
        assert!(!resp.ok);
        assert_eq!(resp.payload, serde_json::Value::Null);
        assert_eq!(resp.error.as_deref(), Some("[VALIDATION_FAILED] bad"));
    }
}
