//! Stdin/stdout JSON bridge for the host command channel.
//!
//! Reads newline-delimited JSON `CommandEnvelope` messages from stdin,
//! dispatches them against the shared [`Assistant`], and writes
//! `ResponseEnvelope` and `EventEnvelope` messages as newline-delimited
//! JSON to stdout.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use crate::assistant::Assistant;
use crate::config::LocalAiConfig;
use crate::error::{Result, TellerError};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::registry::RefreshMode;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Run the stdin/stdout JSON bridge until stdin closes or a `host.stop`
/// command is received.
///
/// Two concurrent parts operate in parallel:
///
/// 1. **Reader** -- reads newline-delimited JSON from stdin, dispatches each
///    `CommandEnvelope` against the assistant, and writes the resulting
///    `ResponseEnvelope` to stdout.
/// 2. **Event forwarder** -- receives session events from the assistant's
///    observer hook and writes them as `EventEnvelope` JSON lines to stdout.
///
/// The bridge exits when the reader finishes (either stdin EOF or
/// `host.stop`); the event forwarder is aborted at that point.
pub async fn run_stdio_bridge(assistant: Assistant) -> Result<()> {
    let assistant = Arc::new(assistant);

    let stdout = tokio::io::stdout();
    let writer = Arc::new(Mutex::new(BufWriter::new(stdout)));

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    assistant.set_observer(Box::new(move |event| {
        let _ = event_tx.send(event);
    }));

    // Spawn the event forwarder task.
    let event_writer = Arc::clone(&writer);
    let event_handle = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let payload = match serde_json::to_value(&event) {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize session event; skipping");
                    continue;
                }
            };
            let envelope = EventEnvelope::new(Uuid::new_v4().to_string(), event.name(), payload);
            match serde_json::to_string(&envelope) {
                Ok(json) => {
                    let mut w = event_writer.lock().await;
                    if let Err(e) = write_line(&mut w, &json).await {
                        tracing::warn!(
                            error = %e,
                            "failed to write event envelope to stdout; stopping event forwarder"
                        );
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "failed to serialize event envelope; skipping"
                    );
                }
            }
        }
        tracing::info!("session event channel closed; stopping event forwarder");
    });

    // Run the reader on the current task (not spawned) so that when it
    // finishes we can cleanly shut down.
    let reader_result = run_reader(&assistant, Arc::clone(&writer)).await;

    event_handle.abort();
    let _ = event_handle.await;

    reader_result
}

/// Read stdin line-by-line, dispatch each command, and write responses.
async fn run_reader(
    assistant: &Assistant,
    writer: Arc<Mutex<BufWriter<tokio::io::Stdout>>>,
) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| TellerError::Channel(format!("failed to read from stdin: {e}")))?;

        // EOF
        if bytes_read == 0 {
            tracing::info!("stdin closed (EOF); shutting down stdio bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    raw_line = %trimmed,
                    "failed to parse command envelope from stdin"
                );
                let error_response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                let json = serde_json::to_string(&error_response).map_err(|se| {
                    TellerError::Channel(format!("failed to serialize parse-error response: {se}"))
                })?;
                let mut w = writer.lock().await;
                write_line(&mut w, &json).await?;
                continue;
            }
        };

        let is_stop = envelope.command == CommandName::HostStop;

        let response = handle_command(assistant, &envelope).await;

        let json = serde_json::to_string(&response).map_err(|e| {
            TellerError::Channel(format!("failed to serialize response envelope: {e}"))
        })?;

        {
            let mut w = writer.lock().await;
            write_line(&mut w, &json).await?;
        }

        if is_stop {
            tracing::info!("host.stop received; shutting down stdio bridge");
            break;
        }
    }

    Ok(())
}

/// Validate an envelope and dispatch its command against the assistant.
///
/// Never fails: command errors come back as error response envelopes.
pub async fn handle_command(assistant: &Assistant, envelope: &CommandEnvelope) -> ResponseEnvelope {
    if let Err(e) = envelope.validate() {
        return ResponseEnvelope::error(envelope.request_id.clone(), e.to_string());
    }
    match dispatch(assistant, envelope.command, &envelope.payload).await {
        Ok(payload) => ResponseEnvelope::ok(envelope.request_id.clone(), payload),
        Err(e) => ResponseEnvelope::error(envelope.request_id.clone(), e.to_string()),
    }
}

async fn dispatch(assistant: &Assistant, command: CommandName, payload: &Value) -> Result<Value> {
    match command {
        CommandName::HostPing => Ok(serde_json::json!({"pong": true})),
        CommandName::HostStop => Ok(serde_json::json!({"stopped": true})),
        CommandName::ChatSend => {
            let text = payload_str(payload, "text")?;
            let context = payload_context(payload);
            let receipt = assistant.send_message(&text, context)?;
            Ok(serde_json::json!(receipt))
        }
        CommandName::ChatCancel => {
            assistant.cancel_request();
            Ok(serde_json::json!({"cancelled": true}))
        }
        CommandName::ChatClear => {
            assistant.clear_messages()?;
            Ok(serde_json::json!({"cleared": true}))
        }
        CommandName::ChatMessages => Ok(serde_json::json!({"messages": assistant.messages()})),
        CommandName::ConnectionTest => Ok(serde_json::json!(assistant.test_connection().await)),
        CommandName::ConnectionStatus => {
            Ok(serde_json::json!({"status": assistant.connection_status()}))
        }
        CommandName::ModelsList => {
            let blocking = payload
                .get("blocking")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            let mode = if blocking {
                RefreshMode::Blocking
            } else {
                RefreshMode::NonBlocking
            };
            let models = assistant.list_models(mode).await;
            Ok(serde_json::json!({"models": models}))
        }
        CommandName::ConfigGet => Ok(serde_json::json!(assistant.config())),
        CommandName::ConfigSave => {
            let config: LocalAiConfig = serde_json::from_value(payload.clone())
                .map_err(|e| TellerError::Validation(format!("invalid config payload: {e}")))?;
            assistant.save_config(&config)?;
            Ok(serde_json::json!({"saved": true}))
        }
        CommandName::ActionsList => {
            let context = payload_context(payload);
            Ok(serde_json::json!({"actions": assistant.quick_actions(context.as_ref())}))
        }
    }
}

/// Extract a required string field from a command payload.
fn payload_str(payload: &Value, key: &str) -> Result<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| TellerError::Validation(format!("payload is missing string field `{key}`")))
}

/// Extract the optional `context` object from a command payload.
fn payload_context(payload: &Value) -> Option<serde_json::Map<String, Value>> {
    payload.get("context").and_then(Value::as_object).cloned()
}

/// Write a single JSON line to the buffered writer and flush.
async fn write_line(writer: &mut BufWriter<tokio::io::Stdout>, json: &str) -> Result<()> {
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| TellerError::Channel(format!("failed to write to stdout: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| TellerError::Channel(format!("failed to write newline to stdout: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| TellerError::Channel(format!("failed to flush stdout: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::error::error_codes;
    use crate::host::contract::EVENT_VERSION;
    use crate::store::MemoryStore;

    fn bridge_assistant() -> Assistant {
        Assistant::builder()
            .store(Arc::new(MemoryStore::new()))
            .cloud_base_url("http://127.0.0.1:9")
            .build()
            .expect("assistant should build with an in-memory store")
    }

    fn envelope(command: CommandName, payload: Value) -> CommandEnvelope {
        CommandEnvelope::new("req-1", command, payload)
    }

    #[tokio::test]
    async fn ping_returns_pong() {
        let assistant = bridge_assistant();
        let resp =
            handle_command(&assistant, &envelope(CommandName::HostPing, serde_json::json!({})))
                .await;
        assert!(resp.ok);
        assert_eq!(resp.payload["pong"], true);
    }

    #[tokio::test]
    async fn stop_acknowledges() {
        let assistant = bridge_assistant();
        let resp =
            handle_command(&assistant, &envelope(CommandName::HostStop, serde_json::json!({})))
                .await;
        assert!(resp.ok);
        assert_eq!(resp.payload["stopped"], true);
    }

    #[tokio::test]
    async fn messages_start_empty() {
        let assistant = bridge_assistant();
        let resp = handle_command(
            &assistant,
            &envelope(CommandName::ChatMessages, serde_json::json!({})),
        )
        .await;
        assert!(resp.ok);
        assert_eq!(resp.payload["messages"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn config_get_returns_defaults() {
        let assistant = bridge_assistant();
        let resp =
            handle_command(&assistant, &envelope(CommandName::ConfigGet, serde_json::json!({})))
                .await;
        assert!(resp.ok);
        assert_eq!(resp.payload["endpoint_url"], "http://localhost:11434");
        assert_eq!(resp.payload["enable_fallback"], true);
    }

    #[tokio::test]
    async fn config_save_then_get_roundtrip() {
        let assistant = bridge_assistant();
        let save = handle_command(
            &assistant,
            &envelope(
                CommandName::ConfigSave,
                serde_json::json!({
                    "endpoint_url": "http://10.0.0.8:11434",
                    "default_model": "mistral",
                    "enable_fallback": false,
                    "timeout_ms": 30_000,
                }),
            ),
        )
        .await;
        assert!(save.ok, "save failed: {:?}", save.error);
        assert_eq!(save.payload["saved"], true);

        let get =
            handle_command(&assistant, &envelope(CommandName::ConfigGet, serde_json::json!({})))
                .await;
        assert_eq!(get.payload["endpoint_url"], "http://10.0.0.8:11434");
        assert_eq!(get.payload["default_model"], "mistral");
        assert_eq!(get.payload["enable_fallback"], false);
    }

    #[tokio::test]
    async fn malformed_config_payload_rejected() {
        let assistant = bridge_assistant();
        let resp = handle_command(
            &assistant,
            &envelope(
                CommandName::ConfigSave,
                serde_json::json!({"timeout_ms": "soon"}),
            ),
        )
        .await;
        assert!(!resp.ok);
        let error = resp.error.unwrap();
        assert!(error.contains(error_codes::VALIDATION_FAILED), "{error}");
    }

    #[tokio::test]
    async fn blank_chat_send_rejected() {
        let assistant = bridge_assistant();
        let resp = handle_command(
            &assistant,
            &envelope(CommandName::ChatSend, serde_json::json!({"text": "   "})),
        )
        .await;
        assert!(!resp.ok);
        let error = resp.error.unwrap();
        assert!(error.contains(error_codes::VALIDATION_FAILED), "{error}");
    }

    #[tokio::test]
    async fn chat_send_without_text_field_rejected() {
        let assistant = bridge_assistant();
        let resp =
            handle_command(&assistant, &envelope(CommandName::ChatSend, serde_json::json!({})))
                .await;
        assert!(!resp.ok);
        assert!(resp.error.unwrap().contains("text"));
    }

    #[tokio::test]
    async fn cancel_without_pending_request_is_ok() {
        let assistant = bridge_assistant();
        let resp = handle_command(
            &assistant,
            &envelope(CommandName::ChatCancel, serde_json::json!({})),
        )
        .await;
        assert!(resp.ok);
        assert_eq!(resp.payload["cancelled"], true);
    }

    #[tokio::test]
    async fn actions_list_renders_context() {
        let assistant = bridge_assistant();
        let resp = handle_command(
            &assistant,
            &envelope(
                CommandName::ActionsList,
                serde_json::json!({"context": {"company": "Acme Industrial"}}),
            ),
        )
        .await;
        assert!(resp.ok);
        let actions = resp.payload["actions"].as_array().unwrap();
        assert!(!actions.is_empty());
        let rendered = serde_json::to_string(&actions).unwrap();
        assert!(rendered.contains("Acme Industrial"));
    }

    #[tokio::test]
    async fn version_mismatch_rejected() {
        let assistant = bridge_assistant();
        let mut bad = envelope(CommandName::HostPing, serde_json::json!({}));
        bad.v = 2;
        let resp = handle_command(&assistant, &bad).await;
        assert!(!resp.ok);
        assert!(resp.error.unwrap().contains("version"));
    }

    #[test]
    fn parse_error_response_is_well_formed() {
        let resp = ResponseEnvelope::error("parse-error", "bad json");
        assert!(!resp.ok);
        assert_eq!(resp.request_id, "parse-error");
        assert_eq!(resp.v, EVENT_VERSION);
        assert!(resp.error.is_some());
    }
}
