//! Wire envelopes exchanged with the design host.
//!
//! Every frame is a JSON object with a `type` discriminator. Replies and
//! progress use the host plugin's historical spellings (`command-result`
//! next to `command_progress`), so the tags are listed explicitly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

pub const EXECUTE_COMMAND: &str = "execute-command";
pub const COMMAND_RESULT: &str = "command-result";
pub const COMMAND_ERROR: &str = "command-error";
pub const COMMAND_PROGRESS: &str = "command_progress";
pub const UPDATE_SETTINGS: &str = "update-settings";
pub const NOTIFY: &str = "notify";
pub const CLOSE_PLUGIN: &str = "close-plugin";

/// Caller → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Outbound {
    #[serde(rename = "execute-command")]
    ExecuteCommand {
        id: String,
        command: String,
        params: Value,
    },
    /// Settings-style side channel; the remaining keys are forwarded verbatim.
    #[serde(rename = "update-settings")]
    UpdateSettings {
        #[serde(flatten)]
        settings: Map<String, Value>,
    },
    #[serde(rename = "notify")]
    Notify { message: String },
    #[serde(rename = "close-plugin")]
    ClosePlugin,
}

/// Host → caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    CommandResult { id: String, result: Value },
    CommandError { id: String, error: String },
    Progress(ProgressEvent),
    /// Anything else the host emits (selection changes, document edits).
    /// `payload` is the whole frame.
    Event { event_type: String, payload: Value },
}

impl Inbound {
    /// Classify a raw frame by its `type` tag. Errors describe why the frame is
    /// unroutable; callers log and drop them.
    pub fn classify(frame: Value) -> Result<Inbound, String> {
        let Value::Object(map) = frame else {
            return Err("frame is not a JSON object".into());
        };
        let kind = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or("frame has no string `type`")?
            .to_string();

        match kind.as_str() {
            COMMAND_RESULT => {
                let id = frame_id(&map)?;
                let result = map.get("result").cloned().unwrap_or(Value::Null);
                Ok(Inbound::CommandResult { id, result })
            }
            COMMAND_ERROR => {
                let id = frame_id(&map)?;
                let error = match map.get("error") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => "unknown host error".to_string(),
                    Some(other) => other.to_string(),
                };
                Ok(Inbound::CommandError { id, error })
            }
            COMMAND_PROGRESS => serde_json::from_value::<ProgressEvent>(Value::Object(map))
                .map(Inbound::Progress)
                .map_err(|e| format!("malformed progress frame: {e}")),
            EXECUTE_COMMAND | UPDATE_SETTINGS | NOTIFY | CLOSE_PLUGIN => {
                Err(format!("caller-bound frame `{kind}` received from host"))
            }
            _ => Ok(Inbound::Event {
                event_type: kind,
                payload: Value::Object(map),
            }),
        }
    }
}

fn frame_id(map: &Map<String, Value>) -> Result<String, String> {
    match map.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err("reply frame has no `id`".into()),
    }
}

/// Encode a successful reply, as the host sends it.
pub fn result_frame(id: &str, result: Value) -> Value {
    serde_json::json!({ "type": COMMAND_RESULT, "id": id, "result": result })
}

/// Encode a failed reply, as the host sends it.
pub fn error_frame(id: &str, error: &str) -> Value {
    serde_json::json!({ "type": COMMAND_ERROR, "id": id, "error": error })
}

// ── Progress ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Started,
    InProgress,
    Completed,
    Error,
}

impl ProgressStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Error)
    }
}

/// Out-of-band status of a long-running command. Not a reply: the command
/// still answers with `command-result`/`command-error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub command_id: String,
    pub command_type: String,
    pub status: ProgressStatus,
    /// 0–100, non-decreasing within one command.
    pub progress: u8,
    pub total_items: usize,
    pub processed_items: usize,
    #[serde(default)]
    pub message: String,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    #[ts(type = "number")]
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_chunk: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown")]
    pub payload: Option<Value>,
}

impl ProgressEvent {
    /// The wire form, with the `type` tag the host uses.
    pub fn to_frame(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.insert("type".into(), Value::String(COMMAND_PROGRESS.into()));
        }
        value
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
