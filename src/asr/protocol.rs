//! Duplex protocol wire messages
//!
//! JSON control envelopes exchanged with the streaming recognition service.
//! The field names are part of the wire contract and must not be renamed.

use serde::{Deserialize, Serialize};
use serde_json::json;

pub const DEFAULT_ENDPOINT: &str = "wss://dashscope.aliyuncs.com/api-ws/v1/inference/";
pub const DEFAULT_MODEL: &str = "fun-asr-realtime";

/// Outbound control envelope (`run-task` / `finish-task`).
#[derive(Debug, Serialize)]
pub struct Command {
    pub header: CommandHeader,
    pub payload: CommandPayload,
}

#[derive(Debug, Serialize)]
pub struct CommandHeader {
    pub action: String,
    pub task_id: String,
    pub streaming: String,
}

#[derive(Debug, Serialize)]
pub struct CommandPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<AudioParameters>,
    pub input: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct AudioParameters {
    pub format: String,
    pub sample_rate: u32,
}

impl Command {
    pub fn run_task(task_id: &str, model: &str, sample_rate: u32) -> Self {
        Self {
            header: CommandHeader {
                action: "run-task".into(),
                task_id: task_id.into(),
                streaming: "duplex".into(),
            },
            payload: CommandPayload {
                task_group: Some("audio".into()),
                task: Some("asr".into()),
                function: Some("recognition".into()),
                model: Some(model.into()),
                parameters: Some(AudioParameters {
                    format: "pcm".into(),
                    sample_rate,
                }),
                input: json!({}),
            },
        }
    }

    pub fn finish_task(task_id: &str) -> Self {
        Self {
            header: CommandHeader {
                action: "finish-task".into(),
                task_id: task_id.into(),
                streaming: "duplex".into(),
            },
            payload: CommandPayload {
                task_group: None,
                task: None,
                function: None,
                model: None,
                parameters: None,
                input: json!({}),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Inbound control envelope.
#[derive(Debug, Deserialize)]
pub struct Event {
    pub header: EventHeader,
    #[serde(default)]
    pub payload: Option<EventPayload>,
}

#[derive(Debug, Deserialize)]
pub struct EventHeader {
    pub event: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub output: Option<EventOutput>,
}

#[derive(Debug, Deserialize)]
pub struct EventOutput {
    #[serde(default)]
    pub sentence: Option<Sentence>,
}

#[derive(Debug, Deserialize)]
pub struct Sentence {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sentence_end: bool,
}

/// A decoded inbound message, reduced to what the client state machine needs.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    TaskStarted,
    ResultGenerated { text: String, is_final: bool },
    TaskFinished,
    TaskFailed { message: String },
    /// Unknown event names are ignored rather than treated as failures.
    Other(String),
}

pub fn parse_server_event(raw: &str) -> serde_json::Result<ServerEvent> {
    let event: Event = serde_json::from_str(raw)?;
    Ok(match event.header.event.as_str() {
        "task-started" => ServerEvent::TaskStarted,
        "task-finished" => ServerEvent::TaskFinished,
        "task-failed" => ServerEvent::TaskFailed {
            message: event
                .header
                .error_message
                .unwrap_or_else(|| "unknown error".into()),
        },
        "result-generated" => {
            let sentence = event
                .payload
                .and_then(|p| p.output)
                .and_then(|o| o.sentence);
            match sentence {
                Some(s) => ServerEvent::ResultGenerated {
                    text: s.text,
                    is_final: s.sentence_end,
                },
                None => ServerEvent::Other("result-generated".into()),
            }
        }
        other => ServerEvent::Other(other.into()),
    })
}
