//! The bidirectional socket protocol.
//!
//! JSON frames, one per WebSocket text message. Client frames are tagged by
//! `type`, server frames by `event`; both sides tolerate unknown extra
//! fields.

use flowgraph::{Message, UsageMetadata};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A file reference attached to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocRef {
    pub id: String,
    pub filename: String,
    pub mime: String,
    #[serde(default)]
    pub indexed: bool,
}

impl DocRef {
    pub fn is_csv(&self) -> bool {
        self.mime == "text/csv"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Request {
        request_id: String,
        text: String,
        #[serde(default)]
        doc_ids: Vec<DocRef>,
        #[serde(default)]
        provider: Option<String>,
    },
    InterruptReply {
        request_id: String,
        text: String,
    },
    Cancel {
        request_id: String,
    },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Intermediate progress; not persisted, not deduplicated.
    Think {
        request_id: String,
        agent_type: String,
        content: String,
        #[serde(default)]
        additional_kwargs: Map<String, Value>,
    },
    /// User-visible message; gated by the store dedup check.
    Message {
        request_id: String,
        agent_type: String,
        content: String,
        #[serde(default)]
        additional_kwargs: Map<String, Value>,
        id: String,
        #[serde(default)]
        cumulative_usage_metadata: UsageMetadata,
    },
    /// The run is paused awaiting user input.
    Interrupt {
        request_id: String,
        agent_type: String,
        content: String,
        #[serde(default)]
        additional_kwargs: Map<String, Value>,
    },
    Error {
        request_id: String,
        agent_type: String,
        content: String,
        error_type: String,
    },
    Done {
        request_id: String,
        agent_type: String,
    },
    Pong,
}

impl ServerFrame {
    pub fn think(request_id: &str, message: &Message) -> Self {
        ServerFrame::Think {
            request_id: request_id.to_string(),
            agent_type: message.agent_type().unwrap_or_default().to_string(),
            content: message.content.clone(),
            additional_kwargs: message.additional_kwargs.clone(),
        }
    }

    pub fn message(request_id: &str, message: &Message, usage: UsageMetadata) -> Self {
        ServerFrame::Message {
            request_id: request_id.to_string(),
            agent_type: message.agent_type().unwrap_or_default().to_string(),
            content: message.content.clone(),
            additional_kwargs: message.additional_kwargs.clone(),
            id: message.id.clone().unwrap_or_default(),
            cumulative_usage_metadata: usage,
        }
    }

    pub fn interrupt(request_id: &str, agent_type: &str, payload: &Value) -> Self {
        let content = payload
            .get("question")
            .and_then(|q| q.as_str())
            .unwrap_or_default()
            .to_string();
        let additional_kwargs = payload.as_object().cloned().unwrap_or_default();
        ServerFrame::Interrupt {
            request_id: request_id.to_string(),
            agent_type: agent_type.to_string(),
            content,
            additional_kwargs,
        }
    }

    pub fn error(request_id: &str, agent_type: &str, content: &str, error_type: &str) -> Self {
        ServerFrame::Error {
            request_id: request_id.to_string(),
            agent_type: agent_type.to_string(),
            content: content.to_string(),
            error_type: error_type.to_string(),
        }
    }

    pub fn done(request_id: &str, agent_type: &str) -> Self {
        ServerFrame::Done {
            request_id: request_id.to_string(),
            agent_type: agent_type.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_round_trip() {
        let frames = vec![
            ClientFrame::Request {
                request_id: "r1".to_string(),
                text: "Analyze sales.csv trends".to_string(),
                doc_ids: vec![DocRef {
                    id: "f1".to_string(),
                    filename: "sales.csv".to_string(),
                    mime: "text/csv".to_string(),
                    indexed: false,
                }],
                provider: Some("default".to_string()),
            },
            ClientFrame::InterruptReply {
                request_id: "r1".to_string(),
                text: "looks good".to_string(),
            },
            ClientFrame::Cancel {
                request_id: "r1".to_string(),
            },
            ClientFrame::Ping,
        ];
        for frame in frames {
            let encoded = serde_json::to_string(&frame).unwrap();
            let decoded: ClientFrame = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn server_frames_round_trip() {
        let msg = Message::ai("hello")
            .with_id("m1")
            .with_agent_type("planner_end");
        let frames = vec![
            ServerFrame::think("r1", &msg),
            ServerFrame::message("r1", &msg, UsageMetadata::default()),
            ServerFrame::interrupt("r1", "data_science_human_choice", &json!({"question": "ok?"})),
            ServerFrame::error("r1", "planner_end", "boom", "engine_error"),
            ServerFrame::done("r1", "data_science_end"),
            ServerFrame::Pong,
        ];
        for frame in frames {
            let encoded = serde_json::to_string(&frame).unwrap();
            let decoded: ServerFrame = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn request_tag_is_snake_case() {
        let raw = json!({
            "type": "request",
            "request_id": "r1",
            "text": "hi",
        });
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        assert!(matches!(frame, ClientFrame::Request { .. }));
    }

    #[test]
    fn interrupt_frame_extracts_question() {
        let frame = ServerFrame::interrupt(
            "r1",
            "data_science_human_choice",
            &json!({"question": "Approve?", "hypothesis": "X"}),
        );
        match frame {
            ServerFrame::Interrupt { content, additional_kwargs, .. } => {
                assert_eq!(content, "Approve?");
                assert_eq!(additional_kwargs["hypothesis"], json!("X"));
            }
            _ => unreachable!(),
        }
    }
}
