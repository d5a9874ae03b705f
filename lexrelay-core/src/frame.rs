//! Upstream event frames.
//!
//! A frame is one JSON object carried by a single `data: ` line. The relay
//! only looks at a handful of fields, so the frame keeps the parsed value
//! loosely typed and holds on to the exact payload text for re-emission.

use serde_json::Value;

pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_AGENT_MESSAGE: &str = "agent_message";
pub const EVENT_WORKFLOW_STARTED: &str = "workflow_started";
pub const EVENT_WORKFLOW_FINISHED: &str = "workflow_finished";

#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    raw: String,
    value: Value,
}

impl EventFrame {
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        let value = serde_json::from_str(payload)?;
        Ok(Self {
            raw: payload.to_string(),
            value,
        })
    }

    /// Payload exactly as received, without the `data: ` prefix.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Event tag, or `""` when the frame carries none.
    pub fn event(&self) -> &str {
        self.value["event"].as_str().unwrap_or("")
    }

    pub fn id(&self) -> Option<&str> {
        self.value["id"].as_str()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.value["conversation_id"].as_str()
    }

    /// `data.outputs.answer` of a `workflow_finished` frame.
    pub fn workflow_answer(&self) -> Option<&str> {
        self.value["data"]["outputs"]["answer"].as_str()
    }

    pub fn is_message(&self) -> bool {
        matches!(self.event(), EVENT_MESSAGE | EVENT_AGENT_MESSAGE)
    }
}
