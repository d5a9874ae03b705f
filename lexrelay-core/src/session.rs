//! Per-request relay state and the forwarding rules.
//!
//! The upstream backend, when running a workflow, emits granular
//! `message`/`agent_message` events and then a `workflow_finished` event with
//! the complete answer. Relaying both duplicates the answer on screen, so a
//! `workflow_started` event latches the session into workflow mode and the
//! granular events are silenced from then on. Outside workflow mode,
//! message events are forwarded at most once per id.

use std::collections::HashSet;

use uuid::Uuid;

use crate::frame::{EventFrame, EVENT_WORKFLOW_FINISHED, EVENT_WORKFLOW_STARTED};
use crate::sse::{parse_line, Line};

/// Decision for one upstream line.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Forward(EventFrame),
    Drop,
    Terminate,
}

/// State for one chat turn. Never shared between requests.
#[derive(Debug)]
pub struct RelaySession {
    id: Uuid,
    is_workflow_mode: bool,
    last_processed_answer: String,
    processed_message_ids: HashSet<String>,
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}

impl RelaySession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            is_workflow_mode: false,
            last_processed_answer: String::new(),
            processed_message_ids: HashSet::new(),
        }
    }

    /// Correlation id for logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_workflow_mode(&self) -> bool {
        self.is_workflow_mode
    }

    pub fn last_processed_answer(&self) -> &str {
        &self.last_processed_answer
    }

    pub fn seen_message_ids(&self) -> usize {
        self.processed_message_ids.len()
    }

    /// Parse one reassembled line and decide what happens to it.
    pub fn process_line(&mut self, line: &str) -> Outcome {
        match parse_line(line) {
            Line::Frame(frame) => self.classify(frame),
            Line::Done => Outcome::Terminate,
            Line::Malformed { payload, error } => {
                tracing::warn!(
                    session_id = %self.id,
                    error = %error,
                    payload_len = payload.len(),
                    "Skipping malformed SSE frame"
                );
                Outcome::Drop
            }
            Line::Ignored => Outcome::Drop,
        }
    }

    /// Apply the forwarding rules to a parsed frame. First matching rule wins.
    pub fn classify(&mut self, frame: EventFrame) -> Outcome {
        if frame.is_message() {
            if self.is_workflow_mode {
                return Outcome::Drop;
            }
            if let Some(id) = frame.id() {
                if !self.processed_message_ids.insert(id.to_string()) {
                    tracing::debug!(session_id = %self.id, message_id = id, "Duplicate message id");
                    return Outcome::Drop;
                }
                return Outcome::Forward(frame);
            }
        }

        match frame.event() {
            EVENT_WORKFLOW_STARTED => {
                self.is_workflow_mode = true;
            }
            EVENT_WORKFLOW_FINISHED => {
                if let Some(answer) = frame.workflow_answer() {
                    if !answer.is_empty() && answer == self.last_processed_answer {
                        tracing::debug!(session_id = %self.id, "Repeated workflow answer");
                        return Outcome::Drop;
                    }
                    self.last_processed_answer = answer.to_string();
                }
            }
            _ => {}
        }

        Outcome::Forward(frame)
    }
}
