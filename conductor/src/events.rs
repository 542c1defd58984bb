//! Event stream emitted while a turn runs.
//!
//! The orchestrator only ever writes to an [`EventSink`]; presentation is up
//! to whoever drains the receiving end.

use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};

use serde::Serialize;

use crate::core::types::AgentRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentActivity {
    Active,
    Inactive,
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// The grading cycle accepted the work.
    Accepted,
    /// Attempts ran out below the passing grade.
    NotAccepted,
    /// The plan finished without a grading decision.
    Completed,
    /// An unexpected failure ended the turn.
    Failed,
}

impl TurnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnStatus::Accepted => "accepted",
            TurnStatus::NotAccepted => "not accepted",
            TurnStatus::Completed => "completed",
            TurnStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    System { message: String },
    Error { message: String },
    AgentTextChunk { agent: AgentRole, text: String },
    AgentStatus { agent: AgentRole, status: AgentActivity },
    FileChanged { path: PathBuf },
    Done { status: TurnStatus },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::System { message } => write!(f, "[system] {message}"),
            Event::Error { message } => write!(f, "[error] {message}"),
            Event::AgentTextChunk { text, .. } => f.write_str(text),
            Event::AgentStatus { agent, status } => match status {
                AgentActivity::Active => write!(f, "[{}] working...", agent.display_name()),
                AgentActivity::Inactive => write!(f, "[{}] done", agent.display_name()),
            },
            Event::FileChanged { path } => write!(f, "[file] {}", path.display()),
            Event::Done { status } => write!(f, "[done] {}", status.as_str()),
        }
    }
}

/// Sending half of the event channel. Sends after the receiver hung up are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<Event>,
}

pub fn channel() -> (EventSink, Receiver<Event>) {
    let (tx, rx) = mpsc::channel();
    (EventSink { tx }, rx)
}

impl EventSink {
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn system(&self, message: impl Into<String>) {
        self.emit(Event::System {
            message: message.into(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(Event::Error {
            message: message.into(),
        });
    }

    pub fn agent_status(&self, agent: AgentRole, status: AgentActivity) {
        self.emit(Event::AgentStatus { agent, status });
    }

    pub fn text_chunk(&self, agent: AgentRole, text: &str) {
        if text.is_empty() {
            return;
        }
        self.emit(Event::AgentTextChunk {
            agent,
            text: text.to_string(),
        });
    }

    pub fn file_changed(&self, path: impl Into<PathBuf>) {
        self.emit(Event::FileChanged { path: path.into() });
    }
}
