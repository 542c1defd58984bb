//! Test-only helpers: a scripted model backend and throwaway sessions.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::AgentRole;
use crate::io::config::ConductorConfig;
use crate::io::llm::{Chunk, GenerateRequest, LlmClient, Modality};
use crate::session::Session;

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

/// Model backend that replays queued replies per agent role.
///
/// Text replies are streamed in two chunks. An empty queue is a backend
/// error, so a test fails loudly when the engine makes an unexpected call.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    replies: Mutex<BTreeMap<AgentRole, VecDeque<Reply>>>,
    images: Mutex<VecDeque<Vec<u8>>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text reply for `role`.
    pub fn reply(&self, role: AgentRole, text: impl Into<String>) -> &Self {
        lock(&self.replies)
            .entry(role)
            .or_default()
            .push_back(Reply::Text(text.into()));
        self
    }

    /// Queue a backend failure for `role`.
    pub fn fail(&self, role: AgentRole, message: impl Into<String>) -> &Self {
        lock(&self.replies)
            .entry(role)
            .or_default()
            .push_back(Reply::Fail(message.into()));
        self
    }

    /// Queue bytes for the next image generation call.
    pub fn image(&self, bytes: Vec<u8>) -> &Self {
        lock(&self.images).push_back(bytes);
        self
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        lock(&self.requests).clone()
    }

    /// Number of text calls made on behalf of `role`.
    pub fn calls(&self, role: AgentRole) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.agent == Some(role))
            .count()
    }
}

impl LlmClient for ScriptedClient {
    fn generate(&self, request: &GenerateRequest, on_chunk: &mut dyn FnMut(Chunk)) -> Result<()> {
        lock(&self.requests).push(request.clone());

        if request.modality == Modality::Image {
            let bytes = lock(&self.images)
                .pop_front()
                .ok_or_else(|| anyhow!("no scripted image"))?;
            on_chunk(Chunk::InlineBinary {
                mime: "image/png".to_string(),
                data: bytes,
            });
            return Ok(());
        }

        let role = request
            .agent
            .ok_or_else(|| anyhow!("text request without an agent"))?;
        let reply = lock(&self.replies)
            .get_mut(&role)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| anyhow!("no scripted reply for {role}"))?;
        match reply {
            Reply::Text(text) => {
                let mid = text
                    .char_indices()
                    .map(|(idx, _)| idx)
                    .nth(text.chars().count() / 2)
                    .unwrap_or(text.len());
                on_chunk(Chunk::Text(text[..mid].to_string()));
                on_chunk(Chunk::Text(text[mid..].to_string()));
                Ok(())
            }
            Reply::Fail(message) => Err(anyhow!(message)),
        }
    }
}

/// Config rooted in `dir`, with the enhancer off so tests script only what they need.
pub fn test_config(dir: &std::path::Path) -> ConductorConfig {
    let mut config = ConductorConfig {
        enhancer_enabled: false,
        ..ConductorConfig::default()
    };
    config.process.timeout_secs = 10;
    config.rebase(dir)
}

/// Fresh session over a temporary directory. Keep the `TempDir` alive.
pub fn test_session(client: Arc<ScriptedClient>) -> (TempDir, Session) {
    let temp = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let session = Session::open(test_config(temp.path()), client)
        .unwrap_or_else(|err| panic!("open session: {err:#}"));
    (temp, session)
}
