//! Language-model backend abstraction.
//!
//! The [`LlmClient`] trait decouples orchestration from the model service.
//! [`CommandClient`] talks to an external backend process over a JSON-lines
//! protocol; tests use scripted clients that replay canned replies.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::types::AgentRole;
use crate::io::config::LlmConfig;
use crate::io::process::run_command_streaming;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPart {
    Text(String),
    Image {
        label: String,
        mime: String,
        data: Vec<u8>,
    },
}

impl PromptPart {
    pub fn text(text: impl Into<String>) -> Self {
        PromptPart::Text(text.into())
    }
}

/// One model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    /// Agent the call is made for; `None` for image generation.
    pub agent: Option<AgentRole>,
    pub modality: Modality,
    pub parts: Vec<PromptPart>,
    pub streaming: bool,
}

impl GenerateRequest {
    pub fn text(agent: AgentRole, parts: Vec<PromptPart>) -> Self {
        Self {
            agent: Some(agent),
            modality: Modality::Text,
            parts,
            streaming: true,
        }
    }

    pub fn image(prompt: &str) -> Self {
        Self {
            agent: None,
            modality: Modality::Image,
            parts: vec![PromptPart::text(prompt)],
            streaming: false,
        }
    }

    /// All text parts joined, for logs and assertions.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                PromptPart::Text(text) => Some(text.as_str()),
                PromptPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Text(String),
    InlineBinary { mime: String, data: Vec<u8> },
}

/// Abstraction over model backends.
pub trait LlmClient: Send + Sync {
    /// Run one call, handing each chunk to `on_chunk` as it arrives.
    fn generate(&self, request: &GenerateRequest, on_chunk: &mut dyn FnMut(Chunk)) -> Result<()>;
}

/// Accumulated reply of one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generated {
    pub text: String,
    pub binaries: Vec<(String, Vec<u8>)>,
}

/// Run a call to completion, forwarding text chunks to `on_text` immediately.
pub fn collect(
    client: &dyn LlmClient,
    request: &GenerateRequest,
    on_text: &mut dyn FnMut(&str),
) -> Result<Generated> {
    let mut out = Generated::default();
    client.generate(request, &mut |chunk| match chunk {
        Chunk::Text(text) => {
            on_text(&text);
            out.text.push_str(&text);
        }
        Chunk::InlineBinary { mime, data } => out.binaries.push((mime, data)),
    })?;
    Ok(out)
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    modality: Modality,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent: Option<&'static str>,
    stream: bool,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireInline {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WirePart {
    Text { text: String },
    Inline { inline_data: WireInline },
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<WireInline>,
    #[serde(default)]
    error: Option<String>,
}

/// Client that spawns a backend command per call.
///
/// The request is one JSON object on stdin. Each stdout line is a JSON chunk
/// `{"text": ...}`, `{"inline_data": {"mime_type", "data"}}` (base64) or
/// `{"error": ...}`; any other line is passed through as text.
#[derive(Debug, Clone)]
pub struct CommandClient {
    command: Vec<String>,
    text_model: String,
    image_model: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandClient {
    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            text_model: cfg.text_model.clone(),
            image_model: cfg.image_model.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    fn wire_request(&self, request: &GenerateRequest) -> Result<Vec<u8>> {
        let model = match request.modality {
            Modality::Text => &self.text_model,
            Modality::Image => &self.image_model,
        };
        let parts = request
            .parts
            .iter()
            .map(|part| match part {
                PromptPart::Text(text) => WirePart::Text { text: text.clone() },
                PromptPart::Image { label, mime, data } => {
                    debug!(label, bytes = data.len(), "attaching image part");
                    WirePart::Inline {
                        inline_data: WireInline {
                            mime_type: mime.clone(),
                            data: BASE64.encode(data),
                        },
                    }
                }
            })
            .collect();
        let wire = WireRequest {
            model,
            modality: request.modality,
            agent: request.agent.map(AgentRole::as_str),
            stream: request.streaming,
            parts,
        };
        let mut buf = serde_json::to_vec(&wire).context("serialize model request")?;
        buf.push(b'\n');
        Ok(buf)
    }
}

impl LlmClient for CommandClient {
    #[instrument(skip_all, fields(agent = ?request.agent, modality = ?request.modality))]
    fn generate(&self, request: &GenerateRequest, on_chunk: &mut dyn FnMut(Chunk)) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("llm.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        let input = self.wire_request(request)?;

        let mut backend_error: Option<String> = None;
        let mut decode_error: Option<anyhow::Error> = None;
        let output = run_command_streaming(
            cmd,
            Some(&input),
            self.timeout,
            self.output_limit_bytes,
            &mut |line| {
                if backend_error.is_some() || decode_error.is_some() {
                    return;
                }
                match decode_line(line) {
                    Ok(DecodedLine::Chunk(chunk)) => on_chunk(chunk),
                    Ok(DecodedLine::Error(msg)) => backend_error = Some(msg),
                    Ok(DecodedLine::Empty) => {}
                    Err(err) => decode_error = Some(err),
                }
            },
        )
        .context("run model backend")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model backend timed out");
            return Err(anyhow!("model backend timed out after {:?}", self.timeout));
        }
        if let Some(err) = decode_error {
            return Err(err);
        }
        if let Some(msg) = backend_error {
            return Err(anyhow!("model backend error: {msg}"));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model backend failed");
            return Err(anyhow!(
                "model backend failed with status {:?}: {}",
                output.status.code(),
                output.stderr_lossy().trim()
            ));
        }
        Ok(())
    }
}

enum DecodedLine {
    Chunk(Chunk),
    Error(String),
    Empty,
}

fn decode_line(line: &[u8]) -> Result<DecodedLine> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(DecodedLine::Empty);
    }
    let Ok(chunk) = serde_json::from_str::<WireChunk>(trimmed) else {
        return Ok(DecodedLine::Chunk(Chunk::Text(text.into_owned())));
    };
    if let Some(msg) = chunk.error {
        return Ok(DecodedLine::Error(msg));
    }
    if let Some(inline) = chunk.inline_data {
        let data = BASE64
            .decode(inline.data.as_bytes())
            .context("decode inline data")?;
        return Ok(DecodedLine::Chunk(Chunk::InlineBinary {
            mime: inline.mime_type,
            data,
        }));
    }
    match chunk.text {
        Some(text) => Ok(DecodedLine::Chunk(Chunk::Text(text))),
        None => Ok(DecodedLine::Empty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_text(line: &str) -> Option<String> {
        match decode_line(line.as_bytes()).expect("decode") {
            DecodedLine::Chunk(Chunk::Text(text)) => Some(text),
            _ => None,
        }
    }

    #[test]
    fn decodes_protocol_lines() {
        assert_eq!(decode_text(r#"{"text":"hi"}"#).as_deref(), Some("hi"));
        assert_eq!(decode_text("plain words\n").as_deref(), Some("plain words\n"));
        assert!(matches!(
            decode_line(br#"{"inline_data":{"mime_type":"image/png","data":"AQID"}}"#),
            Ok(DecodedLine::Chunk(Chunk::InlineBinary { ref data, .. })) if data == &vec![1, 2, 3]
        ));
        assert!(matches!(
            decode_line(br#"{"error":"quota"}"#),
            Ok(DecodedLine::Error(ref msg)) if msg == "quota"
        ));
        assert!(matches!(decode_line(b"   \n"), Ok(DecodedLine::Empty)));
    }

    #[test]
    fn wire_request_encodes_images() {
        let client = CommandClient::from_config(&LlmConfig::default());
        let request = GenerateRequest::text(
            AgentRole::ArtCritic,
            vec![
                PromptPart::text("look"),
                PromptPart::Image {
                    label: "a.png".into(),
                    mime: "image/png".into(),
                    data: vec![1, 2, 3],
                },
            ],
        );
        let wire: serde_json::Value =
            serde_json::from_slice(&client.wire_request(&request).expect("wire")).expect("json");
        assert_eq!(wire["agent"], "art_critic");
        assert_eq!(wire["modality"], "text");
        assert_eq!(wire["parts"][1]["inline_data"]["data"], "AQID");
    }

    #[cfg(unix)]
    #[test]
    fn command_client_streams_backend_output() {
        let cfg = LlmConfig {
            command: vec![
                "sh".into(),
                "-c".into(),
                r#"cat >/dev/null; echo '{"text":"GRADE: 80/100"}'; echo '{"inline_data":{"mime_type":"image/png","data":"AQID"}}'"#.into(),
            ],
            ..LlmConfig::default()
        };
        let client = CommandClient::from_config(&cfg);
        let mut seen = Vec::new();
        let out = collect(
            &client,
            &GenerateRequest::text(AgentRole::CodeCritic, vec![PromptPart::text("x")]),
            &mut |t| seen.push(t.to_string()),
        )
        .expect("collect");
        assert_eq!(out.text, "GRADE: 80/100");
        assert_eq!(seen, vec!["GRADE: 80/100".to_string()]);
        assert_eq!(out.binaries, vec![("image/png".to_string(), vec![1, 2, 3])]);
    }

    #[cfg(unix)]
    #[test]
    fn command_client_reports_backend_errors() {
        let cfg = LlmConfig {
            command: vec![
                "sh".into(),
                "-c".into(),
                r#"cat >/dev/null; echo '{"error":"quota exceeded"}'"#.into(),
            ],
            ..LlmConfig::default()
        };
        let err = CommandClient::from_config(&cfg)
            .generate(
                &GenerateRequest::text(AgentRole::Planner, vec![PromptPart::text("x")]),
                &mut |_| {},
            )
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }
}
