//! Bounded conversation and error logs shared across agents within a session.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Size at which the conversation log is truncated.
pub const HISTORY_LIMIT: usize = 20;
/// Entries kept after truncation.
pub const HISTORY_KEEP: usize = 15;
/// Errors kept in the rolling error list.
pub const ERROR_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Role rendered as a title, `main_coder` -> `Main Coder`.
    pub fn role_title(&self) -> String {
        self.role
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Append-only conversation log, truncated to the newest entries when it grows too large.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    entries: Vec<LogEntry>,
}

impl ConversationLog {
    pub fn push(&mut self, role: &str, content: &str) {
        self.push_at(role, content, Utc::now());
    }

    pub fn push_at(&mut self, role: &str, content: &str, timestamp: DateTime<Utc>) {
        self.entries.push(LogEntry {
            role: role.to_string(),
            content: content.to_string(),
            timestamp,
        });
        if self.entries.len() > HISTORY_LIMIT {
            let drop = self.entries.len() - HISTORY_KEEP;
            self.entries.drain(..drop);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// The newest `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> &[LogEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// `Role: content` lines for the newest `n` entries, each capped at `max_chars`.
    pub fn summary(&self, n: usize, max_chars: usize) -> String {
        if self.entries.is_empty() {
            return "No recent conversation".to_string();
        }
        self.tail(n)
            .iter()
            .map(|entry| format!("{}: {}", entry.role_title(), clip(&entry.content, max_chars)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Truncate to `max_chars` characters, marking the cut with `...`.
pub fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Rolling list of recent error messages fed back into prompts.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    entries: VecDeque<String>,
}

impl ErrorLog {
    pub fn push(&mut self, message: impl Into<String>) {
        self.entries.push_back(message.into());
        while self.entries.len() > ERROR_LIMIT {
            self.entries.pop_front();
        }
    }

    /// The newest `n` errors, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&str> {
        let start = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(start).map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_truncates_to_newest_fifteen_past_twenty() {
        let mut log = ConversationLog::default();
        for i in 0..20 {
            log.push("user", &format!("m{i}"));
        }
        assert_eq!(log.len(), 20);
        log.push("user", "m20");
        assert_eq!(log.len(), HISTORY_KEEP);
        assert_eq!(log.entries()[0].content, "m6");
        assert_eq!(log.tail(1)[0].content, "m20");
    }

    #[test]
    fn summary_titles_roles_and_clips() {
        let mut log = ConversationLog::default();
        log.push("main_coder", &"x".repeat(10));
        assert_eq!(log.summary(6, 4), "Main Coder: xxxx...");
        assert_eq!(ConversationLog::default().summary(6, 4), "No recent conversation");
    }

    #[test]
    fn error_log_is_bounded() {
        let mut errors = ErrorLog::default();
        for i in 0..25 {
            errors.push(format!("e{i}"));
        }
        assert_eq!(errors.len(), ERROR_LIMIT);
        assert_eq!(errors.recent(3), vec!["e22", "e23", "e24"]);
    }
}
