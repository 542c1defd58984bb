//! Trailing `REQUEST_REPLAN:` directive in implementer output.

pub const REPLAN_PREFIX: &str = "REQUEST_REPLAN:";

/// Implementer text split into what is shown and an optional re-plan reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutput {
    pub display_text: String,
    pub replan_reason: Option<String>,
}

/// Detect a re-plan directive on the last non-empty line and strip it.
///
/// Only the final non-empty line counts; a directive earlier in the text is
/// ordinary content.
pub fn split_replan(text: &str) -> SplitOutput {
    let lines: Vec<&str> = text.lines().collect();
    let Some(last_idx) = lines.iter().rposition(|line| !line.trim().is_empty()) else {
        return SplitOutput {
            display_text: text.to_string(),
            replan_reason: None,
        };
    };

    let last = lines[last_idx].trim().trim_matches('`').trim();
    let Some(reason) = last.strip_prefix(REPLAN_PREFIX) else {
        return SplitOutput {
            display_text: text.to_string(),
            replan_reason: None,
        };
    };

    let reason = reason.trim();
    let reason = if reason.is_empty() {
        "no reason given".to_string()
    } else {
        reason.to_string()
    };
    SplitOutput {
        display_text: lines[..last_idx].join("\n").trim_end().to_string(),
        replan_reason: Some(reason),
    }
}

/// Streaming counterpart of [`split_replan`] for live display.
///
/// Text passes through as it arrives, except lines that start with the
/// directive. Those are held until a later non-empty line shows they were not
/// last. Whatever is held when the stream ends is dropped.
#[derive(Debug, Default)]
pub struct ReplanStreamFilter {
    /// Unemitted start of the current line.
    line: String,
    /// The current line is ordinary and already streaming.
    passing: bool,
    /// A directive line plus any blank lines after it.
    held: String,
}

impl ReplanStreamFilter {
    /// Feed one chunk; returns the text that is safe to show now.
    pub fn push(&mut self, chunk: &str) -> String {
        let mut shown = String::new();
        for piece in chunk.split_inclusive('\n') {
            let complete = piece.ends_with('\n');
            if self.passing {
                shown.push_str(piece);
                self.passing = !complete;
                continue;
            }
            self.line.push_str(piece);
            let head = line_head(&self.line);
            let (blank, directive) = (head.is_empty(), head.starts_with(REPLAN_PREFIX));
            let undecided = could_be_directive(head);
            if complete {
                let line = std::mem::take(&mut self.line);
                if blank {
                    if self.held.is_empty() {
                        shown.push_str(&line);
                    } else {
                        self.held.push_str(&line);
                    }
                } else if directive {
                    shown.push_str(&std::mem::replace(&mut self.held, line));
                } else {
                    shown.push_str(&std::mem::take(&mut self.held));
                    shown.push_str(&line);
                }
            } else if !undecided {
                shown.push_str(&std::mem::take(&mut self.held));
                shown.push_str(&std::mem::take(&mut self.line));
                self.passing = true;
            }
        }
        shown
    }

    /// End of stream: returns the remaining text minus a trailing directive.
    pub fn finish(self) -> String {
        let head = line_head(&self.line);
        if head.is_empty() {
            if self.held.is_empty() {
                self.line
            } else {
                String::new()
            }
        } else if head.starts_with(REPLAN_PREFIX) {
            self.held
        } else {
            self.held + &self.line
        }
    }
}

fn line_head(line: &str) -> &str {
    line.trim_start().trim_start_matches('`').trim_start().trim_end_matches(['\n', '\r'])
}

fn could_be_directive(head: &str) -> bool {
    head.starts_with(REPLAN_PREFIX) || REPLAN_PREFIX.starts_with(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(chunks: &[&str]) -> String {
        let mut filter = ReplanStreamFilter::default();
        let mut shown: String = chunks.iter().map(|chunk| filter.push(chunk)).collect();
        shown.push_str(&filter.finish());
        shown
    }

    #[test]
    fn strips_trailing_directive() {
        let out = split_replan("`create_file('a.txt', 'x')`\nREQUEST_REPLAN: tool incompatible\n\n");
        assert_eq!(out.replan_reason.as_deref(), Some("tool incompatible"));
        assert_eq!(out.display_text, "`create_file('a.txt', 'x')`");
    }

    #[test]
    fn directive_must_be_last_line() {
        let text = "REQUEST_REPLAN: early\nthen more work";
        let out = split_replan(text);
        assert_eq!(out.replan_reason, None);
        assert_eq!(out.display_text, text);
    }

    #[test]
    fn empty_reason_gets_placeholder() {
        let out = split_replan("REQUEST_REPLAN:");
        assert_eq!(out.replan_reason.as_deref(), Some("no reason given"));
        assert_eq!(out.display_text, "");
    }

    #[test]
    fn stream_drops_trailing_directive_split_across_chunks() {
        assert_eq!(
            stream(&["doing work\nREQUEST_RE", "PLAN: tool incompatible\n"]),
            "doing work\n"
        );
        assert_eq!(stream(&["done\n`REQUEST_REPLAN: x`", "\n\n"]), "done\n");
    }

    #[test]
    fn stream_releases_directive_followed_by_more_text() {
        let text = "REQUEST_REPLAN: early\n\nthen more work";
        assert_eq!(stream(&["REQUEST_REPLAN: early\n", "\nthen ", "more work"]), text);
    }

    #[test]
    fn stream_passes_ordinary_lines_as_they_arrive() {
        let mut filter = ReplanStreamFilter::default();
        assert_eq!(filter.push("REQ"), "");
        assert_eq!(filter.push("UIRED: yes\nnext"), "REQUIRED: yes\nnext");
        assert_eq!(filter.push(" line"), " line");
        assert_eq!(filter.finish(), "");
    }
}
