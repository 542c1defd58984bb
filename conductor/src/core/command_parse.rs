//! Restricted command grammar for agent output.
//!
//! Agent text may contain backtick spans such as `` `create_file('a.py', 'x')` ``.
//! [`scan_commands`] finds those spans and parses each one as a single call
//! whose arguments are literals only: strings, numbers, booleans, null and
//! nested list/tuple/dict literals. Identifiers, attribute access, operators
//! and nested calls are rejected. Nothing here evaluates code.

use std::iter::Peekable;
use std::str::CharIndices;

/// A literal argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    List(Vec<Literal>),
    Dict(Vec<(Literal, Literal)>),
}

impl Literal {
    /// Render scalars as plain text; containers and null have no text form.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Literal::Str(s) => Some(s.clone()),
            Literal::Int(i) => Some(i.to_string()),
            Literal::Float(f) => Some(f.to_string()),
            Literal::Bool(b) => Some(b.to_string()),
            Literal::Null | Literal::List(_) | Literal::Dict(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Str(_) => "string",
            Literal::Int(_) => "integer",
            Literal::Float(_) => "float",
            Literal::Bool(_) => "boolean",
            Literal::Null => "null",
            Literal::List(_) => "list",
            Literal::Dict(_) => "dict",
        }
    }
}

/// A parsed `name(args...)` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub name: String,
    pub args: Vec<Literal>,
    pub kwargs: Vec<(String, Literal)>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unexpected character `{ch}` at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("`{0}` is not a literal (identifiers are not allowed)")]
    NonLiteral(String),
    #[error("nested call `{0}(...)` is not allowed")]
    NestedCall(String),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("command span has no closing backtick")]
    UnterminatedSpan,
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    #[error("invalid escape sequence `\\{0}`")]
    InvalidEscape(String),
    #[error("positional argument after keyword argument")]
    PositionalAfterKeyword,
    #[error("trailing input after call: `{0}`")]
    TrailingInput(String),
    #[error("`{operation}` takes {expected} argument(s), got {got}")]
    ArgumentCount {
        operation: String,
        expected: String,
        got: usize,
    },
    #[error("`{operation}` has no parameter named `{name}`")]
    UnknownKeyword { operation: String, name: String },
    #[error("`{operation}` got parameter `{name}` twice")]
    DuplicateArgument { operation: String, name: String },
    #[error("`{operation}` parameter `{name}` must be text, got {found}")]
    ArgumentType {
        operation: String,
        name: String,
        found: &'static str,
    },
}

/// One backtick span found in agent text.
#[derive(Debug, Clone, PartialEq)]
pub enum ScannedSpan {
    /// A well-formed literal-argument call to a registered operation.
    Call { source: String, call: CallExpr },
    /// A call-shaped span whose name is not registered.
    Ignored { source: String, name: String },
    /// A registered name whose span failed the grammar.
    SyntaxError {
        source: String,
        name: String,
        error: ParseError,
    },
}

/// Extract command spans from `text`, in order of appearance.
///
/// `is_registered` decides which call names are operations; other names are
/// reported as [`ScannedSpan::Ignored`] without being parsed further. Spans
/// that are not call-shaped (plain inline code) are skipped silently.
pub fn scan_commands(text: &str, is_registered: impl Fn(&str) -> bool) -> Vec<ScannedSpan> {
    let mut spans = Vec::new();
    let mut pos = 0;

    while let Some(rel) = text[pos..].find('`') {
        let tick = pos + rel;
        let run = text[tick..].chars().take_while(|c| *c == '`').count();
        if run > 1 {
            // Code fences are delimiters only; their contents are still scanned.
            pos = tick + run;
            continue;
        }
        let start = tick + 1;
        let Some(name) = leading_call_name(&text[start..]) else {
            // Plain inline code: skip to its closing backtick.
            pos = match text[start..].find('`') {
                Some(close) => start + close + 1,
                None => text.len(),
            };
            continue;
        };

        match find_span_end(text, start) {
            Some(end) => {
                let source = text[start..end].trim().to_string();
                pos = end + 1;
                if !is_registered(&name) {
                    spans.push(ScannedSpan::Ignored { source, name });
                    continue;
                }
                match parse_call(&source) {
                    Ok(call) => spans.push(ScannedSpan::Call { source, call }),
                    Err(error) => spans.push(ScannedSpan::SyntaxError {
                        source,
                        name,
                        error,
                    }),
                }
            }
            None => {
                let close = text[start..].find('`').map(|c| start + c);
                let source = text[start..close.unwrap_or(text.len())].trim().to_string();
                pos = close.map(|c| c + 1).unwrap_or(text.len());
                if is_registered(&name) {
                    let error = parse_call(&source)
                        .err()
                        .unwrap_or(ParseError::UnterminatedSpan);
                    spans.push(ScannedSpan::SyntaxError {
                        source,
                        name,
                        error,
                    });
                } else {
                    spans.push(ScannedSpan::Ignored { source, name });
                }
            }
        }
    }

    spans
}

/// Return the identifier if `rest` starts with `ident(` (leading spaces allowed).
fn leading_call_name(rest: &str) -> Option<String> {
    let trimmed = rest.trim_start_matches([' ', '\t']);
    let mut chars = trimmed.char_indices();
    let (_, first) = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    let mut end = trimmed.len();
    for (idx, ch) in chars {
        if !(ch.is_ascii_alphanumeric() || ch == '_') {
            end = idx;
            break;
        }
    }
    let name = &trimmed[..end];
    let after = trimmed[end..].trim_start_matches([' ', '\t']);
    after.starts_with('(').then(|| name.to_string())
}

/// Find the closing backtick of a call span starting at `start`.
///
/// Tracks string literals and bracket depth so backticks and parentheses
/// inside string arguments do not end the span early. Returns the byte index
/// of the closing backtick.
fn find_span_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = start;
    let mut depth = 0usize;
    let mut seen_open = false;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\'' | b'"' => {
                i = skip_string(bytes, i)?;
                continue;
            }
            b'(' | b'[' | b'{' => {
                depth += 1;
                seen_open = true;
            }
            b')' | b']' | b'}' => {
                depth = depth.checked_sub(1)?;
            }
            b'`' if depth == 0 && seen_open => return Some(i),
            b'`' if depth == 0 => return None,
            _ => {}
        }
        i += 1;
    }
    None
}

/// Skip a string literal starting at `i`; returns the index after its closing quote.
fn skip_string(bytes: &[u8], i: usize) -> Option<usize> {
    let quote = bytes[i];
    let triple = bytes.len() >= i + 3 && bytes[i + 1] == quote && bytes[i + 2] == quote;
    let mut j = if triple { i + 3 } else { i + 1 };
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b if b == quote => {
                if !triple {
                    return Some(j + 1);
                }
                if bytes.len() >= j + 3 && bytes[j + 1] == quote && bytes[j + 2] == quote {
                    return Some(j + 3);
                }
                j += 1;
            }
            b'\n' if !triple => return None,
            _ => j += 1,
        }
    }
    None
}

/// Parse exactly one literal-argument call expression.
pub fn parse_call(source: &str) -> Result<CallExpr, ParseError> {
    let mut parser = Parser::new(source);
    parser.skip_ws();
    let name = parser.identifier()?;
    parser.skip_ws();
    parser.expect('(')?;

    let mut args = Vec::new();
    let mut kwargs = Vec::new();
    loop {
        parser.skip_ws();
        if parser.eat(')') {
            break;
        }
        if let Some(key) = parser.keyword_name() {
            parser.skip_ws();
            let value = parser.literal()?;
            kwargs.push((key, value));
        } else {
            let value = parser.literal()?;
            if !kwargs.is_empty() {
                return Err(ParseError::PositionalAfterKeyword);
            }
            args.push(value);
        }
        parser.skip_ws();
        if parser.eat(',') {
            continue;
        }
        parser.expect(')')?;
        break;
    }

    parser.skip_ws();
    let rest = parser.remaining();
    if !rest.is_empty() {
        return Err(ParseError::TrailingInput(rest.to_string()));
    }
    Ok(CallExpr { name, args, kwargs })
}

struct Parser<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map(|(i, _)| *i).unwrap_or(self.src.len())
    }

    fn remaining(&mut self) -> &'a str {
        let offset = self.offset();
        &self.src[offset..]
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        self.chars.next().map(|(_, c)| c)
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.bump();
            return true;
        }
        false
    }

    fn expect(&mut self, ch: char) -> Result<(), ParseError> {
        let offset = self.offset();
        match self.bump() {
            Some(c) if c == ch => Ok(()),
            Some(c) => Err(ParseError::UnexpectedChar { ch: c, offset }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn identifier(&mut self) -> Result<String, ParseError> {
        let offset = self.offset();
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            Some(c) => return Err(ParseError::UnexpectedChar { ch: c, offset }),
            None => return Err(ParseError::UnexpectedEnd),
        }
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Ok(ident)
    }

    /// Consume `name =` if present (but not `name ==`), leaving literals untouched.
    fn keyword_name(&mut self) -> Option<String> {
        let rest = self.remaining();
        if !rest.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            return None;
        }
        let ident_len = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .count();
        if matches!(&rest[..ident_len], "True" | "False" | "None" | "true" | "false" | "null") {
            return None;
        }
        let after = rest[ident_len..].trim_start();
        if !after.starts_with('=') || after.starts_with("==") {
            return None;
        }
        let name = rest[..ident_len].to_string();
        for _ in 0..ident_len {
            self.bump();
        }
        self.skip_ws();
        self.bump();
        Some(name)
    }

    fn literal(&mut self) -> Result<Literal, ParseError> {
        self.skip_ws();
        let offset = self.offset();
        match self.peek() {
            None => Err(ParseError::UnexpectedEnd),
            Some('\'') | Some('"') => self.string().map(Literal::Str),
            Some('[') => {
                self.bump();
                self.sequence(']').map(Literal::List)
            }
            Some('(') => {
                self.bump();
                self.sequence(')').map(Literal::List)
            }
            Some('{') => {
                self.bump();
                self.dict()
            }
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let ident = self.identifier()?;
                match ident.as_str() {
                    "True" | "true" => Ok(Literal::Bool(true)),
                    "False" | "false" => Ok(Literal::Bool(false)),
                    "None" | "null" => Ok(Literal::Null),
                    _ => {
                        self.skip_ws();
                        if self.peek() == Some('(') {
                            Err(ParseError::NestedCall(ident))
                        } else {
                            Err(ParseError::NonLiteral(ident))
                        }
                    }
                }
            }
            Some(c) => Err(ParseError::UnexpectedChar { ch: c, offset }),
        }
    }

    fn sequence(&mut self, close: char) -> Result<Vec<Literal>, ParseError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.literal()?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }

    fn dict(&mut self) -> Result<Literal, ParseError> {
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                return Ok(Literal::Dict(entries));
            }
            let key = self.literal()?;
            self.skip_ws();
            self.expect(':')?;
            let value = self.literal()?;
            entries.push((key, value));
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            self.expect('}')?;
            return Ok(Literal::Dict(entries));
        }
    }

    fn number(&mut self) -> Result<Literal, ParseError> {
        let mut raw = String::new();
        if let Some(sign) = self.peek().filter(|c| *c == '-' || *c == '+') {
            raw.push(sign);
            self.bump();
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                raw.push(c);
                self.bump();
            } else if (c == '-' || c == '+') && raw.ends_with(['e', 'E']) {
                raw.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let cleaned = raw.replace('_', "");
        if let Ok(value) = cleaned.parse::<i64>() {
            return Ok(Literal::Int(value));
        }
        let is_float_shaped = cleaned
            .trim_start_matches(['-', '+'])
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+'));
        match cleaned.parse::<f64>() {
            Ok(value) if is_float_shaped && value.is_finite() => Ok(Literal::Float(value)),
            _ => Err(ParseError::InvalidNumber(raw)),
        }
    }

    fn string(&mut self) -> Result<String, ParseError> {
        let quote = self.bump().ok_or(ParseError::UnexpectedEnd)?;
        let pair: String = [quote, quote].into_iter().collect();
        let triple = self.remaining().starts_with(&pair);
        if triple {
            self.bump();
            self.bump();
        }

        let mut out = String::new();
        loop {
            let c = self.bump().ok_or(ParseError::UnterminatedString)?;
            if c == quote {
                if !triple {
                    return Ok(out);
                }
                if self.remaining().starts_with(&pair) {
                    self.bump();
                    self.bump();
                    return Ok(out);
                }
                out.push(c);
                continue;
            }
            match c {
                '\\' => self.escape(&mut out)?,
                '\n' if !triple => return Err(ParseError::UnterminatedString),
                _ => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<(), ParseError> {
        let c = self.bump().ok_or(ParseError::UnterminatedString)?;
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '\n' => {}
            'x' => out.push(self.hex_escape(2, 'x')?),
            'u' => out.push(self.hex_escape(4, 'u')?),
            other => {
                // Unknown escapes keep their backslash, matching common literal syntax.
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn hex_escape(&mut self, digits: usize, marker: char) -> Result<char, ParseError> {
        let mut hex = String::new();
        for _ in 0..digits {
            match self.bump() {
                Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                _ => return Err(ParseError::InvalidEscape(format!("{marker}{hex}"))),
            }
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| ParseError::InvalidEscape(format!("{marker}{hex}")))
    }
}
