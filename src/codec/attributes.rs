//! Tokenizer for directive attribute text, the part between `{` and `}` in `:::kind{...}`.
//!
//! Grammar: an optional leading `#id` token, then whitespace-separated `key=value` or
//! `key="quoted value"` pairs. Quoted values support `\"` and `\\` escapes. Problems are
//! collected as messages; the tokenizer never gives up on the rest of the text.

use serde::{Deserialize, Serialize};
use std::{iter::Peekable, str::CharIndices};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAttribute {
    pub key: String,
    pub value: String,
    pub quoted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAttributes {
    /// The `#id` shorthand, without the `#`.
    pub id: Option<String>,
    pub attributes: Vec<RawAttribute>,
    pub errors: Vec<String>,
}

fn is_key_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_key_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.')
}

fn skip_whitespace(chars: &mut Peekable<CharIndices<'_>>) {
    while chars.next_if(|(_, ch)| ch.is_whitespace()).is_some() {}
}

/// Consume a bare token up to the next whitespace.
fn take_bare(chars: &mut Peekable<CharIndices<'_>>) -> String {
    let mut token = String::new();
    while let Some((_, ch)) = chars.next_if(|(_, ch)| !ch.is_whitespace()) {
        token.push(ch);
    }
    token
}

/// Consume a quoted value; the opening quote has already been consumed. Returns the value and
/// whether the closing quote was found.
fn take_quoted(chars: &mut Peekable<CharIndices<'_>>, quote: char) -> (String, bool) {
    let mut value = String::new();
    while let Some((_, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => return (value, false),
            },
            ch if ch == quote => return (value, true),
            ch => value.push(ch),
        }
    }
    (value, false)
}

pub fn parse_attributes(text: &str) -> ParsedAttributes {
    let mut parsed = ParsedAttributes::default();
    let mut chars = text.char_indices().peekable();
    let mut first = true;

    loop {
        skip_whitespace(&mut chars);
        let Some(&(_, ch)) = chars.peek() else {
            break;
        };

        if ch == '#' {
            chars.next();
            let id = take_bare(&mut chars);
            if id.is_empty() {
                parsed.errors.push("empty `#` id shorthand".to_string());
            } else if !first {
                parsed
                    .errors
                    .push(format!("`#{id}` must be the first attribute"));
            } else {
                parsed.id = Some(id);
            }
            first = false;
            continue;
        }
        first = false;

        if !is_key_start(ch) {
            let token = take_bare(&mut chars);
            parsed
                .errors
                .push(format!("unexpected token `{token}`, expected key=value"));
            continue;
        }

        let mut key = String::new();
        while let Some((_, ch)) = chars.next_if(|(_, ch)| is_key_char(*ch)) {
            key.push(ch);
        }

        match chars.peek() {
            Some((_, '=')) => {
                chars.next();
            }
            Some((_, ch)) if !ch.is_whitespace() => {
                let rest = take_bare(&mut chars);
                parsed
                    .errors
                    .push(format!("invalid attribute name `{key}{rest}`"));
                continue;
            }
            _ => {
                parsed
                    .errors
                    .push(format!("attribute `{key}` has no value, expected {key}=value"));
                continue;
            }
        }

        let (value, quoted) = match chars.peek() {
            Some(&(_, quote @ ('"' | '\''))) => {
                chars.next();
                let (value, closed) = take_quoted(&mut chars, quote);
                if !closed {
                    parsed
                        .errors
                        .push(format!("unterminated quoted value for `{key}`"));
                }
                (value, true)
            }
            _ => (take_bare(&mut chars), false),
        };

        parsed.attributes.push(RawAttribute { key, value, quoted });
    }

    parsed
}
