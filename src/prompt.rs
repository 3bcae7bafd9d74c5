// SPDX-License-Identifier: MIT

//! Prompt templates with `{key}` placeholders
//!
//! Placeholders name state keys (dot paths allowed). `{{` and `}}` render as
//! literal braces so templates can embed JSON examples.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::State;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplate {
    source: String,
}

enum Segment<'a> {
    Text(&'a str),
    Brace(char),
    Placeholder(&'a str),
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of first appearance
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for segment in self.segments() {
            if let Segment::Placeholder(name) = segment {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    /// Render against a state; returns the missing keys on failure
    pub fn render(&self, state: &State) -> Result<String, Vec<String>> {
        let mut out = String::with_capacity(self.source.len());
        let mut missing = Vec::new();

        for segment in self.segments() {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Brace(c) => out.push(c),
                Segment::Placeholder(name) => match state.get_path(name) {
                    Some(Value::Null) | None => {
                        if !missing.iter().any(|m| m == name) {
                            missing.push(name.to_string());
                        }
                    }
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                },
            }
        }

        if missing.is_empty() {
            Ok(out)
        } else {
            Err(missing)
        }
    }

    fn segments(&self) -> Vec<Segment<'_>> {
        let src = self.source.as_str();
        let mut segments = Vec::new();
        let mut text_start = 0;
        let mut i = 0;
        let bytes = src.as_bytes();

        while i < bytes.len() {
            match bytes[i] {
                b'{' if bytes.get(i + 1) == Some(&b'{') => {
                    segments.push(Segment::Text(&src[text_start..i]));
                    segments.push(Segment::Brace('{'));
                    i += 2;
                    text_start = i;
                }
                b'}' if bytes.get(i + 1) == Some(&b'}') => {
                    segments.push(Segment::Text(&src[text_start..i]));
                    segments.push(Segment::Brace('}'));
                    i += 2;
                    text_start = i;
                }
                b'{' => match src[i + 1..].find('}') {
                    Some(len) if is_placeholder(&src[i + 1..i + 1 + len]) => {
                        segments.push(Segment::Text(&src[text_start..i]));
                        segments.push(Segment::Placeholder(src[i + 1..i + 1 + len].trim()));
                        i += len + 2;
                        text_start = i;
                    }
                    _ => i += 1,
                },
                _ => i += 1,
            }
        }
        segments.push(Segment::Text(&src[text_start..]));
        segments
    }
}

fn is_placeholder(inner: &str) -> bool {
    let inner = inner.trim();
    !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

impl From<&str> for PromptTemplate {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PromptTemplate {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
