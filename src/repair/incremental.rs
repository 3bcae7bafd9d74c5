// SPDX-License-Identifier: MIT

//! Mechanical JSON repair
//!
//! A single scan over the text that tracks string and nesting state and
//! fixes the usual LLM slips: code fences and surrounding prose, trailing
//! commas, single or typographic quotes, bare keys, comments, Python literals,
//! raw control characters inside strings and unclosed delimiters.
//!
//! The output of [`repair_text`] is a fixed point: repairing it again yields
//! the same text.

use async_trait::async_trait;

use super::{parse_record, strip_code_fences, Record, RepairFailure, RepairStrategy};
use crate::node::NodeContext;
use crate::schema::OutputSchema;

/// Strategy wrapper around [`repair_text`]
#[derive(Debug, Default, Clone, Copy)]
pub struct IncrementalRepair;

impl IncrementalRepair {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RepairStrategy for IncrementalRepair {
    fn name(&self) -> &str {
        "incremental repair"
    }

    async fn repair(
        &self,
        raw: &str,
        schema: &OutputSchema,
        _cx: &mut NodeContext,
    ) -> Result<Record, RepairFailure> {
        let fixed = repair_text(raw);
        log::debug!("incremental repair produced: {}", fixed);
        parse_record(&fixed, schema)
            .map_err(|e| RepairFailure::new(format!("still unparseable after mechanical fixes: {}", e)))
    }
}

/// Apply every mechanical fix to the text
pub fn repair_text(raw: &str) -> String {
    let text = strip_code_fences(raw.trim()).trim();
    let Some(start) = text.find('{') else {
        return text.to_string();
    };

    let chars: Vec<char> = text[start..].chars().collect();
    let mut scanner = Scanner::default();
    scanner.run(&chars);
    scanner.finish()
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Quote {
    Double,
    Single,
    SmartDouble,
    SmartSingle,
}

impl Quote {
    fn open(c: char) -> Option<Quote> {
        match c {
            '"' => Some(Quote::Double),
            '\'' => Some(Quote::Single),
            '\u{201C}' | '\u{201D}' | '\u{201E}' => Some(Quote::SmartDouble),
            '\u{2018}' | '\u{2019}' => Some(Quote::SmartSingle),
            _ => None,
        }
    }

    fn closes(self, c: char) -> bool {
        match self {
            Quote::Double => c == '"',
            Quote::Single => c == '\'',
            Quote::SmartDouble => matches!(c, '\u{201C}' | '\u{201D}' | '"'),
            Quote::SmartSingle => matches!(c, '\u{2018}' | '\u{2019}' | '\''),
        }
    }
}

#[derive(Default)]
struct Scanner {
    out: String,
    /// Expected closing delimiters, innermost last
    stack: Vec<char>,
    string: Option<Quote>,
    escape: bool,
}

impl Scanner {
    fn run(&mut self, chars: &[char]) {
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];

            if let Some(quote) = self.string {
                self.string_char(quote, c);
                i += 1;
                continue;
            }

            match c {
                '{' => {
                    self.stack.push('}');
                    self.out.push(c);
                }
                '[' => {
                    self.stack.push(']');
                    self.out.push(c);
                }
                '}' | ']' => {
                    // A closer with no matching opener is dropped
                    if self.stack.contains(&c) {
                        while let Some(closer) = self.stack.pop() {
                            self.seal();
                            self.out.push(closer);
                            if closer == c {
                                break;
                            }
                        }
                        if self.stack.is_empty() {
                            return;
                        }
                    }
                }
                '/' if chars.get(i + 1) == Some(&'/') => {
                    while i < chars.len() && chars[i] != '\n' {
                        i += 1;
                    }
                    continue;
                }
                '/' if chars.get(i + 1) == Some(&'*') => {
                    i += 2;
                    while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                        i += 1;
                    }
                    i += 2;
                    continue;
                }
                c if Quote::open(c).is_some() => {
                    self.string = Quote::open(c);
                    self.out.push('"');
                }
                c if c.is_alphabetic() || c == '_' || c == '$' => {
                    let start = i;
                    while i < chars.len()
                        && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                    {
                        i += 1;
                    }
                    let word: String = chars[start..i].iter().collect();
                    self.word(&word, next_significant(chars, i));
                    continue;
                }
                c => self.out.push(c),
            }
            i += 1;
        }
    }

    fn string_char(&mut self, quote: Quote, c: char) {
        if self.escape {
            self.escape = false;
            if c == '\'' {
                // \' is not a JSON escape
                self.out.pop();
            }
            self.out.push(c);
            return;
        }
        match c {
            '\\' => {
                self.out.push('\\');
                self.escape = true;
            }
            c if quote.closes(c) => {
                self.out.push('"');
                self.string = None;
            }
            '"' => self.out.push_str("\\\""),
            '\n' => self.out.push_str("\\n"),
            '\r' => self.out.push_str("\\r"),
            '\t' => self.out.push_str("\\t"),
            c => self.out.push(c),
        }
    }

    fn word(&mut self, word: &str, next: Option<char>) {
        let in_object = self.stack.last() == Some(&'}');
        let key_position = matches!(self.last_significant(), Some('{') | Some(','));
        if in_object && key_position && next == Some(':') {
            self.out.push('"');
            self.out.push_str(word);
            self.out.push('"');
            return;
        }
        match word {
            "True" => self.out.push_str("true"),
            "False" => self.out.push_str("false"),
            "None" => self.out.push_str("null"),
            other => self.out.push_str(other),
        }
    }

    /// Prepare for a closing delimiter: drop a dangling comma, fill a
    /// dangling value
    fn seal(&mut self) {
        if let Some((idx, ',')) = self.last_significant_at() {
            self.out.remove(idx);
        }
        if self.last_significant() == Some(':') {
            self.out.push_str(" null");
        }
    }

    fn last_significant_at(&self) -> Option<(usize, char)> {
        self.out.char_indices().rev().find(|(_, c)| !c.is_whitespace())
    }

    fn last_significant(&self) -> Option<char> {
        self.last_significant_at().map(|(_, c)| c)
    }

    fn finish(mut self) -> String {
        if self.string.is_some() {
            if self.escape {
                self.out.pop();
            }
            self.out.push('"');
            self.string = None;
        }
        while let Some(closer) = self.stack.pop() {
            self.seal();
            self.out.push(closer);
        }
        self.out
    }
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from..].iter().copied().find(|c| !c.is_whitespace())
}
