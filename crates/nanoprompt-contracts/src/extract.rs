//! Recovery of a single JSON object from free-form model output.
//!
//! Agents are asked for "JSON only" but routinely wrap the object in prose or
//! markdown fences. Candidates are tried in a fixed order and the first one
//! that parses as a JSON object wins:
//!
//! 1. the whole text,
//! 2. the body of the first fenced code block (optionally tagged `json`),
//! 3. every balanced `{ ... }` span, scanning left to right. When a fence
//!    was found the scan covers only its body, otherwise the whole text.
//!
//! Nothing is ever repaired. A returned slice always parses as a JSON object.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionFailure {
    #[error("reply text was empty")]
    EmptyInput,
    #[error("no JSON object candidate parsed")]
    NoCandidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionOutcome<'a> {
    Success(&'a str),
    Failure(ExtractionFailure),
}

impl<'a> ExtractionOutcome<'a> {
    pub fn ok(self) -> Option<&'a str> {
        match self {
            Self::Success(found) => Some(found),
            Self::Failure(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

pub fn extract(text: &str) -> ExtractionOutcome<'_> {
    if text.trim().is_empty() {
        return ExtractionOutcome::Failure(ExtractionFailure::EmptyInput);
    }
    match extract_json_block(text) {
        Some(found) => ExtractionOutcome::Success(found),
        None => ExtractionOutcome::Failure(ExtractionFailure::NoCandidate),
    }
}

pub fn extract_json_block(text: &str) -> Option<&str> {
    if parse_object(text).is_some() {
        return Some(text);
    }
    match fenced_block(text) {
        Some(body) if parse_object(body).is_some() => Some(body),
        Some(body) => balanced_object(body),
        None => balanced_object(text),
    }
}

/// Parses `text` as JSON and keeps it only when the top-level value is an object.
pub fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```(?:json)?\s*(.*?)\s*```").expect("Invalid code fence regex")
});

fn fenced_block(text: &str) -> Option<&str> {
    let captures = FENCE.captures(text)?;
    captures.get(1).map(|body| body.as_str().trim())
}

fn balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut start = text.find('{');
    while let Some(open) = start {
        if let Some(close) = matching_close(bytes, open) {
            let candidate = &text[open..=close];
            if parse_object(candidate).is_some() {
                return Some(candidate);
            }
        }
        // Resume at the next brace after this start, inner braces included.
        start = text[open + 1..].find('{').map(|offset| open + 1 + offset);
    }
    None
}

/// Index of the `}` closing the object opened at `open`, ignoring braces
/// inside string literals.
fn matching_close(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, &byte) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}
