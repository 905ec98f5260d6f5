use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::extract::{extract, parse_object, ExtractionOutcome};

/// The agent's structured answer once a usable `rewritten_prompt` was found.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RewriteResult {
    pub chosen_template_id: Option<u8>,
    pub chosen_template_name: Option<String>,
    pub rationale: Option<String>,
    pub rewritten_prompt: String,
    pub suggested_aspect_ratio: Option<String>,
    pub optional_followups: Vec<String>,
}

impl RewriteResult {
    /// Reads a result out of an already-parsed reply object.
    ///
    /// Only `rewritten_prompt` is mandatory and must be a non-blank string.
    /// The other fields are read leniently; a template id given as a numeric
    /// string is accepted, anything unreadable is dropped.
    pub fn from_object(object: &Map<String, Value>) -> Option<Self> {
        let rewritten_prompt = object
            .get("rewritten_prompt")
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())?
            .to_string();
        Some(Self {
            chosen_template_id: object.get("chosen_template_id").and_then(template_id),
            chosen_template_name: string_field(object, "chosen_template_name"),
            rationale: string_field(object, "rationale"),
            rewritten_prompt,
            suggested_aspect_ratio: string_field(object, "suggested_aspect_ratio"),
            optional_followups: object
                .get("optional_followups")
                .and_then(Value::as_array)
                .map(|rows| {
                    rows.iter()
                        .filter_map(Value::as_str)
                        .map(str::trim)
                        .filter(|row| !row.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// Extracts and reads a result from raw reply text.
    pub fn from_reply(raw_text: &str) -> Result<Self, RewriteFailure> {
        let found = match extract(raw_text) {
            ExtractionOutcome::Success(found) => found,
            ExtractionOutcome::Failure(_) => return Err(RewriteFailure::UnparseableReply),
        };
        let object = parse_object(found).ok_or(RewriteFailure::UnparseableReply)?;
        Self::from_object(&object).ok_or(RewriteFailure::MissingField)
    }
}

fn template_id(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(number) => number.as_u64()?,
        Value::String(text) => text.trim().trim_start_matches('#').parse::<u64>().ok()?,
        _ => return None,
    };
    u8::try_from(raw).ok().filter(|id| (1..=10).contains(id))
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Why a rewrite fell back to the caller's original prompt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteFailure {
    #[error("agent produced no final response")]
    NoResponse,
    #[error("agent reply contained no JSON object")]
    UnparseableReply,
    #[error("agent reply lacked a non-empty rewritten_prompt")]
    MissingField,
    #[error("agent capability failed: {0}")]
    CapabilityFailure(String),
}

impl RewriteFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoResponse => "no_response",
            Self::UnparseableReply => "unparseable_reply",
            Self::MissingField => "missing_field",
            Self::CapabilityFailure(_) => "capability_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    Rewritten(RewriteResult),
    Fallback {
        prompt: String,
        reason: RewriteFailure,
    },
}

impl RewriteOutcome {
    pub fn prompt(&self) -> &str {
        match self {
            Self::Rewritten(result) => result.rewritten_prompt.as_str(),
            Self::Fallback { prompt, .. } => prompt.as_str(),
        }
    }

    pub fn into_prompt(self) -> String {
        match self {
            Self::Rewritten(result) => result.rewritten_prompt,
            Self::Fallback { prompt, .. } => prompt,
        }
    }

    pub fn result(&self) -> Option<&RewriteResult> {
        match self {
            Self::Rewritten(result) => Some(result),
            Self::Fallback { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&RewriteFailure> {
        match self {
            Self::Rewritten(_) => None,
            Self::Fallback { reason, .. } => Some(reason),
        }
    }
}
