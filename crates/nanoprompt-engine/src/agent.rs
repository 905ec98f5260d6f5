use anyhow::Result;
use nanoprompt_contracts::templates::{PromptTemplate, TemplateCatalog};
use serde_json::json;

use crate::config::DEFAULT_TEXT_MODEL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentTool {
    GoogleSearch,
}

impl AgentTool {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GoogleSearch => "google_search",
        }
    }
}

/// Everything the agent runtime needs to answer one rewrite request.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDefinition {
    pub name: String,
    pub model: String,
    pub description: String,
    pub instruction: String,
    pub tools: Vec<AgentTool>,
}

impl AgentDefinition {
    pub fn prompt_rewriter(catalog: &TemplateCatalog, model: Option<&str>) -> Self {
        Self {
            name: "prompt_rewriter_agent".to_string(),
            model: model
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(DEFAULT_TEXT_MODEL)
                .to_string(),
            description: "Understands a user's creative/image request via web search, selects the best prompt template, and rewrites the prompt accordingly.".to_string(),
            instruction: rewriter_instruction(catalog),
            tools: vec![AgentTool::GoogleSearch],
        }
    }

    pub fn has_tool(&self, tool: AgentTool) -> bool {
        self.tools.contains(&tool)
    }
}

fn rewriter_instruction(catalog: &TemplateCatalog) -> String {
    format!(
        "You are a prompt rewriter specialized in image generation/editing. Your job:\n\
1) Understand the user's request.\n\
2) Use google_search to quickly confirm ambiguous terms, styles, references, products, locations, or trends.\n\
3) Choose exactly ONE template from the list below that best matches the user's intent.\n\
4) Rewrite the user's prompt with concrete, specific, accurate details. Keep to English unless the user explicitly asks otherwise.\n\
5) Output a compact JSON object containing: chosen_template_id, chosen_template_name, rationale, rewritten_prompt, suggested_aspect_ratio, optional_followups[].\n\
\n\
--- DECISION RULES ---\n\
{rules}\n\
\n\
--- TEMPLATE LIBRARY (SELECT EXACTLY ONE) ---\n\
{library}\n\
\n\
--- GOOGLE SEARCH USAGE ---\n\
- Call google_search for: unfamiliar styles/terms, product names, places, era/period references, camera/lens norms, or color palettes.\n\
- Skim top results to confirm correct spellings, canonical names, and brief facts. Extract only what helps fill placeholders precisely.\n\
- Keep citations out of the prompt itself. If critical facts are uncertain, prefer neutral phrasing instead of hallucinating.\n\
\n\
--- OUTPUT FORMAT (MUST BE VALID JSON) ---\n\
{{\n\
  \"chosen_template_id\": <1..{count}>,\n\
  \"chosen_template_name\": \"<template name>\",\n\
  \"rationale\": \"<2-4 sentences on why this template fits and what search clarified>\",\n\
  \"rewritten_prompt\": \"<the final, ready-to-use prompt, one template only>\",\n\
  \"suggested_aspect_ratio\": \"<e.g., 4:5, 16:9, 1:1>\",\n\
  \"optional_followups\": [\"<short question or toggle the user might want>\", \"...\"]\n\
}}\n\
\n\
--- STYLE & QUALITY ---\n\
- Be concise, specific, and concrete. Prefer domain-correct vocabulary.\n\
- Avoid brand logos/watermarks unless explicitly allowed.\n\
- Do not invent facts; if search is inconclusive, leave placeholders with best-guess descriptors.\n\
- Keep profanity, hate, and unsafe content out. Refuse if content policy requires.",
        rules = catalog.render_decision_rules(),
        library = catalog.render_library(),
        count = catalog.len(),
    )
}

/// One user turn answered by one final agent turn. Built per call and dropped
/// when the call returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    session_id: String,
    user_message: String,
}

impl Exchange {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            session_id: format!("rewrite-{}", uuid::Uuid::new_v4()),
            user_message: user_message.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    ToolCall { tool: String, query: String },
    Final { text: Option<String> },
}

impl AgentEvent {
    pub fn is_final_response(&self) -> bool {
        matches!(self, Self::Final { .. })
    }

    /// Trimmed text of a final event, `None` when absent or blank.
    pub fn final_text(&self) -> Option<&str> {
        match self {
            Self::Final { text } => text
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty()),
            _ => None,
        }
    }
}

pub type AgentEvents = Box<dyn Iterator<Item = Result<AgentEvent>> + Send>;

/// The externally supplied agent runtime. Implementations must tolerate
/// concurrent `run` calls.
pub trait RewriteAgent: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, definition: &AgentDefinition, exchange: &Exchange) -> Result<AgentEvents>;
}

/// Offline stand-in that answers from the template cue words.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunAgent;

impl DryrunAgent {
    fn pick(prompt: &str) -> &'static PromptTemplate {
        let lowered = prompt.to_lowercase();
        let catalog = TemplateCatalog::builtin();
        catalog
            .iter()
            .find(|template| template.cues.iter().any(|cue| lowered.contains(cue)))
            .or_else(|| catalog.get(1))
            .unwrap_or(&nanoprompt_contracts::TEMPLATES[0])
    }
}

impl RewriteAgent for DryrunAgent {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn run(&self, _definition: &AgentDefinition, exchange: &Exchange) -> Result<AgentEvents> {
        let prompt = exchange.user_message().trim();
        if prompt.is_empty() {
            return Ok(Box::new(std::iter::once(Ok(AgentEvent::Final { text: None }))));
        }
        let template = Self::pick(prompt);
        let reply = json!({
            "chosen_template_id": template.id,
            "chosen_template_name": template.name,
            "rationale": format!("Dryrun matched the request against rule: {}", template.selection_rule),
            "rewritten_prompt": format!("{}\nSubject: {}", template.body, prompt),
            "suggested_aspect_ratio": "1:1",
            "optional_followups": [],
        });
        let pretty = serde_json::to_string_pretty(&reply)?;
        let events = vec![
            Ok(AgentEvent::ToolCall {
                tool: AgentTool::GoogleSearch.name().to_string(),
                query: prompt.to_string(),
            }),
            Ok(AgentEvent::Final {
                text: Some(format!("Template #{} fits best.\n```json\n{pretty}\n```", template.id)),
            }),
        ];
        Ok(Box::new(events.into_iter()))
    }
}
