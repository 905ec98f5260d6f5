pub mod agent;
pub mod config;
pub mod gemini;
pub mod generate;
pub mod media;
pub mod rewrite;

use serde_json::{Map, Value};

pub use agent::{AgentDefinition, AgentEvent, AgentTool, DryrunAgent, Exchange, RewriteAgent};
pub use config::EngineConfig;
pub use gemini::{GeminiAgent, GeminiClient};
pub use generate::{
    default_generator_registry, extract_image_bytes, generate_to_dir, save_png, DryrunImageGenerator,
    GeminiImageGenerator, GeneratorRegistry, ImageGenerator,
};
pub use media::{
    assemble, preset_flow, AssembleRequest, Assembled, ContentPart, ImagePart, PresetKind, PresetPaths,
    PromptPolicy, StylePresets, DEFAULT_PROMPT, MANGA_DEFAULT_PROMPT,
};
pub use rewrite::RewriteOrchestrator;

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing: &String| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::{error_chain_text, truncate_text};

    #[test]
    fn error_chain_joins_distinct_causes() {
        let err = anyhow!("connection refused")
            .context("Gemini request failed")
            .context("Gemini request failed");
        assert_eq!(
            error_chain_text(&err, 200),
            "Gemini request failed | caused by: connection refused"
        );
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
