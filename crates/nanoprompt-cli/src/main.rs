use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use nanoprompt_contracts::events::EventWriter;
use nanoprompt_contracts::models::{ModelSelection, ModelSelector, ModelSpec};
use nanoprompt_contracts::{extract, RewriteOutcome, TemplateCatalog};
use nanoprompt_engine::{
    assemble, default_generator_registry, generate_to_dir, preset_flow, AssembleRequest,
    DryrunAgent, EngineConfig, GeminiAgent, GeminiClient, ImagePart, PresetKind, PresetPaths,
    PromptPolicy, RewriteAgent, RewriteOrchestrator, StylePresets,
};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(
    name = "nanoprompt",
    version,
    about = "Template-driven prompt rewriting for image generation"
)]
struct Cli {
    /// Append structured events (JSONL) to this file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the prompt template library.
    Templates,
    /// Read text on stdin and print the structured object embedded in it.
    Extract,
    Rewrite(RewriteArgs),
    Generate(GenerateArgs),
    /// Run a fixed preset flow (style images plus the preset's prompt).
    Preset(PresetArgs),
    /// Print a preset's default prompt.
    Prompt(PromptArgs),
}

#[derive(Debug, Parser)]
struct RewriteArgs {
    #[arg(long)]
    prompt: String,
    /// Print the full rewrite record instead of just the prompt.
    #[arg(long)]
    json: bool,
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    text_model: Option<String>,
    /// Give up on the rewrite after this many seconds.
    #[arg(long)]
    timeout: Option<f64>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    /// Upload image(s), sent before any preset image.
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    #[arg(long)]
    no_google_styles: bool,
    #[arg(long)]
    manga_styles: bool,
    #[arg(long)]
    default_character: bool,
    #[arg(long)]
    no_rewrite: bool,
    /// Send the original prompt after the rewritten one.
    #[arg(long)]
    keep_raw_prompt: bool,
    #[arg(long)]
    dryrun: bool,
    #[arg(long, default_value = "assets")]
    presets_dir: PathBuf,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
}

#[derive(Debug, Parser)]
struct PresetArgs {
    #[arg(long)]
    kind: PresetKind,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    dryrun: bool,
    #[arg(long, default_value = "assets")]
    presets_dir: PathBuf,
    #[arg(long)]
    image_model: Option<String>,
}

#[derive(Debug, Parser)]
struct PromptArgs {
    #[arg(long)]
    kind: PresetKind,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("nanoprompt error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let events = event_writer(cli.events.as_deref());
    match cli.command {
        Command::Templates => run_templates(),
        Command::Extract => run_extract(),
        Command::Rewrite(args) => run_rewrite(args, events),
        Command::Generate(args) => run_generate(args, events),
        Command::Preset(args) => run_preset(args, &events),
        Command::Prompt(args) => {
            println!("{}", args.kind.default_prompt());
            Ok(0)
        }
    }
}

fn event_writer(path: Option<&Path>) -> EventWriter {
    match path {
        Some(path) => EventWriter::new(path, format!("run-{}", compact_timestamp())),
        None => EventWriter::disabled(),
    }
}

fn compact_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

fn run_templates() -> Result<i32> {
    let catalog = TemplateCatalog::builtin();
    for template in catalog.iter() {
        println!("[{}] {}", template.id, template.name);
        println!("    when: {}", template.selection_rule);
    }
    Ok(0)
}

fn run_extract() -> Result<i32> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("failed to read stdin")?;
    match extract(&input).ok() {
        Some(block) => {
            println!("{block}");
            Ok(0)
        }
        None => {
            eprintln!("nanoprompt: no structured object found");
            Ok(1)
        }
    }
}

fn select_model(
    requested: Option<&str>,
    configured: &str,
    capability: &str,
    dryrun: bool,
) -> Result<ModelSelection> {
    let selector = ModelSelector::new(None);
    if !dryrun && requested.is_none() {
        return Ok(configured_model(&selector, configured, capability));
    }
    let provider = if dryrun { "dryrun" } else { "gemini" };
    let selection = selector
        .select_from(requested, capability, Some(provider))
        .map_err(|err| anyhow!(err))?;
    if selection.requested.is_some() {
        if let Some(reason) = selection.fallback_reason.as_deref() {
            eprintln!(
                "nanoprompt warning: {reason} Using '{}'.",
                selection.model.name
            );
        }
    }
    Ok(selection)
}

/// Model names from the environment are used as given; unknown names are
/// treated as Gemini models.
fn configured_model(
    selector: &ModelSelector,
    configured: &str,
    capability: &str,
) -> ModelSelection {
    let model = selector
        .registry
        .get(configured)
        .filter(|model| model.provider == "gemini")
        .cloned()
        .unwrap_or_else(|| ModelSpec {
            name: configured.to_string(),
            provider: "gemini".to_string(),
            capabilities: vec![capability.to_string()],
            context_window: None,
        });
    ModelSelection {
        model,
        requested: Some(configured.to_string()),
        fallback_reason: None,
    }
}

fn build_rewriter(
    config: &EngineConfig,
    requested_model: Option<&str>,
    dryrun: bool,
    events: EventWriter,
) -> Result<RewriteOrchestrator> {
    let selection = select_model(requested_model, &config.text_model, "text", dryrun)?;
    let agent: Arc<dyn RewriteAgent> = if dryrun {
        Arc::new(DryrunAgent)
    } else {
        Arc::new(GeminiAgent::new(GeminiClient::new(config.clone())))
    };
    Ok(RewriteOrchestrator::with_catalog(
        agent,
        &TemplateCatalog::builtin(),
        Some(&selection.model.name),
    )
    .with_events(events))
}

fn run_rewrite(args: RewriteArgs, events: EventWriter) -> Result<i32> {
    let config = EngineConfig::from_env();
    let rewriter = build_rewriter(&config, args.text_model.as_deref(), args.dryrun, events)?;
    let outcome = match args.timeout {
        Some(seconds) => {
            let timeout = Duration::try_from_secs_f64(seconds.max(0.0))
                .with_context(|| format!("invalid --timeout {seconds}"))?;
            rewriter.rewrite_within(&args.prompt, timeout)
        }
        None => rewriter.rewrite_detailed(&args.prompt),
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
    } else {
        println!("{}", outcome.prompt());
    }
    Ok(0)
}

fn outcome_json(outcome: &RewriteOutcome) -> Value {
    match outcome {
        RewriteOutcome::Rewritten(result) => json!({
            "status": "rewritten",
            "result": result,
        }),
        RewriteOutcome::Fallback { prompt, reason } => json!({
            "status": "fallback",
            "reason": reason.code(),
            "detail": reason.to_string(),
            "prompt": prompt,
        }),
    }
}

fn image_config(
    mut config: EngineConfig,
    image_model: Option<&str>,
    dryrun: bool,
) -> Result<(EngineConfig, String)> {
    let selection = select_model(image_model, &config.image_model, "image", dryrun)?;
    config.image_model = selection.model.name.clone();
    Ok((config, selection.provider().to_string()))
}

fn run_generate(args: GenerateArgs, events: EventWriter) -> Result<i32> {
    let (config, provider) =
        image_config(EngineConfig::from_env(), args.image_model.as_deref(), args.dryrun)?;
    let uploads = args
        .images
        .iter()
        .map(|path| ImagePart::from_path(path))
        .collect::<Result<Vec<ImagePart>>>()?;
    let presets = StylePresets::load(&PresetPaths::under(&args.presets_dir));

    let mut request = AssembleRequest::new(args.prompt.clone());
    request.uploads = uploads;
    request.include_google_styles = !args.no_google_styles;
    request.include_manga_styles = args.manga_styles;
    request.include_default_character = args.default_character;
    if args.keep_raw_prompt {
        request.policy = PromptPolicy::RewrittenThenRaw;
    }

    let rewriter = if args.no_rewrite {
        None
    } else {
        Some(build_rewriter(
            &config,
            args.text_model.as_deref(),
            args.dryrun,
            events.clone(),
        )?)
    };
    let assembled = assemble(&request, &presets, rewriter.as_ref());
    if let Some(outcome) = assembled.rewrite.as_ref() {
        match outcome {
            RewriteOutcome::Rewritten(result) => eprintln!(
                "Rewritten with template #{}: {}",
                result
                    .chosen_template_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "?".to_string()),
                result.rewritten_prompt
            ),
            RewriteOutcome::Fallback { reason, .. } => {
                eprintln!("nanoprompt warning: rewrite skipped ({reason}); using raw prompt.")
            }
        }
    }

    let generators = default_generator_registry(&config);
    let generator = generators
        .get(&provider)
        .ok_or_else(|| anyhow!("no image generator named '{provider}'"))?;
    let saved = generate_to_dir(generator, &assembled.parts, &args.out, &events)?;
    println!("{}", saved.display());
    Ok(0)
}

fn run_preset(args: PresetArgs, events: &EventWriter) -> Result<i32> {
    let (config, provider) =
        image_config(EngineConfig::from_env(), args.image_model.as_deref(), args.dryrun)?;
    let presets = StylePresets::load(&PresetPaths::under(&args.presets_dir));
    let parts = preset_flow(args.kind, &presets)?;
    let generators = default_generator_registry(&config);
    let generator = generators
        .get(&provider)
        .ok_or_else(|| anyhow!("no image generator named '{provider}'"))?;
    let saved = generate_to_dir(generator, &parts, &args.out, events)?;
    println!("{}", saved.display());
    Ok(0)
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use nanoprompt_contracts::events::EventWriter;
    use nanoprompt_contracts::{RewriteFailure, RewriteOutcome, RewriteResult};
    use nanoprompt_engine::{EngineConfig, PresetKind};
    use serde_json::json;

    use super::{
        build_rewriter, event_writer, image_config, outcome_json, select_model, Cli, Command,
    };

    fn config_with(key: &'static str, value: &'static str) -> EngineConfig {
        EngineConfig::from_lookup(move |wanted| (wanted == key).then(|| value.to_string()))
    }

    #[test]
    fn generate_flags_parse() {
        let cli = Cli::try_parse_from([
            "nanoprompt",
            "generate",
            "--prompt",
            "a fox",
            "--out",
            "out",
            "--image",
            "a.png",
            "--image",
            "b.png",
            "--manga-styles",
            "--no-google-styles",
            "--events",
            "events.jsonl",
        ])
        .ok();
        let Some(Cli {
            events,
            command: Command::Generate(args),
        }) = cli
        else {
            panic!("expected generate command");
        };
        assert_eq!(events.as_deref(), Some(std::path::Path::new("events.jsonl")));
        assert_eq!(args.images.len(), 2);
        assert!(args.manga_styles && args.no_google_styles);
        assert!(!args.no_rewrite && !args.keep_raw_prompt);
    }

    #[test]
    fn preset_kind_is_validated() {
        let parsed = Cli::try_parse_from(["nanoprompt", "prompt", "--kind", "MANGA"]).ok();
        assert!(matches!(
            parsed.map(|cli| cli.command),
            Some(Command::Prompt(args)) if args.kind == PresetKind::Manga
        ));
        assert!(Cli::try_parse_from(["nanoprompt", "prompt", "--kind", "anime"]).is_err());
    }

    #[test]
    fn dryrun_selects_offline_models() -> anyhow::Result<()> {
        let text = select_model(None, "gemini-2.5-flash", "text", true)?;
        assert_eq!(text.model.name, "dryrun-text-1");
        let image = select_model(None, "gemini-2.5-flash-image-preview", "image", false)?;
        assert_eq!(image.model.name, "gemini-2.5-flash-image-preview");
        assert!(image.fallback_reason.is_none());
        Ok(())
    }

    #[test]
    fn configured_text_model_reaches_agent_definition() -> anyhow::Result<()> {
        let config = config_with("NANOPROMPT_TEXT_MODEL", "gemini-2.0-flash");
        let rewriter = build_rewriter(&config, None, false, EventWriter::disabled())?;
        assert_eq!(rewriter.definition().model, "gemini-2.0-flash");

        let flagged =
            build_rewriter(&config, Some("gemini-2.5-pro"), false, EventWriter::disabled())?;
        assert_eq!(flagged.definition().model, "gemini-2.5-pro");
        Ok(())
    }

    #[test]
    fn configured_image_model_is_kept_for_gemini() -> anyhow::Result<()> {
        let config = config_with("NANOPROMPT_IMAGE_MODEL", "gemini-2.5-flash-image");
        let (resolved, provider) = image_config(config.clone(), None, false)?;
        assert_eq!(resolved.image_model, "gemini-2.5-flash-image");
        assert_eq!(provider, "gemini");

        let (offline, provider) = image_config(config, None, true)?;
        assert_eq!(offline.image_model, "dryrun-image-1");
        assert_eq!(provider, "dryrun");
        Ok(())
    }

    #[test]
    fn outcome_json_reports_fallback_reason() {
        let fallback = RewriteOutcome::Fallback {
            prompt: "raw".to_string(),
            reason: RewriteFailure::NoResponse,
        };
        let value = outcome_json(&fallback);
        assert_eq!(value["status"], json!("fallback"));
        assert_eq!(value["reason"], json!("no_response"));
        assert_eq!(value["prompt"], json!("raw"));

        let rewritten = RewriteOutcome::Rewritten(RewriteResult {
            rewritten_prompt: "better".to_string(),
            ..RewriteResult::default()
        });
        assert_eq!(
            outcome_json(&rewritten)["result"]["rewritten_prompt"],
            json!("better")
        );
    }

    #[test]
    fn events_disabled_without_path() {
        assert!(event_writer(None).path().is_none());
        let writer = event_writer(Some(std::path::Path::new("events.jsonl")));
        assert!(writer.run_id().starts_with("run-"));
    }
}
