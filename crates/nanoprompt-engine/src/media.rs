use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use nanoprompt_contracts::rewrite::RewriteOutcome;
use serde_json::{json, Value};

use crate::rewrite::RewriteOrchestrator;

pub const DEFAULT_PROMPT: &str = "Create a infographic in the isometric, colorful, and illustrative style of the provided images\n\
that convince you why choosing to go for research, provide many reasons if you can. If you add numbers, it should be correctly added and sequentially added.\n\
Don't add any watermarks or anything that says Google Developer Clubs.";

pub const MANGA_DEFAULT_PROMPT: &str = "Create a single manga page (right-to-left layout) in classic manga style: 4 panels, crisp ink lineart, grayscale screentones, soft gradients, high contrast, subtle paper texture.\n\
Use ONLY ENGLISH text (Latin letters); no Japanese characters. Hand-lettered speech balloons and small caption boxes. No watermark.\n\
CAST & SETTING: Two student researchers in lab coats: (1) confident girl with long hair; (2) calm boy with glasses.\n\
Campus lawn + lab building. Include diegetic UI overlays that suggest search/map/translate/drive (no exact logos).\n\
Typography: short, legible English text in balloons; 1–2 words for SFX. Ratio ~1300x1846.";

const PRESET_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// An image normalised to RGB PNG, ready to be sent inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePart {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ImagePart {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes).context("could not decode image bytes")?;
        let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
        let mut data = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
            .context("could not re-encode image as PNG")?;
        Ok(Self {
            mime_type: "image/png".to_string(),
            data,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("failed to open {}", path.display()))
    }

    pub fn to_inline_json(&self) -> Value {
        json!({
            "inlineData": {
                "mimeType": self.mime_type,
                "data": BASE64.encode(&self.data),
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Image(ImagePart),
    Text(String),
}

impl ContentPart {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Image(image) => image.to_inline_json(),
            Self::Text(text) => json!({ "text": text }),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::Image(_) => None,
        }
    }
}

/// Where the preset reference images live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetPaths {
    pub google_styles_dir: PathBuf,
    pub manga_styles_dir: PathBuf,
    pub default_character: PathBuf,
}

impl PresetPaths {
    pub fn under(base: &Path) -> Self {
        Self {
            google_styles_dir: base.join("GoogleStyles"),
            manga_styles_dir: base.join("MangaStyles"),
            default_character: base.join("Default_Character").join("fornite_banana.png"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetKind {
    Google,
    Manga,
}

impl PresetKind {
    pub fn default_prompt(&self) -> &'static str {
        match self {
            Self::Google => DEFAULT_PROMPT,
            Self::Manga => MANGA_DEFAULT_PROMPT,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::Manga => "Manga",
        }
    }
}

impl FromStr for PresetKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "google" | "default" => Ok(Self::Google),
            "manga" => Ok(Self::Manga),
            other => Err(format!("unknown preset '{other}' (expected google or manga)")),
        }
    }
}

/// Reference images loaded once at startup and handed to whoever assembles
/// requests. Never mutated after [`StylePresets::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StylePresets {
    google: Vec<ImagePart>,
    manga: Vec<ImagePart>,
    default_character: Option<ImagePart>,
}

impl StylePresets {
    pub fn load(paths: &PresetPaths) -> Self {
        let default_character = if paths.default_character.exists() {
            match ImagePart::from_path(&paths.default_character) {
                Ok(part) => Some(part),
                Err(err) => {
                    eprintln!("nanoprompt warning: failed to load default character: {err:#}");
                    None
                }
            }
        } else {
            None
        };
        Self {
            google: load_dir_parts(&paths.google_styles_dir),
            manga: load_dir_parts(&paths.manga_styles_dir),
            default_character,
        }
    }

    pub fn new(
        google: Vec<ImagePart>,
        manga: Vec<ImagePart>,
        default_character: Option<ImagePart>,
    ) -> Self {
        Self {
            google,
            manga,
            default_character,
        }
    }

    pub fn parts(&self, kind: PresetKind) -> &[ImagePart] {
        match kind {
            PresetKind::Google => &self.google,
            PresetKind::Manga => &self.manga,
        }
    }

    pub fn default_character(&self) -> Option<&ImagePart> {
        self.default_character.as_ref()
    }
}

/// Every `png`/`jpg`/`jpeg` in `dir`, sorted by path. Unreadable files are
/// skipped with a warning; a missing directory yields nothing.
fn load_dir_parts(dir: &Path) -> Vec<ImagePart> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("nanoprompt warning: missing folder: {}", dir.display());
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| PRESET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut parts = Vec::new();
    for path in files {
        match ImagePart::from_path(&path) {
            Ok(part) => parts.push(part),
            Err(err) => eprintln!("nanoprompt warning: {err:#}"),
        }
    }
    parts
}

/// What to do with the caller's own prompt once a rewrite produced a new one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PromptPolicy {
    /// Send only the rewritten prompt.
    #[default]
    RewrittenOnly,
    /// Send the rewritten prompt followed by the original one.
    RewrittenThenRaw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleRequest {
    pub prompt: String,
    pub uploads: Vec<ImagePart>,
    pub include_google_styles: bool,
    pub include_default_character: bool,
    pub include_manga_styles: bool,
    pub policy: PromptPolicy,
}

impl AssembleRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            uploads: Vec::new(),
            include_google_styles: true,
            include_default_character: false,
            include_manga_styles: false,
            policy: PromptPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub parts: Vec<ContentPart>,
    pub rewrite: Option<RewriteOutcome>,
}

/// Orders the content parts for one generation call: uploads, default
/// character, manga presets, Google presets, then the text prompt.
///
/// With a rewriter the prompt goes through it first; a blank prompt is
/// replaced by [`DEFAULT_PROMPT`] and is never sent to the rewriter.
pub fn assemble(
    request: &AssembleRequest,
    presets: &StylePresets,
    rewriter: Option<&RewriteOrchestrator>,
) -> Assembled {
    let mut parts: Vec<ContentPart> = request
        .uploads
        .iter()
        .cloned()
        .map(ContentPart::Image)
        .collect();

    if request.include_default_character {
        match presets.default_character() {
            Some(character) => parts.push(ContentPart::Image(character.clone())),
            None => eprintln!("nanoprompt warning: default character requested but not loaded"),
        }
    }
    if request.include_manga_styles {
        parts.extend(presets.parts(PresetKind::Manga).iter().cloned().map(ContentPart::Image));
    }
    if request.include_google_styles {
        parts.extend(presets.parts(PresetKind::Google).iter().cloned().map(ContentPart::Image));
    }

    let raw = request.prompt.trim();
    let raw_prompt = if raw.is_empty() { DEFAULT_PROMPT } else { request.prompt.as_str() };
    let rewrite = match rewriter {
        Some(rewriter) if !raw.is_empty() => Some(rewriter.rewrite_detailed(raw_prompt)),
        _ => None,
    };

    match rewrite.as_ref().and_then(RewriteOutcome::result) {
        Some(result) => {
            parts.push(ContentPart::Text(result.rewritten_prompt.clone()));
            if request.policy == PromptPolicy::RewrittenThenRaw {
                parts.push(ContentPart::Text(raw_prompt.to_string()));
            }
        }
        None => parts.push(ContentPart::Text(raw_prompt.to_string())),
    }

    Assembled { parts, rewrite }
}

/// The fixed preset flows: every preset image of `kind`, then its default prompt.
pub fn preset_flow(kind: PresetKind, presets: &StylePresets) -> Result<Vec<ContentPart>> {
    let images = presets.parts(kind);
    if images.is_empty() {
        bail!("{} style images missing.", kind.label());
    }
    let mut parts: Vec<ContentPart> = images.iter().cloned().map(ContentPart::Image).collect();
    parts.push(ContentPart::Text(kind.default_prompt().to_string()));
    Ok(parts)
}
