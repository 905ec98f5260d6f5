use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use nanoprompt_contracts::events::EventWriter;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::EngineConfig;
use crate::gemini::{first_candidate_parts, GeminiClient};
use crate::media::ContentPart;
use crate::{error_chain_text, map_object};

/// A service that turns ordered content parts into one image (encoded bytes).
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, parts: &[ContentPart]) -> Result<Vec<u8>>;
}

#[derive(Default)]
pub struct GeneratorRegistry {
    generators: BTreeMap<String, Box<dyn ImageGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<G: ImageGenerator + 'static>(&mut self, generator: G) {
        self.generators
            .insert(generator.name().to_string(), Box::new(generator));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ImageGenerator> {
        self.generators.get(name).map(|generator| generator.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.generators.keys().cloned().collect()
    }
}

pub fn default_generator_registry(config: &EngineConfig) -> GeneratorRegistry {
    let mut generators = GeneratorRegistry::new();
    generators.register(DryrunImageGenerator::default());
    generators.register(GeminiImageGenerator::new(GeminiClient::new(config.clone())));
    generators
}

pub struct GeminiImageGenerator {
    client: GeminiClient,
    model: String,
}

impl GeminiImageGenerator {
    pub fn new(client: GeminiClient) -> Self {
        let model = client.config().image_model.clone();
        Self { client, model }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn build_payload(parts: &[ContentPart]) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": parts.iter().map(ContentPart::to_json).collect::<Vec<Value>>(),
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
            },
        })
    }
}

impl ImageGenerator for GeminiImageGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, parts: &[ContentPart]) -> Result<Vec<u8>> {
        let payload = Self::build_payload(parts);
        let response = self
            .client
            .generate_content(&self.model, &payload)
            .context("Gemini generation failed")?;
        match extract_image_bytes(&response)? {
            Some(bytes) => Ok(bytes),
            None => bail!("No image bytes returned from Gemini."),
        }
    }
}

/// First inline image payload of the first candidate, base64-decoded.
pub fn extract_image_bytes(response: &Value) -> Result<Option<Vec<u8>>> {
    for part in first_candidate_parts(response) {
        let data = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(|inline| inline.get("data"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .context("Gemini image base64 decode failed")?;
        return Ok(Some(bytes));
    }
    Ok(None)
}

/// Offline generator: a solid square whose colour is derived from the text parts.
#[derive(Debug, Clone, Copy)]
pub struct DryrunImageGenerator {
    pub size: u32,
}

impl Default for DryrunImageGenerator {
    fn default() -> Self {
        Self { size: 256 }
    }
}

impl ImageGenerator for DryrunImageGenerator {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, parts: &[ContentPart]) -> Result<Vec<u8>> {
        let digest = parts_digest(parts);
        let mut image = RgbImage::new(self.size.max(1), self.size.max(1));
        for pixel in image.pixels_mut() {
            *pixel = Rgb([digest[0], digest[1], digest[2]]);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("failed to encode dryrun image")?;
        Ok(bytes)
    }
}

fn parts_digest(parts: &[ContentPart]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for part in parts {
        match part {
            ContentPart::Text(text) => hasher.update(text.as_bytes()),
            ContentPart::Image(image) => hasher.update(&image.data),
        }
    }
    hasher.finalize().to_vec()
}

/// Decodes `bytes` and writes them as `generated_<UTC timestamp>.png` in `out_dir`.
pub fn save_png(out_dir: &Path, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let decoded = image::load_from_memory(bytes).context("generated image could not be decoded")?;
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%6f");
    let out_path = out_dir.join(format!("generated_{stamp}.png"));
    decoded
        .save_with_format(&out_path, ImageFormat::Png)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    Ok(out_path)
}

/// Runs one generation and saves the result, logging start, failure and
/// completion to `events`.
pub fn generate_to_dir(
    generator: &dyn ImageGenerator,
    parts: &[ContentPart],
    out_dir: &Path,
    events: &EventWriter,
) -> Result<PathBuf> {
    let images = parts
        .iter()
        .filter(|part| matches!(part, ContentPart::Image(_)))
        .count();
    let digest = hex::encode(&parts_digest(parts)[..6]);
    events.record(
        "generation_started",
        map_object(json!({
            "generator": generator.name(),
            "parts": parts.len(),
            "images": images,
            "parts_digest": digest,
        })),
    );

    let started = Instant::now();
    let saved = generator
        .generate(parts)
        .and_then(|bytes| save_png(out_dir, &bytes));
    match saved {
        Ok(path) => {
            events.record(
                "image_saved",
                map_object(json!({
                    "generator": generator.name(),
                    "path": path.to_string_lossy().to_string(),
                    "latency_s": started.elapsed().as_secs_f64(),
                })),
            );
            Ok(path)
        }
        Err(err) => {
            events.record(
                "generation_failed",
                map_object(json!({
                    "generator": generator.name(),
                    "error": error_chain_text(&err, 2048),
                })),
            );
            Err(err)
        }
    }
}
