use std::collections::BTreeMap;
use std::io::Cursor;

use anyhow::Context;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use studio_contracts::payload::ImageData;

use crate::error::GenerationError;
use crate::gemini::GeminiProvider;

/// Prompts containing this marker are reported as blocked by the dry-run
/// provider until a rephrase removes it.
pub const DRYRUN_BLOCK_MARKER: &str = "[[blocked]]";
/// Blocked by the dry-run provider no matter how it is rephrased.
pub const DRYRUN_HARD_BLOCK_MARKER: &str = "[[always-blocked]]";

const DRYRUN_DEFAULT_SIZE: u32 = 512;

pub const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Safety thresholds sent with every image request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetySettings {
    pub threshold: String,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            threshold: "BLOCK_ONLY_HIGH".to_string(),
        }
    }
}

impl SafetySettings {
    pub fn new(threshold: impl Into<String>) -> Self {
        Self {
            threshold: threshold.into(),
        }
    }

    pub fn to_json(&self) -> Vec<Value> {
        HARM_CATEGORIES
            .into_iter()
            .map(|category| {
                json!({
                    "category": category,
                    "threshold": self.threshold,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ImageGenerateRequest {
    pub api_key: String,
    pub model: String,
    pub prompt: String,
    pub image: Option<ImageData>,
    pub mask: Option<ImageData>,
    pub safety: SafetySettings,
}

#[derive(Debug, Clone)]
pub struct ImageGenerateResponse {
    pub image: ImageData,
    pub text: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextPurpose {
    ImprovePrompt,
    RephraseBlocked,
}

#[derive(Debug, Clone)]
pub struct TextGenerateRequest {
    pub api_key: String,
    pub model: String,
    pub prompt: String,
    pub purpose: TextPurpose,
}

pub trait GenerativeProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate_image(
        &self,
        request: &ImageGenerateRequest,
    ) -> Result<ImageGenerateResponse, GenerationError>;
    fn generate_text(&self, request: &TextGenerateRequest) -> Result<String, GenerationError>;
}

#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Box<dyn GenerativeProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: GenerativeProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn GenerativeProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(gemini: GeminiProvider) -> ProviderRegistry {
    let mut providers = ProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(gemini);
    providers
}

/// Offline provider: paints a flat image coloured from the prompt hash.
pub struct DryrunProvider;

impl GenerativeProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate_image(
        &self,
        request: &ImageGenerateRequest,
    ) -> Result<ImageGenerateResponse, GenerationError> {
        if request.prompt.contains(DRYRUN_BLOCK_MARKER)
            || request.prompt.contains(DRYRUN_HARD_BLOCK_MARKER)
        {
            return Err(GenerationError::blocked("SAFETY"));
        }
        let (width, height) = match request.image.as_ref() {
            Some(source) => source.dimensions()?,
            None => (DRYRUN_DEFAULT_SIZE, DRYRUN_DEFAULT_SIZE),
        };
        let bytes = render_dryrun_png(width, height, &request.prompt)?;
        Ok(ImageGenerateResponse {
            image: ImageData::from_bytes(&bytes, "image/png"),
            text: Vec::new(),
            warnings: Vec::new(),
        })
    }

    fn generate_text(&self, request: &TextGenerateRequest) -> Result<String, GenerationError> {
        let subject = quoted_subject(&request.prompt).unwrap_or(request.prompt.as_str());
        match request.purpose {
            TextPurpose::ImprovePrompt => Ok(format!(
                "Improved prompt:\n{subject}, highly detailed, soft natural lighting, 50mm photograph"
            )),
            TextPurpose::RephraseBlocked => {
                let cleaned = subject.replace(DRYRUN_BLOCK_MARKER, "");
                Ok(format!("Here is the rewrite:\n{}", cleaned.trim()))
            }
        }
    }
}

fn quoted_subject(prompt: &str) -> Option<&str> {
    let start = prompt.find('"')? + 1;
    let len = prompt[start..].find('"')?;
    Some(&prompt[start..start + len])
}

fn render_dryrun_png(width: u32, height: u32, prompt: &str) -> anyhow::Result<Vec<u8>> {
    let (r, g, b) = color_from_prompt(prompt);
    let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode dry-run image")?;
    Ok(bytes)
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
