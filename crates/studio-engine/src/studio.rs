use serde_json::{json, Value};
use studio_contracts::events::{EventPayload, EventWriter, StudioEvent};
use studio_contracts::models::{
    ModelSelector, CAPABILITY_EDIT, CAPABILITY_IMAGE, CAPABILITY_TEXT,
};
use studio_contracts::payload::ImageData;
use studio_contracts::wire::non_blank;
use tracing::{info, warn};

use crate::error::GenerationError;
use crate::gemini::truncate_text;
use crate::prompt::{improve_prompt, rephrase_blocked_prompt};
use crate::provider::{
    map_object, GenerativeProvider, ImageGenerateRequest, ImageGenerateResponse, ProviderRegistry,
    SafetySettings,
};

const LOG_PROMPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    TextToImage,
    ImageToImage,
}

impl GenerationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextToImage => "text_to_image",
            Self::ImageToImage => "image_to_image",
        }
    }

    fn capability(self) -> &'static str {
        match self {
            Self::TextToImage => CAPABILITY_IMAGE,
            Self::ImageToImage => CAPABILITY_EDIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioSettings {
    pub provider: String,
    pub image_model: String,
    pub text_model: String,
    pub safety: SafetySettings,
    pub improve_prompts: bool,
}

impl Default for StudioSettings {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            image_model: "gemini-2.5-flash-image-preview".to_string(),
            text_model: "gemini-2.5-pro".to_string(),
            safety: SafetySettings::default(),
            improve_prompts: true,
        }
    }
}

/// A generated image together with the prompt that actually produced it.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub mode: GenerationMode,
    pub image: ImageData,
    pub prompt: String,
    pub original_prompt: String,
    pub provider: String,
    pub image_model: String,
    pub text_model: String,
    pub attempts: u32,
    pub warnings: Vec<String>,
}

struct ResolvedModels {
    image: String,
    text: String,
    warnings: Vec<String>,
}

struct Attempt<'a> {
    mode: GenerationMode,
    provider: &'a dyn GenerativeProvider,
    api_key: &'a str,
    models: &'a ResolvedModels,
    original_prompt: &'a str,
    image: Option<&'a ImageData>,
    mask: Option<&'a ImageData>,
}

/// Generation workflow shared by the HTTP server and the CLI.
///
/// Requests are independent; the only state is read-only configuration and
/// the event log.
pub struct Studio {
    providers: ProviderRegistry,
    settings: StudioSettings,
    selector: ModelSelector,
    events: Option<EventWriter>,
}

impl Studio {
    pub fn new(
        providers: ProviderRegistry,
        settings: StudioSettings,
        events: Option<EventWriter>,
    ) -> Self {
        Self {
            providers,
            settings,
            selector: ModelSelector::new(None),
            events,
        }
    }

    pub fn settings(&self) -> &StudioSettings {
        &self.settings
    }

    pub fn event_writer(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    pub fn text_to_image(
        &self,
        api_key: &str,
        prompt: &str,
    ) -> Result<GenerationOutcome, GenerationError> {
        let prompt = non_blank(Some(prompt)).ok_or(GenerationError::MissingPrompt)?;
        let api_key = non_blank(Some(api_key)).ok_or(GenerationError::MissingApiKey)?;
        let mode = GenerationMode::TextToImage;
        let provider = self.provider()?;
        let models = self.resolve_models(mode)?;
        self.record_started(mode, provider.name(), &models, prompt);

        let working_prompt = if self.settings.improve_prompts {
            let improved = improve_prompt(provider, api_key, &models.text, prompt);
            if improved != prompt {
                self.record(
                    StudioEvent::PromptImproved,
                    json!({
                        "original_prompt": prompt,
                        "prompt": improved,
                        "model": models.text,
                    }),
                );
            }
            improved
        } else {
            prompt.to_string()
        };

        self.run(
            Attempt {
                mode,
                provider,
                api_key,
                models: &models,
                original_prompt: prompt,
                image: None,
                mask: None,
            },
            working_prompt,
        )
    }

    /// Edits `image` guided by `prompt`. The prompt is sent as written since
    /// the model has to relate it to the uploaded image.
    pub fn image_to_image(
        &self,
        api_key: &str,
        prompt: &str,
        image: &ImageData,
        mask: Option<&ImageData>,
    ) -> Result<GenerationOutcome, GenerationError> {
        let prompt = non_blank(Some(prompt)).ok_or(GenerationError::MissingPrompt)?;
        if image.data.trim().is_empty() {
            return Err(GenerationError::MissingImage);
        }
        let api_key = non_blank(Some(api_key)).ok_or(GenerationError::MissingApiKey)?;
        if let Some(mask) = mask {
            check_mask_dimensions(image, mask)?;
        }
        let mode = GenerationMode::ImageToImage;
        let provider = self.provider()?;
        let models = self.resolve_models(mode)?;
        self.record_started(mode, provider.name(), &models, prompt);

        self.run(
            Attempt {
                mode,
                provider,
                api_key,
                models: &models,
                original_prompt: prompt,
                image: Some(image),
                mask,
            },
            prompt.to_string(),
        )
    }

    fn provider(&self) -> Result<&dyn GenerativeProvider, GenerationError> {
        self.providers.get(&self.settings.provider).ok_or_else(|| {
            GenerationError::Other(format!(
                "provider '{}' not registered (available: [{}])",
                self.settings.provider,
                self.providers.names().join(", ")
            ))
        })
    }

    fn resolve_models(&self, mode: GenerationMode) -> Result<ResolvedModels, GenerationError> {
        let mut warnings = Vec::new();
        let image =
            self.resolve_model(&self.settings.image_model, mode.capability(), &mut warnings)?;
        let text =
            self.resolve_model(&self.settings.text_model, CAPABILITY_TEXT, &mut warnings)?;
        Ok(ResolvedModels {
            image,
            text,
            warnings,
        })
    }

    fn resolve_model(
        &self,
        requested: &str,
        capability: &str,
        warnings: &mut Vec<String>,
    ) -> Result<String, GenerationError> {
        let provider = self.settings.provider.as_str();
        let mut selection = self
            .selector
            .select(Some(requested), capability, Some(provider))
            .map_err(GenerationError::Other)?;
        if selection.model.provider != provider {
            selection = self
                .selector
                .select(None, capability, Some(provider))
                .map_err(GenerationError::Other)?;
            selection.fallback_reason = Some(format!(
                "Model '{requested}' is not served by provider '{provider}'."
            ));
        }
        if selection.model.provider != provider {
            return Err(GenerationError::Other(format!(
                "No '{capability}' models available for provider '{provider}'."
            )));
        }
        if let Some(reason) = selection.fallback_reason {
            warn!(requested, model = %selection.model.name, %reason, "model fallback");
            warnings.push(format!("{reason} Using '{}'.", selection.model.name));
        }
        Ok(selection.model.name)
    }

    /// Generates once and, when the result is a safety block, rephrases the
    /// prompt and tries exactly one more time.
    fn run(
        &self,
        attempt: Attempt<'_>,
        prompt: String,
    ) -> Result<GenerationOutcome, GenerationError> {
        let first = self.generate(&attempt, &prompt);
        let err = match first {
            Ok(response) => return Ok(self.succeed(&attempt, response, prompt, 1)),
            Err(err) if err.is_blocked() => err,
            Err(err) => return Err(self.fail(&attempt, err, 1)),
        };

        self.record_blocked(&attempt, &err, 1);
        let rephrased = match rephrase_blocked_prompt(
            attempt.provider,
            attempt.api_key,
            &attempt.models.text,
            &prompt,
        ) {
            Ok(rephrased) => rephrased,
            Err(rephrase_err) => {
                warn!(error = %rephrase_err, "rephrasing a blocked prompt failed");
                return Err(self.fail(&attempt, err, 1));
            }
        };
        self.record(
            StudioEvent::PromptRephrased,
            json!({
                "mode": attempt.mode.as_str(),
                "blocked_prompt": prompt,
                "prompt": rephrased,
                "model": attempt.models.text,
            }),
        );

        match self.generate(&attempt, &rephrased) {
            Ok(response) => {
                let mut outcome = self.succeed(&attempt, response, rephrased, 2);
                outcome
                    .warnings
                    .push("Prompt was rephrased after a safety block.".to_string());
                Ok(outcome)
            }
            Err(err) => {
                if err.is_blocked() {
                    self.record_blocked(&attempt, &err, 2);
                }
                Err(self.fail(&attempt, err, 2))
            }
        }
    }

    fn generate(
        &self,
        attempt: &Attempt<'_>,
        prompt: &str,
    ) -> Result<ImageGenerateResponse, GenerationError> {
        info!(
            mode = attempt.mode.as_str(),
            provider = attempt.provider.name(),
            model = %attempt.models.image,
            prompt = %truncate_text(prompt, LOG_PROMPT_CHARS),
            "requesting image"
        );
        let request = ImageGenerateRequest {
            api_key: attempt.api_key.to_string(),
            model: attempt.models.image.clone(),
            prompt: prompt.to_string(),
            image: attempt.image.cloned(),
            mask: attempt.mask.cloned(),
            safety: self.settings.safety.clone(),
        };
        let response = attempt.provider.generate_image(&request)?;
        for text in &response.text {
            info!(
                text = %truncate_text(text, LOG_PROMPT_CHARS),
                "model returned text alongside the image"
            );
        }
        Ok(response)
    }

    fn succeed(
        &self,
        attempt: &Attempt<'_>,
        response: ImageGenerateResponse,
        prompt: String,
        attempts: u32,
    ) -> GenerationOutcome {
        let ImageGenerateResponse {
            image,
            warnings: provider_warnings,
            ..
        } = response;
        let mut warnings = attempt.models.warnings.clone();
        warnings.extend(provider_warnings);
        self.record(
            StudioEvent::GenerationSucceeded,
            json!({
                "mode": attempt.mode.as_str(),
                "provider": attempt.provider.name(),
                "model": attempt.models.image,
                "prompt": prompt,
                "attempts": attempts,
                "mime_type": image.mime_type,
            }),
        );
        GenerationOutcome {
            mode: attempt.mode,
            image,
            prompt,
            original_prompt: attempt.original_prompt.to_string(),
            provider: attempt.provider.name().to_string(),
            image_model: attempt.models.image.clone(),
            text_model: attempt.models.text.clone(),
            attempts,
            warnings,
        }
    }

    fn fail(&self, attempt: &Attempt<'_>, err: GenerationError, attempts: u32) -> GenerationError {
        warn!(mode = attempt.mode.as_str(), error = %err, attempts, "generation failed");
        self.record(
            StudioEvent::GenerationFailed,
            json!({
                "mode": attempt.mode.as_str(),
                "provider": attempt.provider.name(),
                "model": attempt.models.image,
                "attempts": attempts,
                "error": err.to_string(),
                "message": err.user_message(),
            }),
        );
        err
    }

    fn record_started(
        &self,
        mode: GenerationMode,
        provider: &str,
        models: &ResolvedModels,
        prompt: &str,
    ) {
        self.record(
            StudioEvent::GenerationStarted,
            json!({
                "mode": mode.as_str(),
                "provider": provider,
                "image_model": models.image,
                "text_model": models.text,
                "prompt": prompt,
                "warnings": models.warnings,
            }),
        );
    }

    fn record_blocked(&self, attempt: &Attempt<'_>, err: &GenerationError, attempt_number: u32) {
        let reason = match err {
            GenerationError::Blocked { reason } => reason.clone(),
            other => other.to_string(),
        };
        self.record(
            StudioEvent::GenerationBlocked,
            json!({
                "mode": attempt.mode.as_str(),
                "attempt": attempt_number,
                "reason": reason,
            }),
        );
    }

    fn record(&self, event: StudioEvent, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let payload: EventPayload = map_object(payload);
        if let Err(err) = events.record(event, payload) {
            warn!(event = event.as_str(), error = %err, "failed to write event");
        }
    }
}

fn check_mask_dimensions(image: &ImageData, mask: &ImageData) -> Result<(), GenerationError> {
    let (width, height) = image
        .dimensions()
        .map_err(|err| GenerationError::Other(format!("could not read image: {err:#}")))?;
    let (mask_width, mask_height) = mask
        .dimensions()
        .map_err(|err| GenerationError::Other(format!("could not read mask: {err:#}")))?;
    if (mask_width, mask_height) != (width, height) {
        return Err(GenerationError::Other(format!(
            "mask dimensions {mask_width}x{mask_height} do not match image {width}x{height}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use image::{GrayImage, ImageFormat, Luma};

    use super::*;
    use crate::gemini::GeminiProvider;
    use crate::provider::{DryrunProvider, TextGenerateRequest, TextPurpose};

    #[derive(Default)]
    struct Script {
        images: VecDeque<Result<ImageData, GenerationError>>,
        texts: VecDeque<Result<String, GenerationError>>,
        image_prompts: Vec<String>,
        text_purposes: Vec<TextPurpose>,
    }

    /// Provider answering from queues; clones share the script.
    #[derive(Clone, Default)]
    struct ScriptedProvider {
        script: Arc<Mutex<Script>>,
    }

    impl ScriptedProvider {
        fn image(self, result: Result<ImageData, GenerationError>) -> Self {
            self.script.lock().unwrap().images.push_back(result);
            self
        }

        fn text(self, result: Result<&str, GenerationError>) -> Self {
            self.script
                .lock()
                .unwrap()
                .texts
                .push_back(result.map(str::to_string));
            self
        }

        fn image_prompts(&self) -> Vec<String> {
            self.script.lock().unwrap().image_prompts.clone()
        }

        fn text_purposes(&self) -> Vec<TextPurpose> {
            self.script.lock().unwrap().text_purposes.clone()
        }
    }

    impl GenerativeProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "gemini"
        }

        fn generate_image(
            &self,
            request: &ImageGenerateRequest,
        ) -> Result<ImageGenerateResponse, GenerationError> {
            let mut script = self.script.lock().unwrap();
            script.image_prompts.push(request.prompt.clone());
            let image = script
                .images
                .pop_front()
                .unwrap_or(Err(GenerationError::NoImage))?;
            Ok(ImageGenerateResponse {
                image,
                text: Vec::new(),
                warnings: Vec::new(),
            })
        }

        fn generate_text(&self, request: &TextGenerateRequest) -> Result<String, GenerationError> {
            let mut script = self.script.lock().unwrap();
            script.text_purposes.push(request.purpose);
            script
                .texts
                .pop_front()
                .unwrap_or(Err(GenerationError::NoContent))
        }
    }

    fn studio_with(provider: &ScriptedProvider, events: Option<EventWriter>) -> Studio {
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        Studio::new(registry, StudioSettings::default(), events)
    }

    fn png(width: u32, height: u32) -> ImageData {
        let image = GrayImage::from_pixel(width, height, Luma([128]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        ImageData::from_bytes(&bytes, "image/png")
    }

    fn event_types(events: &EventWriter) -> Vec<String> {
        std::fs::read_to_string(events.path())
            .unwrap()
            .lines()
            .map(|line| {
                let value: Value = serde_json::from_str(line).unwrap();
                value["type"].as_str().unwrap_or_default().to_string()
            })
            .collect()
    }

    #[test]
    fn text_to_image_uses_the_improved_prompt() {
        let provider = ScriptedProvider::default()
            .text(Ok("Improved prompt:\nA ginger cat asleep on a sunlit quilt"))
            .image(Ok(png(8, 8)));
        let studio = studio_with(&provider, None);

        let outcome = studio.text_to_image("AIza-test-key", "cat").unwrap();
        assert_eq!(outcome.prompt, "A ginger cat asleep on a sunlit quilt");
        assert_eq!(outcome.original_prompt, "cat");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.image_model, "gemini-2.5-flash-image-preview");
        assert_eq!(
            provider.image_prompts(),
            vec!["A ginger cat asleep on a sunlit quilt".to_string()]
        );
    }

    #[test]
    fn missing_key_or_prompt_never_reaches_the_provider() {
        let provider = ScriptedProvider::default();
        let studio = studio_with(&provider, None);

        assert_eq!(
            studio.text_to_image("  ", "cat").err(),
            Some(GenerationError::MissingApiKey)
        );
        assert_eq!(
            studio.text_to_image("AIza-test-key", "").err(),
            Some(GenerationError::MissingPrompt)
        );
        assert!(provider.image_prompts().is_empty());
        assert!(provider.text_purposes().is_empty());
    }

    #[test]
    fn blocked_prompt_is_rephrased_and_retried_once() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "session-a");
        let provider = ScriptedProvider::default()
            .text(Ok("A castle at dusk with banners"))
            .image(Err(GenerationError::blocked("SAFETY")))
            .text(Ok("A quiet castle at dusk"))
            .image(Ok(png(4, 4)));
        let studio = studio_with(&provider, Some(events.clone()));

        let outcome = studio.text_to_image("AIza-test-key", "castle siege")?;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.prompt, "A quiet castle at dusk");
        assert_eq!(
            provider.text_purposes(),
            vec![TextPurpose::ImprovePrompt, TextPurpose::RephraseBlocked]
        );
        assert_eq!(
            event_types(&events),
            vec![
                "generation_started",
                "prompt_improved",
                "generation_blocked",
                "prompt_rephrased",
                "generation_succeeded",
            ]
        );
        Ok(())
    }

    #[test]
    fn second_block_is_surfaced_without_another_retry() {
        let provider = ScriptedProvider::default()
            .text(Ok("A knight charging across a field"))
            .image(Err(GenerationError::blocked("SAFETY")))
            .text(Ok("A knight riding across a field"))
            .image(Err(GenerationError::blocked("IMAGE_SAFETY")))
            .image(Ok(png(4, 4)));
        let studio = studio_with(&provider, None);

        let err = studio.text_to_image("AIza-test-key", "knight").err();
        assert_eq!(err, Some(GenerationError::blocked("IMAGE_SAFETY")));
        assert_eq!(provider.image_prompts().len(), 2);
    }

    #[test]
    fn failed_rephrase_surfaces_the_original_block() {
        let provider = ScriptedProvider::default()
            .image(Err(GenerationError::blocked("SAFETY")))
            .text(Err(GenerationError::QuotaExceeded));
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        let settings = StudioSettings {
            improve_prompts: false,
            ..StudioSettings::default()
        };
        let studio = Studio::new(registry, settings, None);

        let err = studio.text_to_image("AIza-test-key", "storm").err();
        assert_eq!(err, Some(GenerationError::blocked("SAFETY")));
        assert_eq!(provider.image_prompts(), vec!["storm".to_string()]);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let provider = ScriptedProvider::default()
            .text(Ok("A lighthouse in heavy fog at night"))
            .image(Err(GenerationError::QuotaExceeded));
        let studio = studio_with(&provider, None);

        let err = studio.text_to_image("AIza-test-key", "lighthouse").err();
        assert_eq!(err, Some(GenerationError::QuotaExceeded));
        assert_eq!(provider.image_prompts().len(), 1);
    }

    #[test]
    fn image_to_image_keeps_the_original_prompt() {
        let provider = ScriptedProvider::default().image(Ok(png(16, 12)));
        let studio = studio_with(&provider, None);

        let outcome = studio
            .image_to_image(
                "AIza-test-key",
                "make the sky purple",
                &png(16, 12),
                Some(&png(16, 12)),
            )
            .unwrap();
        assert_eq!(outcome.prompt, "make the sky purple");
        assert_eq!(outcome.mode, GenerationMode::ImageToImage);
        assert!(provider.text_purposes().is_empty());
    }

    #[test]
    fn image_to_image_rejects_mismatched_masks() {
        let provider = ScriptedProvider::default();
        let studio = studio_with(&provider, None);

        let err = studio
            .image_to_image("AIza-test-key", "recolor", &png(16, 12), Some(&png(8, 8)))
            .err();
        assert_eq!(
            err,
            Some(GenerationError::Other(
                "mask dimensions 8x8 do not match image 16x12".to_string()
            ))
        );
        assert!(provider.image_prompts().is_empty());

        let empty = ImageData::new("", "image/png");
        assert_eq!(
            studio.image_to_image("AIza-test-key", "recolor", &empty, None).err(),
            Some(GenerationError::MissingImage)
        );
    }

    #[test]
    fn dryrun_exercises_the_block_retry_offline() {
        let mut registry = ProviderRegistry::new();
        registry.register(DryrunProvider);
        let settings = StudioSettings {
            provider: "dryrun".to_string(),
            ..StudioSettings::default()
        };
        let studio = Studio::new(registry, settings, None);

        let outcome = studio
            .text_to_image("AIza-test-key", "[[blocked]] a cat")
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.image_model, "dryrun-image-1");
        assert_eq!(outcome.text_model, "dryrun-text-1");
        assert!(!outcome.prompt.contains("[[blocked]]"));
        assert!(outcome
            .warnings
            .iter()
            .any(|warning| warning.contains("not served by provider 'dryrun'")));

        let err = studio
            .text_to_image("AIza-test-key", "[[always-blocked]] a cat")
            .err();
        assert!(err.map(|err| err.is_blocked()).unwrap_or(false));
    }

    #[test]
    fn unknown_provider_is_reported() {
        let studio = Studio::new(
            ProviderRegistry::new(),
            StudioSettings::default(),
            None,
        );
        let err = studio.text_to_image("AIza-test-key", "cat").err();
        assert_eq!(
            err,
            Some(GenerationError::Other(
                "provider 'gemini' not registered (available: [])".to_string()
            ))
        );
    }

    #[test]
    fn transport_failures_keep_the_key_out_of_errors_and_events() -> anyhow::Result<()> {
        let secret = "AIzaSECRETSECRETSECRET123";
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "session-key");
        let mut registry = ProviderRegistry::new();
        registry.register(
            GeminiProvider::new(Some("http://127.0.0.1:1/v1beta")).with_transport_retries(0, 0.1),
        );
        let settings = StudioSettings {
            improve_prompts: false,
            ..StudioSettings::default()
        };
        let studio = Studio::new(registry, settings, Some(events.clone()));

        let err = studio
            .text_to_image(secret, "a cat")
            .err()
            .ok_or_else(|| anyhow::anyhow!("unreachable host should fail"))?;
        assert!(matches!(err, GenerationError::Transport(_)));
        assert!(!err.to_string().contains(secret));
        assert!(!err.user_message().contains(secret));

        let log = std::fs::read_to_string(events.path())?;
        assert!(log.contains("generation_failed"));
        assert!(!log.contains(secret));
        Ok(())
    }
}
