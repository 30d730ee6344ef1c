use thiserror::Error;

/// Everything a generation request can end in, other than an image.
///
/// The variants are what the UI distinguishes; `user_message` is the single
/// line it shows.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("prompt is required")]
    MissingPrompt,
    #[error("image is required")]
    MissingImage,
    #[error("API key is required")]
    MissingApiKey,
    #[error("API key rejected by the model service")]
    InvalidApiKey,
    #[error("blocked by safety filters: {reason}")]
    Blocked { reason: String },
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("model service unavailable")]
    ServerUnavailable,
    #[error("no candidates returned")]
    NoCandidates,
    #[error("no content parts in response")]
    NoContent,
    #[error("no image data in response")]
    NoImage,
    #[error("upstream request failed ({status}): {body}")]
    Upstream { status: u16, body: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("{0}")]
    Other(String),
}

impl GenerationError {
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked {
            reason: reason.into(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Errors caused by the request itself rather than by the model service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MissingPrompt | Self::MissingImage | Self::MissingApiKey
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::MissingPrompt => "Please enter a prompt.".to_string(),
            Self::MissingImage => "Please upload an image to edit.".to_string(),
            Self::MissingApiKey => {
                "Please add your Google AI API key before generating.".to_string()
            }
            Self::InvalidApiKey => "Invalid API key. Please check your API key.".to_string(),
            Self::Blocked { .. } => {
                "Image generation was blocked due to content filters. Please try a different prompt."
                    .to_string()
            }
            Self::QuotaExceeded => {
                "API quota exceeded. Please check your Gemini API usage limits.".to_string()
            }
            Self::ServerUnavailable => {
                "Google's servers are temporarily unavailable. Please try again in a few moments."
                    .to_string()
            }
            Self::NoCandidates => {
                "No candidates returned from the model. The prompt may have been filtered or blocked."
                    .to_string()
            }
            Self::NoContent => "No content parts found in the response.".to_string(),
            Self::NoImage => {
                "No image data found in the response. The model may not support image generation or the prompt was rejected."
                    .to_string()
            }
            Self::Upstream { status, .. } => {
                format!("The model service rejected the request ({status}).")
            }
            Self::Transport(_) => {
                "Could not reach the model service. Please check your connection.".to_string()
            }
            Self::Other(message) => message.clone(),
        }
    }
}

/// Maps an error that only exists as text onto the taxonomy.
pub fn classify_message(message: &str) -> GenerationError {
    let lowered = message.to_ascii_lowercase();
    if message.contains("API_KEY") || lowered.contains("api key not valid") {
        return GenerationError::InvalidApiKey;
    }
    if lowered.contains("quota") || message.contains("RESOURCE_EXHAUSTED") {
        return GenerationError::QuotaExceeded;
    }
    if message.contains("500") || message.contains("503") || lowered.contains("unavailable") {
        return GenerationError::ServerUnavailable;
    }
    if lowered.contains("safety") || lowered.contains("blocked") {
        return GenerationError::blocked(message.trim());
    }
    GenerationError::Other(message.trim().to_string())
}

impl From<anyhow::Error> for GenerationError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(existing) = err.downcast_ref::<GenerationError>() {
            return existing.clone();
        }
        classify_message(&format!("{err:#}"))
    }
}
