pub mod canvas;
pub mod error;
pub mod gemini;
pub mod prompt;
pub mod provider;
pub mod studio;

pub use error::GenerationError;
pub use gemini::GeminiProvider;
pub use provider::{
    default_provider_registry, DryrunProvider, GenerativeProvider, ProviderRegistry,
    SafetySettings,
};
pub use studio::{GenerationMode, GenerationOutcome, Studio, StudioSettings};
