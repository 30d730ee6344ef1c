use std::env;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use studio_contracts::events::EventWriter;
use studio_contracts::storage::ApiKeyStore;
use studio_engine::{
    default_provider_registry, GeminiProvider, SafetySettings, Studio, StudioSettings,
};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8046;
pub const DATA_DIR_NAME: &str = ".banana-studio";
const MIN_REQUEST_TIMEOUT_S: f64 = 15.0;
const MAX_REQUEST_TIMEOUT_S: f64 = 300.0;

/// Flags shared by every subcommand, each with an environment fallback.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Image provider: `gemini` or `dryrun`.
    #[arg(long, global = true, env = "STUDIO_PROVIDER", default_value = "gemini")]
    pub provider: String,
    #[arg(
        long,
        global = true,
        env = "STUDIO_IMAGE_MODEL",
        default_value = "gemini-2.5-flash-image-preview"
    )]
    pub image_model: String,
    #[arg(long, global = true, env = "STUDIO_TEXT_MODEL", default_value = "gemini-2.5-pro")]
    pub text_model: String,
    #[arg(long, global = true, env = "STUDIO_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
    #[arg(long, global = true, env = "GEMINI_API_BASE")]
    pub api_base: Option<String>,
    #[arg(
        long,
        global = true,
        env = "STUDIO_SAFETY_THRESHOLD",
        default_value = "BLOCK_ONLY_HIGH"
    )]
    pub safety_threshold: String,
    /// Per-request timeout in seconds.
    #[arg(long, global = true, env = "STUDIO_REQUEST_TIMEOUT", default_value_t = 90.0)]
    pub request_timeout: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudioConfig {
    pub provider: String,
    pub image_model: String,
    pub text_model: String,
    pub data_dir: PathBuf,
    pub api_base: Option<String>,
    pub safety_threshold: String,
    pub request_timeout_s: f64,
}

impl StudioConfig {
    pub fn from_args(args: &CommonArgs) -> Self {
        Self {
            provider: args.provider.trim().to_ascii_lowercase(),
            image_model: args.image_model.trim().to_string(),
            text_model: args.text_model.trim().to_string(),
            data_dir: args.data_dir.clone().unwrap_or_else(default_data_dir),
            api_base: args
                .api_base
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            safety_threshold: args.safety_threshold.trim().to_string(),
            request_timeout_s: clamp_timeout(args.request_timeout),
        }
    }

    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    /// JSON object file standing in for browser local storage.
    pub fn storage_path(&self) -> PathBuf {
        self.data_dir.join("storage.json")
    }

    pub fn key_store(&self) -> ApiKeyStore {
        ApiKeyStore::new(self.storage_path())
    }

    pub fn studio_settings(&self, improve_prompts: bool) -> StudioSettings {
        StudioSettings {
            provider: self.provider.clone(),
            image_model: self.image_model.clone(),
            text_model: self.text_model.clone(),
            safety: SafetySettings::new(self.safety_threshold.clone()),
            improve_prompts,
        }
    }

    pub fn build_studio(&self, improve_prompts: bool) -> Result<Studio> {
        std::fs::create_dir_all(&self.data_dir)?;
        let gemini = GeminiProvider::new(self.api_base.as_deref())
            .with_request_timeout(self.request_timeout_s);
        let events = EventWriter::new(self.events_path(), uuid::Uuid::new_v4().to_string());
        Ok(Studio::new(
            default_provider_registry(gemini),
            self.studio_settings(improve_prompts),
            Some(events),
        ))
    }

    /// `--api-key` (or `GEMINI_API_KEY`) first, then the stored key.
    pub fn resolve_api_key(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| self.key_store().load())
    }
}

pub fn default_data_dir() -> PathBuf {
    match env::var_os("HOME").filter(|home| !home.is_empty()) {
        Some(home) => PathBuf::from(home).join(DATA_DIR_NAME),
        None => PathBuf::from(DATA_DIR_NAME),
    }
}

fn clamp_timeout(seconds: f64) -> f64 {
    if seconds.is_finite() {
        seconds.clamp(MIN_REQUEST_TIMEOUT_S, MAX_REQUEST_TIMEOUT_S)
    } else {
        90.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(data_dir: PathBuf) -> CommonArgs {
        CommonArgs {
            provider: " Dryrun ".to_string(),
            image_model: "dryrun-image-1".to_string(),
            text_model: "dryrun-text-1".to_string(),
            data_dir: Some(data_dir),
            api_base: Some("  ".to_string()),
            safety_threshold: "BLOCK_NONE".to_string(),
            request_timeout: 1000.0,
        }
    }

    #[test]
    fn config_normalises_flags() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let config = StudioConfig::from_args(&args(temp.path().to_path_buf()));
        assert_eq!(config.provider, "dryrun");
        assert_eq!(config.api_base, None);
        assert_eq!(config.request_timeout_s, 300.0);
        assert_eq!(config.events_path(), temp.path().join("events.jsonl"));

        let settings = config.studio_settings(false);
        assert_eq!(settings.safety, SafetySettings::new("BLOCK_NONE"));
        assert!(!settings.improve_prompts);
        Ok(())
    }

    #[test]
    fn explicit_key_wins_over_stored_key() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let config = StudioConfig::from_args(&args(temp.path().to_path_buf()));
        assert_eq!(config.resolve_api_key(None), None);

        let stored = "AIzaSyStoredKey0123456789";
        config.key_store().save(stored)?;
        assert_eq!(config.resolve_api_key(None).as_deref(), Some(stored));
        assert_eq!(
            config.resolve_api_key(Some(" AIzaExplicit ")).as_deref(),
            Some("AIzaExplicit")
        );
        assert_eq!(config.resolve_api_key(Some("")).as_deref(), Some(stored));
        Ok(())
    }

    #[test]
    fn timeout_is_clamped() {
        assert_eq!(clamp_timeout(1.0), 15.0);
        assert_eq!(clamp_timeout(90.0), 90.0);
        assert_eq!(clamp_timeout(f64::NAN), 90.0);
    }
}
