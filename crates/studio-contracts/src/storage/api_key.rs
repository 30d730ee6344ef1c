use std::path::PathBuf;

use anyhow::bail;
use serde::Serialize;
use serde_json::Value;

use super::JsonObjectStore;

pub const API_KEY_STORAGE_KEY: &str = "google_ai_api_key";

/// Google AI keys are long and start with `AIza` (or the `GOOGLE_AI` prefix
/// some consoles hand out).
pub fn validate_api_key_format(key: &str) -> bool {
    key.len() > 20 && (key.starts_with("AIza") || key.starts_with("GOOGLE_AI"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStatus {
    pub present: bool,
    pub valid_format: bool,
    pub masked: Option<String>,
}

/// Persists the user's API key under [`API_KEY_STORAGE_KEY`].
#[derive(Debug, Clone)]
pub struct ApiKeyStore {
    store: JsonObjectStore,
}

impl ApiKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonObjectStore::new(path),
        }
    }

    pub fn load(&mut self) -> Option<String> {
        self.store
            .get_string(API_KEY_STORAGE_KEY)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }

    pub fn save(&mut self, key: &str) -> anyhow::Result<()> {
        let key = key.trim();
        if !validate_api_key_format(key) {
            bail!("Invalid API key format. Please check your key.");
        }
        self.store
            .set(API_KEY_STORAGE_KEY, Value::String(key.to_string()))
    }

    pub fn clear(&mut self) -> anyhow::Result<bool> {
        self.store.remove(API_KEY_STORAGE_KEY)
    }

    pub fn status(&mut self) -> KeyStatus {
        match self.load() {
            Some(key) => KeyStatus {
                present: true,
                valid_format: validate_api_key_format(&key),
                masked: Some(mask_key(&key)),
            },
            None => KeyStatus {
                present: false,
                valid_format: false,
                masked: None,
            },
        }
    }
}

fn mask_key(key: &str) -> String {
    let chars = key.chars().collect::<Vec<char>>();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head = chars[..4].iter().collect::<String>();
    let tail = chars[chars.len() - 4..].iter().collect::<String>();
    format!("{head}…{tail}")
}
