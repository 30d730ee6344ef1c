mod api_key;
mod json_store;

pub use api_key::{validate_api_key_format, ApiKeyStore, KeyStatus, API_KEY_STORAGE_KEY};
pub use json_store::JsonObjectStore;
