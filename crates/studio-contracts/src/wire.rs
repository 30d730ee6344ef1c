//! JSON bodies exchanged with the browser front end.

use serde::{Deserialize, Serialize};

use crate::payload::ImageData;

pub const PROMPT_REQUIRED: &str = "Prompt is required";
pub const API_KEY_REQUIRED: &str = "API key is required";
pub const PROMPT_AND_IMAGE_REQUIRED: &str = "Prompt and image are required";
pub const GENERATE_FAILED: &str = "Failed to generate image";
pub const EDIT_FAILED: &str = "Failed to edit image";

/// Body of `POST /api/generate`. Fields are optional on the wire so that a
/// missing prompt or key is reported as a 400 with the route's own message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl GenerateRequest {
    pub fn prompt(&self) -> Option<&str> {
        non_blank(self.prompt.as_deref())
    }

    pub fn api_key(&self) -> Option<&str> {
        non_blank(self.api_key.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub image: ImageData,
    pub prompt: String,
}

impl GenerateResponse {
    pub fn new(image: ImageData, prompt: impl Into<String>) -> Self {
        Self {
            success: true,
            image,
            prompt: prompt.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: None,
        }
    }

    pub fn with_detail(error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: Some(detail.into()),
        }
    }
}

pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn generate_request_reads_camel_case_key() -> anyhow::Result<()> {
        let request: GenerateRequest =
            serde_json::from_value(json!({"prompt": "a cat", "apiKey": "AIza-key"}))?;
        assert_eq!(request.prompt(), Some("a cat"));
        assert_eq!(request.api_key(), Some("AIza-key"));

        let empty: GenerateRequest = serde_json::from_value(json!({"prompt": "  "}))?;
        assert_eq!(empty.prompt(), None);
        assert_eq!(empty.api_key(), None);
        Ok(())
    }

    #[test]
    fn responses_match_front_end_shape() -> anyhow::Result<()> {
        let ok = GenerateResponse::new(ImageData::new("QUJD", "image/png"), "a cat");
        assert_eq!(
            serde_json::to_value(&ok)?,
            json!({
                "success": true,
                "image": {"data": "QUJD", "mimeType": "image/png"},
                "prompt": "a cat",
            })
        );

        let bare = ErrorResponse::new(PROMPT_REQUIRED);
        assert_eq!(serde_json::to_value(&bare)?, json!({"error": "Prompt is required"}));
        let detailed = ErrorResponse::with_detail(GENERATE_FAILED, "quota");
        assert_eq!(
            serde_json::to_value(&detailed)?,
            json!({"error": "Failed to generate image", "detail": "quota"})
        );
        Ok(())
    }
}
