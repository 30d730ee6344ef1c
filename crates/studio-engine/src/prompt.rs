use tracing::{debug, warn};

use crate::error::GenerationError;
use crate::provider::{GenerativeProvider, TextGenerateRequest, TextPurpose};

const NOISE_MARKERS: [&str; 4] = ["improved prompt:", "rewritten prompt:", "here is", "here's"];

pub fn improvement_instruction(prompt: &str) -> String {
    format!(
        "You are an expert at writing image generation prompts. Take this basic prompt: \"{prompt}\"\n\n\
Rewrite it as a single, detailed image generation prompt that includes:\n\
- Specific visual details (subject appearance, clothing, expressions)\n\
- Setting and environment details\n\
- Lighting and mood\n\
- Camera angle and composition\n\
- Art style or photographic details\n\n\
Return ONLY the improved prompt, no explanations or additional text.\n\n\
Improved prompt:"
    )
}

pub fn rephrase_instruction(prompt: &str) -> String {
    format!(
        "An image generation request was blocked by content-policy filters. The original prompt was: \"{prompt}\"\n\n\
Rewrite it so that it keeps the same visual subject, composition and style but avoids anything that could be read as \
violent, sexual, hateful, harassing or dangerous. Do not mention the policy.\n\n\
Return ONLY the rewritten prompt, no explanations or additional text.\n\n\
Rewritten prompt:"
    )
}

/// Picks the prompt out of a model reply that may carry a preamble.
///
/// The first line longer than 10 characters without a "here is" style
/// marker wins; otherwise the last line.
pub fn extract_prompt_line(reply: &str) -> String {
    let lines = reply.trim().split('\n').collect::<Vec<&str>>();
    let picked = lines
        .iter()
        .find(|line| {
            let lowered = line.to_lowercase();
            line.len() > 10 && !NOISE_MARKERS.iter().any(|marker| lowered.contains(marker))
        })
        .or_else(|| lines.last())
        .copied()
        .unwrap_or_default();
    picked.trim().to_string()
}

/// Rewrites `prompt` for better results; any failure keeps the original.
pub fn improve_prompt(
    provider: &dyn GenerativeProvider,
    api_key: &str,
    model: &str,
    prompt: &str,
) -> String {
    let request = TextGenerateRequest {
        api_key: api_key.to_string(),
        model: model.to_string(),
        prompt: improvement_instruction(prompt),
        purpose: TextPurpose::ImprovePrompt,
    };
    match provider.generate_text(&request) {
        Ok(reply) => {
            let improved = extract_prompt_line(&reply);
            if improved.is_empty() {
                return prompt.to_string();
            }
            debug!(original = %prompt, improved = %improved, "prompt improved");
            improved
        }
        Err(err) => {
            warn!(error = %err, "prompt improvement failed, keeping original prompt");
            prompt.to_string()
        }
    }
}

/// Asks for a policy-safe rewording of a blocked prompt.
pub fn rephrase_blocked_prompt(
    provider: &dyn GenerativeProvider,
    api_key: &str,
    model: &str,
    prompt: &str,
) -> Result<String, GenerationError> {
    let request = TextGenerateRequest {
        api_key: api_key.to_string(),
        model: model.to_string(),
        prompt: rephrase_instruction(prompt),
        purpose: TextPurpose::RephraseBlocked,
    };
    let reply = provider.generate_text(&request)?;
    let rewritten = extract_prompt_line(&reply);
    if rewritten.is_empty() {
        return Err(GenerationError::NoContent);
    }
    Ok(rewritten)
}
