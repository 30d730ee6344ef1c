use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use studio_contracts::payload::{resolve_upload_mime, ImageData};
use studio_contracts::wire::{
    non_blank, ErrorResponse, GenerateRequest, GenerateResponse, API_KEY_REQUIRED, EDIT_FAILED,
    GENERATE_FAILED, PROMPT_AND_IMAGE_REQUIRED, PROMPT_REQUIRED,
};
use studio_engine::{GenerationError, GenerationOutcome};
use tracing::{error, info, warn};

use super::AppState;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn api_not_found() -> ApiError {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new("Not found")))
}

pub async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "unreadable generate request");
            return Err(bad_request(PROMPT_REQUIRED, Some(rejection.body_text())));
        }
    };
    let Some(prompt) = request.prompt().map(str::to_string) else {
        return Err(bad_request(PROMPT_REQUIRED, None));
    };
    let Some(api_key) = request.api_key().map(str::to_string) else {
        return Err(bad_request(API_KEY_REQUIRED, None));
    };

    info!(chars = prompt.chars().count(), "text-to-image request");
    let studio = state.studio.clone();
    let outcome = run_blocking(move || studio.text_to_image(&api_key, &prompt)).await;
    respond(outcome, GENERATE_FAILED, PROMPT_REQUIRED)
}

#[derive(Debug, Default)]
struct EditForm {
    prompt: Option<String>,
    api_key: Option<String>,
    image: Option<ImageData>,
    mask: Option<ImageData>,
}

pub async fn edit(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let form = match multipart {
        Ok(multipart) => read_edit_form(multipart).await?,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "unreadable edit request");
            return Err(bad_request(
                PROMPT_AND_IMAGE_REQUIRED,
                Some(rejection.body_text()),
            ));
        }
    };
    let (Some(prompt), Some(image)) = (form.prompt, form.image) else {
        return Err(bad_request(PROMPT_AND_IMAGE_REQUIRED, None));
    };
    let Some(api_key) = form.api_key else {
        return Err(bad_request(API_KEY_REQUIRED, None));
    };

    info!(
        chars = prompt.chars().count(),
        mime = %image.mime_type,
        mask = form.mask.is_some(),
        "image-to-image request"
    );
    let studio = state.studio.clone();
    let mask = form.mask;
    let outcome =
        run_blocking(move || studio.image_to_image(&api_key, &prompt, &image, mask.as_ref())).await;
    respond(outcome, EDIT_FAILED, PROMPT_AND_IMAGE_REQUIRED)
}

async fn read_edit_form(mut multipart: Multipart) -> Result<EditForm, ApiError> {
    let mut form = EditForm::default();
    while let Some(field) = multipart.next_field().await.map_err(unreadable_form)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "prompt" | "apiKey" => {
                let text = field.text().await.map_err(unreadable_form)?;
                let value = non_blank(Some(text.as_str())).map(|value| value.trim().to_string());
                if name == "prompt" {
                    form.prompt = value;
                } else {
                    form.api_key = value;
                }
            }
            "image" | "mask" => {
                let content_type = field.content_type().map(str::to_string);
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(unreadable_form)?;
                let upload = upload_image(&bytes, content_type.as_deref(), file_name.as_deref())
                    .map_err(|err| {
                        bad_request(PROMPT_AND_IMAGE_REQUIRED, Some(format!("{err:#}")))
                    })?;
                if name == "image" {
                    form.image = upload;
                } else {
                    form.mask = upload;
                }
            }
            other => {
                warn!(field = other, "ignoring unknown form field");
            }
        }
    }
    Ok(form)
}

/// Turns an uploaded part into an image payload. Masks exported from the
/// canvas may arrive as a `data:` URL instead of a file.
fn upload_image(
    bytes: &[u8],
    content_type: Option<&str>,
    file_name: Option<&str>,
) -> anyhow::Result<Option<ImageData>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    if bytes.starts_with(b"data:") {
        let raw = std::str::from_utf8(bytes)?;
        return Ok(Some(ImageData::parse_data_url(raw.trim())?));
    }
    let mime_type = resolve_upload_mime(content_type, file_name, bytes);
    Ok(Some(ImageData::from_bytes(bytes, mime_type)))
}

async fn run_blocking<F>(job: F) -> Result<GenerationOutcome, GenerationError>
where
    F: FnOnce() -> Result<GenerationOutcome, GenerationError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .unwrap_or_else(|err| Err(GenerationError::Other(format!("generation task failed: {err}"))))
}

pub(super) fn respond(
    outcome: Result<GenerationOutcome, GenerationError>,
    failure: &str,
    missing_input: &str,
) -> Result<Json<GenerateResponse>, ApiError> {
    match outcome {
        Ok(outcome) => {
            if outcome.attempts > 1 {
                info!(attempts = outcome.attempts, "generated after rephrasing");
            }
            Ok(Json(GenerateResponse::new(outcome.image, outcome.prompt)))
        }
        Err(err) if err.is_client_error() => {
            let message = match err {
                GenerationError::MissingApiKey => API_KEY_REQUIRED,
                _ => missing_input,
            };
            Err(bad_request(message, None))
        }
        Err(err) => {
            error!(error = %err, "{}", failure);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::with_detail(failure, err.user_message())),
            ))
        }
    }
}

fn unreadable_form(err: MultipartError) -> ApiError {
    bad_request(PROMPT_AND_IMAGE_REQUIRED, Some(err.body_text()))
}

fn bad_request(message: &str, detail: Option<String>) -> ApiError {
    let body = match detail {
        Some(detail) => ErrorResponse::with_detail(message, detail),
        None => ErrorResponse::new(message),
    };
    (StatusCode::BAD_REQUEST, Json(body))
}
