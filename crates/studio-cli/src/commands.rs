use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Map, Value};
use studio_contracts::gallery::Gallery;
use studio_contracts::payload::{mime_for_path, sniff_mime, ImageData, DEFAULT_IMAGE_MIME};
use studio_contracts::receipts::{
    build_receipt, write_receipt, ReceiptInputs, ReceiptRequest, ReceiptResult,
};
use studio_engine::canvas::{compose_preview, export_mask, export_mask_png, StrokeDocument};
use studio_engine::{GenerationError, GenerationOutcome};
use tracing::info;

use crate::config::StudioConfig;
use crate::server::{self, AppState, ServeOptions};
use crate::{EditArgs, GenerateArgs, KeyAction, MaskArgs, ServeArgs};

pub fn serve(config: &StudioConfig, args: ServeArgs) -> Result<i32> {
    let studio = config.build_studio(!args.no_improve)?;
    info!(
        provider = %config.provider,
        image_model = %config.image_model,
        data_dir = %config.data_dir.display(),
        "starting studio server"
    );
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(server::serve(
        AppState::new(studio),
        ServeOptions {
            host: args.host,
            port: args.port,
            static_dir: args.static_dir,
        },
    ))?;
    Ok(0)
}

pub fn generate(config: &StudioConfig, args: GenerateArgs) -> Result<i32> {
    let api_key = require_api_key(config, args.api_key.as_deref())?;
    let studio = config.build_studio(!args.no_improve)?;
    let outcome = studio
        .text_to_image(&api_key, &args.prompt)
        .map_err(surface)?;
    let inputs = ReceiptInputs::default();
    save_outcome(&args.out, &args.prompt, outcome, inputs)?;
    Ok(0)
}

pub fn edit(config: &StudioConfig, args: EditArgs) -> Result<i32> {
    let api_key = require_api_key(config, args.api_key.as_deref())?;
    let image = read_image(&args.image)?;
    let (width, height) = image.dimensions()?;

    let mut inputs = ReceiptInputs {
        source_image: Some(args.image.to_string_lossy().to_string()),
        ..ReceiptInputs::default()
    };
    let mask = match args.strokes.as_deref() {
        Some(path) => {
            let document = StrokeDocument::load(path)?;
            let strokes = document.strokes_for(width, height);
            inputs.mask = Some(path.to_string_lossy().to_string());
            inputs.stroke_count = strokes.len();
            Some(export_mask(&strokes, width, height)?)
        }
        None => None,
    };

    let studio = config.build_studio(false)?;
    let outcome = studio
        .image_to_image(&api_key, &args.prompt, &image, mask.as_ref())
        .map_err(surface)?;
    save_outcome(&args.out, &args.prompt, outcome, inputs)?;
    Ok(0)
}

pub fn mask(args: MaskArgs) -> Result<i32> {
    let source = image::open(&args.image)
        .with_context(|| format!("failed to open {}", args.image.display()))?;
    let (width, height) = (source.width(), source.height());
    let document = StrokeDocument::load(&args.strokes)?;
    let strokes = document.strokes_for(width, height);

    let png = export_mask_png(&strokes, width, height)?;
    write_file(&args.out, &png)?;
    println!("Mask {width}x{height} -> {}", args.out.display());

    if let Some(preview_path) = args.preview.as_ref() {
        let preview = compose_preview(&source.to_rgba8(), &strokes);
        if let Some(parent) = preview_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        preview
            .save(preview_path)
            .with_context(|| format!("failed to write {}", preview_path.display()))?;
        println!("Preview -> {}", preview_path.display());
    }
    Ok(0)
}

pub fn key(config: &StudioConfig, action: KeyAction) -> Result<i32> {
    let mut store = config.key_store();
    match action {
        KeyAction::Save { key } => {
            store.save(key.trim())?;
            println!("API key saved to {}", config.storage_path().display());
        }
        KeyAction::Show => {
            let status = store.status();
            if !status.present {
                println!("No API key stored.");
                return Ok(1);
            }
            let validity = if status.valid_format {
                "valid format"
            } else {
                "unexpected format"
            };
            println!(
                "{} ({validity})",
                status.masked.unwrap_or_default()
            );
        }
        KeyAction::Clear => {
            if store.clear()? {
                println!("API key removed.");
            } else {
                println!("No API key stored.");
            }
        }
    }
    Ok(0)
}

fn require_api_key(config: &StudioConfig, explicit: Option<&str>) -> Result<String> {
    config.resolve_api_key(explicit).ok_or_else(|| {
        anyhow!("API key is required: pass --api-key, set GEMINI_API_KEY or run `studio-rs key save`")
    })
}

fn surface(err: GenerationError) -> anyhow::Error {
    anyhow!("{} ({err})", err.user_message())
}

fn read_image(path: &Path) -> Result<ImageData> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mime_type = mime_for_path(path)
        .or_else(|| sniff_mime(&bytes))
        .unwrap_or(DEFAULT_IMAGE_MIME);
    Ok(ImageData::from_bytes(&bytes, mime_type))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

/// Writes the image under its download name plus a receipt beside it.
fn save_outcome(
    out_dir: &Path,
    request_prompt: &str,
    outcome: GenerationOutcome,
    inputs: ReceiptInputs,
) -> Result<(PathBuf, PathBuf)> {
    let mut gallery = Gallery::new();
    let index = gallery.push(outcome.image.clone());
    let image_path = gallery.save(index, out_dir, chrono::Utc::now().timestamp_millis())?;
    let receipt_path = receipt_path_for(&image_path);

    let request = ReceiptRequest {
        mode: outcome.mode.as_str().to_string(),
        prompt: request_prompt.to_string(),
        provider: outcome.provider.clone(),
        image_model: outcome.image_model.clone(),
        text_model: Some(outcome.text_model.clone()),
        inputs,
    };
    let result = ReceiptResult {
        final_prompt: outcome.prompt.clone(),
        attempts: outcome.attempts,
        mime_type: outcome.image.mime_type.clone(),
        warnings: outcome.warnings.clone(),
    };
    let metadata = receipt_metadata(&outcome);
    let receipt = build_receipt(&request, &result, &image_path, &receipt_path, &metadata);
    write_receipt(&receipt_path, &receipt)?;

    println!("Saved {}", image_path.display());
    if outcome.prompt != request_prompt {
        println!("Prompt used: {}", outcome.prompt);
    }
    for warning in &outcome.warnings {
        println!("Warning: {warning}");
    }
    Ok((image_path, receipt_path))
}

fn receipt_path_for(image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("image");
    image_path.with_file_name(format!("{stem}.receipt.json"))
}

fn receipt_metadata(outcome: &GenerationOutcome) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(
        "original_prompt".to_string(),
        Value::String(outcome.original_prompt.clone()),
    );
    metadata.insert("rephrased".to_string(), json!(outcome.attempts > 1));
    metadata.insert(
        "created_at".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    metadata
}
