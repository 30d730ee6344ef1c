use std::path::Path;

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub const DEFAULT_IMAGE_MIME: &str = "image/png";
pub const DOWNLOAD_FILE_PREFIX: &str = "nano-banana-generated";

/// A base64 image payload as it travels between the model, the HTTP API and
/// the gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    pub data: String,
    pub mime_type: String,
}

impl ImageData {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            data: BASE64.encode(bytes),
            mime_type: mime_type.into(),
        }
    }

    pub fn decode(&self) -> anyhow::Result<Vec<u8>> {
        BASE64
            .decode(self.data.as_bytes())
            .with_context(|| format!("invalid base64 payload for {}", self.mime_type))
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn parse_data_url(raw: &str) -> anyhow::Result<Self> {
        let Some(rest) = raw.trim().strip_prefix("data:") else {
            bail!("not a data URL");
        };
        let Some((header, data)) = rest.split_once(',') else {
            bail!("data URL is missing its payload");
        };
        let Some(mime_type) = header.strip_suffix(";base64") else {
            bail!("only base64 data URLs are supported");
        };
        let mime_type = if mime_type.is_empty() {
            DEFAULT_IMAGE_MIME
        } else {
            mime_type
        };
        Ok(Self::new(data, mime_type))
    }

    pub fn file_extension(&self) -> &str {
        file_extension(&self.mime_type)
    }

    pub fn download_file_name(&self, millis: i64) -> String {
        download_file_name(&self.mime_type, millis)
    }

    /// Pixel dimensions, read from the encoded header.
    pub fn dimensions(&self) -> anyhow::Result<(u32, u32)> {
        let bytes = self.decode()?;
        let image = image::load_from_memory(&bytes)
            .with_context(|| format!("failed to decode {} payload", self.mime_type))?;
        Ok((image.width(), image.height()))
    }
}

/// Extension derived from the MIME subtype, `png` when there is none.
pub fn file_extension(mime_type: &str) -> &str {
    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    match essence.split_once('/') {
        Some((_, subtype)) if !subtype.is_empty() => subtype,
        _ => "png",
    }
}

pub fn download_file_name(mime_type: &str, millis: i64) -> String {
    format!(
        "{DOWNLOAD_FILE_PREFIX}-{millis}.{}",
        file_extension(mime_type)
    )
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        _ => "png",
    }
}

pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(mime_for_extension)
}

/// Upload extension: the file name's own extension wins, otherwise it is
/// derived from the MIME type.
pub fn extension_for_upload(file_name: Option<&str>, mime_type: Option<&str>) -> String {
    let from_name = file_name
        .map(Path::new)
        .and_then(|path| path.extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty());
    match from_name {
        Some(ext) => ext.to_string(),
        None => extension_for_mime(mime_type.unwrap_or_default()).to_string(),
    }
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

/// MIME type for an uploaded image: the declared content type when it names
/// an image, else the file name's extension, else the sniffed format.
pub fn resolve_upload_mime(
    content_type: Option<&str>,
    file_name: Option<&str>,
    bytes: &[u8],
) -> String {
    if let Some(declared) = content_type
        .map(|value| value.split(';').next().unwrap_or_default().trim())
        .filter(|value| value.starts_with("image/"))
    {
        return declared.to_ascii_lowercase();
    }
    file_name
        .map(Path::new)
        .and_then(mime_for_path)
        .or_else(|| sniff_mime(bytes))
        .unwrap_or(DEFAULT_IMAGE_MIME)
        .to_string()
}
