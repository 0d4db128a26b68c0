use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::ImageFormat;

use crate::api::Part;

/// A file picked for the next request. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachedFile {
    pub name: String,
    pub mime_type: String,
    /// Base64 payload for images, raw UTF-8 text otherwise.
    pub data: String,
    /// `data:` URL for image thumbnails.
    pub preview: Option<String>,
}

impl AttachedFile {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("Could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read one file. Images are kept as base64 plus a data URL, everything else
/// is decoded as (lossy) UTF-8 text.
pub async fn encode_file(path: PathBuf) -> Result<AttachedFile, AttachmentError> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| AttachmentError::Read { path: path.clone(), source })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(match image_mime(&path, &bytes) {
        Some(mime_type) => {
            let data = STANDARD.encode(&bytes);
            let preview = Some(format!("data:{mime_type};base64,{data}"));
            AttachedFile { name, mime_type, data, preview }
        }
        None => AttachedFile {
            name,
            mime_type: text_mime(&path).into(),
            data: String::from_utf8_lossy(&bytes).into_owned(),
            preview: None,
        },
    })
}

/// The extension decides when present. Content is sniffed only for files
/// without one.
fn image_mime(path: &Path, bytes: &[u8]) -> Option<String> {
    let format = match path.extension() {
        Some(ext) => ImageFormat::from_extension(ext),
        None => image::guess_format(bytes).ok(),
    };
    format.map(|format| format.to_mime_type().to_string())
}

fn text_mime(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js" | "mjs") => "text/javascript",
        Some("json") => "application/json",
        Some("md") => "text/markdown",
        _ => "text/plain",
    }
}

/// Parts for the outgoing turn: the text part first, with text files inlined
/// under a filename marker, followed by one inline-data part per image.
pub fn build_parts(text: &str, files: &[AttachedFile]) -> Vec<Part> {
    let mut merged = text.to_string();
    let mut images = Vec::new();

    for file in files {
        if file.is_image() {
            images.push(Part::InlineData {
                mime_type: file.mime_type.clone(),
                data: file.data.clone(),
            });
        } else {
            merged.push_str(&format!("\n\nAttached File [{}]:\n{}", file.name, file.data));
        }
    }

    let mut parts = Vec::with_capacity(images.len() + 1);
    parts.push(Part::Text(merged));
    parts.extend(images);
    parts
}
