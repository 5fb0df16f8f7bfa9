use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// What a backend hands back for a finished job's output.
///
/// The queue backend cannot serve static files, so it embeds the file in
/// the response (`Inline`). The direct backend usually returns a locator
/// (`Reference`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Reference { location: String },
    Inline(InlinePayload),
}

impl Artifact {
    pub fn filename(&self) -> &str {
        match self {
            Self::Reference { location } => location
                .rsplit(['/', '\\'])
                .find(|segment| !segment.is_empty())
                .unwrap_or(location.as_str()),
            Self::Inline(payload) => &payload.filename,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlinePayload {
    pub filename: String,
    pub encoded_content: String,
    pub content_type: Option<String>,
    pub byte_size: u64,
}

impl InlinePayload {
    pub fn content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOptions {
    pub include_images: bool,
    pub include_loras: bool,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            include_images: true,
            include_loras: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkSource {
    Location(String),
    Encoded(String),
}

/// One file in a bulk listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkArtifact {
    pub filename: String,
    pub size: u64,
    pub file_type: String,
    pub source: BulkSource,
}

impl BulkArtifact {
    pub fn to_artifact(&self) -> Artifact {
        match &self.source {
            BulkSource::Location(location) => Artifact::Reference {
                location: location.clone(),
            },
            BulkSource::Encoded(content) => Artifact::Inline(InlinePayload {
                filename: self.filename.clone(),
                encoded_content: content.clone(),
                content_type: Some(guess_content_type(&self.filename).to_string()),
                byte_size: self.size,
            }),
        }
    }
}

/// Flat bulk listing. Duplicates reported by the backend are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkListing {
    pub items: Vec<BulkArtifact>,
    pub total_count: usize,
    pub total_bytes: u64,
}

impl BulkListing {
    pub fn from_items(items: Vec<BulkArtifact>) -> Self {
        let total_bytes = items.iter().map(|item| item.size).sum();
        Self {
            total_count: items.len(),
            total_bytes,
            items,
        }
    }
}

/// A trained LoRA file stored on the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFile {
    pub filename: String,
    #[serde(default, alias = "full_path", alias = "relative_path")]
    pub path: Option<String>,
    #[serde(default, alias = "size")]
    pub size_bytes: u64,
    #[serde(default, alias = "modified_date")]
    pub modified: Option<String>,
}

/// A file sent along with a training-data upload
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Best-effort MIME type from a file extension
pub fn guess_content_type(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "txt" | "caption" => "text/plain",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "zip" => "application/zip",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
