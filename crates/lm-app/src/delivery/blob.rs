use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use lm_core::{DEFAULT_CONTENT_TYPE, InlinePayload};
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, percent_encode};

use crate::delivery::DeliveryError;

/// Decoded bytes with the content type they are served as
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    bytes: Arc<[u8]>,
    content_type: String,
}

impl Blob {
    pub fn new(bytes: impl Into<Arc<[u8]>>, content_type: &str) -> Self {
        let content_type = content_type.trim();
        Self {
            bytes: bytes.into(),
            content_type: if content_type.is_empty() {
                DEFAULT_CONTENT_TYPE.to_string()
            } else {
                content_type.to_string()
            },
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `data:` URI with the raw bytes percent-encoded.
    pub fn data_uri(&self) -> String {
        format!(
            "data:{},{}",
            self.content_type,
            percent_encode(&self.bytes, NON_ALPHANUMERIC)
        )
    }

    /// Whether pasting the content into an editor is a sensible last resort.
    pub fn is_text_like(&self) -> bool {
        let content_type = self.content_type.to_ascii_lowercase();
        let textual_type = content_type.starts_with("text/")
            || ["json", "yaml", "yml", "xml", "csv", "javascript", "toml"]
                .iter()
                .any(|marker| content_type.contains(marker));
        textual_type && std::str::from_utf8(&self.bytes).is_ok()
    }

    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    /// Short printable view of the content for diagnostics.
    pub fn preview(&self, max_chars: usize) -> String {
        match self.as_text() {
            Some(text) => text.chars().take(max_chars).collect(),
            None => {
                let shown = self.bytes.len().min(max_chars);
                format!(
                    "<{} binary bytes> {}",
                    self.bytes.len(),
                    BASE64.encode(&self.bytes[..shown])
                )
            }
        }
    }
}

/// Decodes an inline payload. Whitespace inside the base64 text is ignored.
pub fn decode_payload(payload: &InlinePayload) -> Result<Blob, DeliveryError> {
    let compact: String = payload
        .encoded_content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|e| DeliveryError::Decode {
            filename: payload.filename.clone(),
            reason: e.to_string(),
        })?;

    Ok(Blob::new(bytes, payload.content_type()))
}

/// Reverses [`Blob::data_uri`]; base64 data URIs are accepted too.
pub fn parse_data_uri(uri: &str) -> Option<Blob> {
    let rest = uri.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;

    let (content_type, is_base64) = match meta.strip_suffix(";base64") {
        Some(content_type) => (content_type, true),
        None => (meta, false),
    };

    let bytes = if is_base64 {
        BASE64.decode(data).ok()?
    } else {
        percent_decode_str(data).collect::<Vec<u8>>()
    };

    Some(Blob::new(bytes, content_type))
}
