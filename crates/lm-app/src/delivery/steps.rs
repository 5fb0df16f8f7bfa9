//! The ordered download chain. Each step is tried on its own and reports
//! success or failure; the caller decides whether to move on.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::delivery::blob::Blob;
use crate::delivery::host::{DeliveryHost, HostError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStep {
    /// Object URL behind a download anchor
    ObjectUrl,
    /// Percent-encoded `data:` URI behind a download anchor
    DataUri,
    /// Object URL opened in a new window
    NewWindow,
    /// Text copied to the clipboard with instructions to save it by hand
    Clipboard,
}

impl DeliveryStep {
    /// Chain order
    pub const CHAIN: [DeliveryStep; 4] = [
        Self::ObjectUrl,
        Self::DataUri,
        Self::NewWindow,
        Self::Clipboard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObjectUrl => "object_url",
            Self::DataUri => "data_uri",
            Self::NewWindow => "new_window",
            Self::Clipboard => "clipboard",
        }
    }

    pub fn next(&self) -> Option<DeliveryStep> {
        let position = Self::CHAIN.iter().position(|step| step == self)?;
        Self::CHAIN.get(position + 1).copied()
    }

    pub fn attempt(
        &self,
        host: &dyn DeliveryHost,
        blob: &Blob,
        filename: &str,
    ) -> Result<StepSuccess, StepError> {
        match self {
            Self::ObjectUrl => try_object_url(host, blob, filename),
            Self::DataUri => try_data_uri(host, blob, filename),
            Self::NewWindow => try_new_window(host, blob, filename),
            Self::Clipboard => try_clipboard(host, blob, filename),
        }
    }
}

impl fmt::Display for DeliveryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("content of type {0} cannot be pasted as text")]
    NotTextLike(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepSuccess {
    pub step: DeliveryStep,
    /// Object URL to revoke once the host has had time to start the download
    pub object_url: Option<String>,
}

pub fn try_object_url(
    host: &dyn DeliveryHost,
    blob: &Blob,
    filename: &str,
) -> Result<StepSuccess, StepError> {
    let url = host.create_object_url(blob)?;
    if let Err(e) = host.click_anchor(&url, filename) {
        host.revoke_object_url(&url);
        return Err(e.into());
    }
    Ok(StepSuccess {
        step: DeliveryStep::ObjectUrl,
        object_url: Some(url),
    })
}

pub fn try_data_uri(
    host: &dyn DeliveryHost,
    blob: &Blob,
    filename: &str,
) -> Result<StepSuccess, StepError> {
    host.click_anchor(&blob.data_uri(), filename)?;
    Ok(StepSuccess {
        step: DeliveryStep::DataUri,
        object_url: None,
    })
}

/// A blocked popup counts as a failure of this step.
pub fn try_new_window(
    host: &dyn DeliveryHost,
    blob: &Blob,
    _filename: &str,
) -> Result<StepSuccess, StepError> {
    let url = host.create_object_url(blob)?;
    if let Err(e) = host.open_window(&url) {
        host.revoke_object_url(&url);
        return Err(e.into());
    }
    Ok(StepSuccess {
        step: DeliveryStep::NewWindow,
        object_url: Some(url),
    })
}

pub fn try_clipboard(
    host: &dyn DeliveryHost,
    blob: &Blob,
    filename: &str,
) -> Result<StepSuccess, StepError> {
    let text = blob
        .as_text()
        .filter(|_| blob.is_text_like())
        .ok_or_else(|| StepError::NotTextLike(blob.content_type().to_string()))?;

    host.write_clipboard(text)?;
    host.notify(&format!(
        "The download could not be started. The content of {filename} was copied to the \
         clipboard; paste it into an editor and save it as {filename}."
    ));
    Ok(StepSuccess {
        step: DeliveryStep::Clipboard,
        object_url: None,
    })
}
