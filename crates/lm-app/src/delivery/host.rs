use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::delivery::blob::{Blob, parse_data_uri};

const OBJECT_URL_PREFIX: &str = "blob:lora-dash/";
const FALLBACK_FILENAME: &str = "download.bin";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostError {
    #[error("the new window was blocked")]
    PopupBlocked,

    #[error("{0} is not available here")]
    Unsupported(&'static str),

    #[error("unknown link target {0}")]
    UnknownHref(String),

    #[error("could not write {path}: {reason}")]
    Io { path: String, reason: String },
}

/// The primitives a download can be built from. A browser front end maps
/// these onto object URLs, anchors, popups and the clipboard.
pub trait DeliveryHost: Send + Sync {
    fn create_object_url(&self, blob: &Blob) -> Result<String, HostError>;

    fn revoke_object_url(&self, url: &str);

    /// Follows `href` as a download saved under `filename`.
    fn click_anchor(&self, href: &str, filename: &str) -> Result<(), HostError>;

    fn open_window(&self, href: &str) -> Result<(), HostError>;

    fn write_clipboard(&self, text: &str) -> Result<(), HostError>;

    /// Shows a message to the user.
    fn notify(&self, message: &str);

    /// Navigates to a remote location.
    fn open_location(&self, location: &str) -> Result<(), HostError>;
}

/// Saves downloads into a directory. There is no window or clipboard, so
/// those steps fail and the chain moves on.
pub struct DownloadDirHost {
    dir: PathBuf,
    object_urls: Mutex<HashMap<String, Blob>>,
    saved: Mutex<Vec<PathBuf>>,
}

impl DownloadDirHost {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            object_urls: Mutex::new(HashMap::new()),
            saved: Mutex::new(Vec::new()),
        }
    }

    /// Files written so far, oldest first
    pub fn saved_files(&self) -> Vec<PathBuf> {
        self.saved.lock().clone()
    }

    pub fn live_object_urls(&self) -> usize {
        self.object_urls.lock().len()
    }

    fn resolve(&self, href: &str) -> Result<Blob, HostError> {
        if href.starts_with(OBJECT_URL_PREFIX) {
            return self
                .object_urls
                .lock()
                .get(href)
                .cloned()
                .ok_or_else(|| HostError::UnknownHref(href.to_string()));
        }
        parse_data_uri(href).ok_or_else(|| HostError::UnknownHref(truncate_href(href)))
    }

    /// Reserves the final name with an empty file, writes next to it and
    /// renames over the reservation. Concurrent saves of one filename get
    /// distinct names.
    fn write_file(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, HostError> {
        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let target = reserve_path(&self.dir, &safe_filename(filename))
            .map_err(|e| io_error(&self.dir, e))?;
        let temp = target.with_extension(format!("part-{}", Uuid::new_v4().simple()));

        let written = fs::File::create(&temp)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&temp, &target));

        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            let _ = fs::remove_file(&target);
            return Err(io_error(&target, e));
        }
        Ok(target)
    }
}

impl DeliveryHost for DownloadDirHost {
    fn create_object_url(&self, blob: &Blob) -> Result<String, HostError> {
        let url = format!("{OBJECT_URL_PREFIX}{}", Uuid::new_v4());
        self.object_urls.lock().insert(url.clone(), blob.clone());
        Ok(url)
    }

    fn revoke_object_url(&self, url: &str) {
        if self.object_urls.lock().remove(url).is_some() {
            debug!("Revoked {url}");
        }
    }

    fn click_anchor(&self, href: &str, filename: &str) -> Result<(), HostError> {
        let blob = self.resolve(href)?;
        let path = self.write_file(filename, blob.bytes())?;
        info!("Saved {} ({} bytes)", path.display(), blob.len());
        self.saved.lock().push(path);
        Ok(())
    }

    fn open_window(&self, _href: &str) -> Result<(), HostError> {
        Err(HostError::PopupBlocked)
    }

    fn write_clipboard(&self, _text: &str) -> Result<(), HostError> {
        Err(HostError::Unsupported("clipboard"))
    }

    fn notify(&self, message: &str) {
        info!("{message}");
    }

    fn open_location(&self, location: &str) -> Result<(), HostError> {
        info!("Download available at {location}");
        Ok(())
    }
}

/// Strips directories so a remote filename cannot escape the download dir.
fn safe_filename(filename: &str) -> String {
    Path::new(filename.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .unwrap_or(FALLBACK_FILENAME)
        .to_string()
}

fn io_error(path: &Path, e: io::Error) -> HostError {
    HostError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Creates the first free one of `name.ext`, `name (1).ext`, `name (2).ext`, ...
/// `create_new` makes the check and the claim a single step.
fn reserve_path(dir: &Path, filename: &str) -> io::Result<PathBuf> {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    let extension = path.extension().and_then(|e| e.to_str());

    let mut n = 0u32;
    loop {
        let candidate = match (n, extension) {
            (0, _) => dir.join(filename),
            (n, Some(ext)) => dir.join(format!("{stem} ({n}).{ext}")),
            (n, None) => dir.join(format!("{stem} ({n})")),
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

fn truncate_href(href: &str) -> String {
    href.chars().take(64).collect()
}
