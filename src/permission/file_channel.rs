use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

/// Temp-file permission handshake for requests that carry no request id.
///
/// A hook on the backend side drops a request file and polls for a response
/// file; paths embed the session id so concurrent app instances cannot
/// collide. Taking a request is read-then-delete, so each request is
/// consumed at most once.
pub struct PermissionFileChannel {
    dir: PathBuf,
    session_id: String,
}

impl PermissionFileChannel {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::in_dir(std::env::temp_dir(), session_id)
    }

    pub fn in_dir(dir: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            session_id: session_id.into(),
        }
    }

    pub fn request_path(&self) -> PathBuf {
        self.dir
            .join(format!("deskchat-permission-request-{}.json", self.session_id))
    }

    pub fn response_path(&self) -> PathBuf {
        self.dir
            .join(format!("deskchat-permission-response-{}.json", self.session_id))
    }

    /// Atomically take the pending request, if any. The file is deleted
    /// before the content is parsed so a malformed request cannot be
    /// processed twice; malformed content yields `None`.
    pub fn take_request(&self) -> Result<Option<Value>> {
        let path = self.request_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read permission request {}", path.display()))?;
        let _ = std::fs::remove_file(&path);
        Ok(serde_json::from_str(&content).ok())
    }

    pub fn write_response(&self, allow: bool, message: Option<&str>) -> Result<()> {
        let response = serde_json::json!({
            "allow": allow,
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        let path = self.response_path();
        std::fs::write(&path, serde_json::to_string_pretty(&response)?)
            .with_context(|| format!("failed to write permission response {}", path.display()))
    }

    pub fn cleanup(&self) {
        remove_if_present(&self.request_path());
        remove_if_present(&self.response_path());
    }
}

fn remove_if_present(path: &Path) {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
}
