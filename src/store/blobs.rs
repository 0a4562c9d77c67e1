//! Inline file storage. Uploaded documents live base64-encoded in the
//! `files` map of the same store and are addressed by `file://<uuid>` handles.

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{keys, Store};
use crate::error::PortalError;
use crate::model::BlobRecord;

pub const FILE_HANDLE_PREFIX: &str = "file://";

/// Limits applied to an upload before anything is stored.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    /// Accepted MIME types; empty accepts anything.
    pub accept: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            accept: vec!["application/pdf".to_string()],
        }
    }
}

impl UploadPolicy {
    pub fn check(&self, size: u64, mime_type: &str) -> Result<(), PortalError> {
        if size > self.max_bytes {
            return Err(PortalError::validation(format!(
                "file size exceeds maximum allowed size ({} bytes)",
                self.max_bytes
            )));
        }
        if !self.accept.is_empty()
            && !self
                .accept
                .iter()
                .any(|a| accepts_mime(a, mime_type))
        {
            return Err(PortalError::validation(format!(
                "file type {} is not accepted",
                mime_type
            )));
        }
        Ok(())
    }
}

/// `image/*` style wildcards match on the top-level type.
fn accepts_mime(pattern: &str, mime_type: &str) -> bool {
    let pattern = pattern.trim();
    if let Some(top) = pattern.strip_suffix("/*") {
        return mime_type
            .split_once('/')
            .map(|(t, _)| t.eq_ignore_ascii_case(top))
            .unwrap_or(false);
    }
    pattern.eq_ignore_ascii_case(mime_type.trim())
}

fn handle_id(handle: &str) -> Option<&str> {
    handle
        .strip_prefix(FILE_HANDLE_PREFIX)
        .filter(|id| !id.is_empty())
}

impl Store {
    fn read_files(&self) -> BTreeMap<String, BlobRecord> {
        let Some(text) = self.read_raw(keys::FILES) else {
            return BTreeMap::new();
        };
        match serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&text) {
            Ok(raw) => raw
                .into_iter()
                .filter_map(|(id, v)| match serde_json::from_value::<BlobRecord>(v) {
                    Ok(b) => Some((id, b)),
                    Err(e) => {
                        warn!(id = %id, error = %e, "skipping unreadable file record");
                        None
                    }
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "files map is not a JSON object; treating as empty");
                BTreeMap::new()
            }
        }
    }

    fn write_files(&mut self, files: &BTreeMap<String, BlobRecord>) -> anyhow::Result<()> {
        let text = serde_json::to_string(files).context("failed to serialize files")?;
        self.write_raw(keys::FILES, &text)
    }

    /// Stores `content` and returns its `file://<id>` handle.
    pub fn store_blob(&mut self, content: &[u8], name: &str, mime_type: &str) -> anyhow::Result<String> {
        let mut files = self.read_files();
        let id = Uuid::new_v4().to_string();
        let record = BlobRecord {
            id: id.clone(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size: content.len() as u64,
            data: BASE64.encode(content),
            sha256: format!("{:x}", Sha256::digest(content)),
            upload_date: chrono::Utc::now().to_rfc3339(),
        };
        files.insert(id.clone(), record);
        self.write_files(&files)?;
        debug!(id = %id, name, size = content.len(), "file stored");
        Ok(format!("{}{}", FILE_HANDLE_PREFIX, id))
    }

    /// Validates against `policy` and stores.
    pub fn upload_blob(
        &mut self,
        content: &[u8],
        name: &str,
        mime_type: &str,
        policy: &UploadPolicy,
    ) -> anyhow::Result<String> {
        policy.check(content.len() as u64, mime_type)?;
        self.store_blob(content, name, mime_type)
    }

    pub fn blob_info(&self, handle: &str) -> Option<BlobRecord> {
        let id = handle_id(handle)?;
        self.read_files().remove(id)
    }

    /// The stored bytes, or `None` for unknown or undecodable handles.
    pub fn resolve_blob(&self, handle: &str) -> Option<Vec<u8>> {
        let record = self.blob_info(handle)?;
        match BASE64.decode(record.data.as_bytes()) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(handle, error = %e, "stored file is not valid base64");
                None
            }
        }
    }

    /// Strings that are not `file://` handles pass through unchanged;
    /// handles become `data:` URLs, or `None` when missing.
    pub fn resolve_url(&self, url: &str) -> Option<String> {
        if !url.starts_with(FILE_HANDLE_PREFIX) {
            return Some(url.to_string());
        }
        let mime_type = self.blob_info(url)?.mime_type;
        let bytes = self.resolve_blob(url)?;
        Some(format!("data:{};base64,{}", mime_type, BASE64.encode(bytes)))
    }

    pub fn delete_blob(&mut self, handle: &str) -> anyhow::Result<bool> {
        let Some(id) = handle_id(handle) else {
            return Ok(false);
        };
        let mut files = self.read_files();
        if files.remove(id).is_none() {
            return Ok(false);
        }
        self.write_files(&files)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_resolve_is_byte_identical() {
        let mut store = Store::in_memory().expect("store");
        let content: Vec<u8> = (0u8..=255).chain(b"%PDF-1.7\n".iter().copied()).collect();
        let handle = store
            .store_blob(&content, "result.pdf", "application/pdf")
            .expect("store");
        assert!(handle.starts_with("file://"));
        assert_eq!(store.resolve_blob(&handle), Some(content.clone()));

        let info = store.blob_info(&handle).expect("info");
        assert_eq!(info.size, content.len() as u64);
        assert_eq!(info.name, "result.pdf");
        assert_eq!(info.sha256.len(), 64);
    }

    #[test]
    fn unknown_or_malformed_handles_resolve_to_none() {
        let store = Store::in_memory().expect("store");
        assert_eq!(store.resolve_blob("file://does-not-exist"), None);
        assert_eq!(store.resolve_blob("file://"), None);
        assert_eq!(store.resolve_blob("not-a-handle"), None);
        assert_eq!(store.resolve_url("file://does-not-exist"), None);
    }

    #[test]
    fn plain_urls_pass_through() {
        let store = Store::in_memory().expect("store");
        assert_eq!(
            store.resolve_url("https://example.edu/r.pdf").as_deref(),
            Some("https://example.edu/r.pdf")
        );
    }

    #[test]
    fn handles_resolve_to_data_urls() {
        let mut store = Store::in_memory().expect("store");
        let handle = store
            .store_blob(b"hi", "a.txt", "text/plain")
            .expect("store");
        assert_eq!(
            store.resolve_url(&handle).as_deref(),
            Some("data:text/plain;base64,aGk=")
        );
    }

    #[test]
    fn upload_policy_rejects_before_storing() {
        let mut store = Store::in_memory().expect("store");
        let policy = UploadPolicy {
            max_bytes: 4,
            accept: vec!["application/pdf".to_string()],
        };
        let too_big = store.upload_blob(b"12345", "a.pdf", "application/pdf", &policy);
        assert!(too_big.is_err());
        let wrong_type = store.upload_blob(b"12", "a.png", "image/png", &policy);
        assert!(matches!(
            wrong_type.expect_err("type").downcast_ref::<PortalError>(),
            Some(PortalError::Validation(_))
        ));
        assert_eq!(store.read_raw(keys::FILES).as_deref(), Some("{}"));
    }

    #[test]
    fn wildcard_accept_matches_top_level_type() {
        let policy = UploadPolicy {
            max_bytes: 10,
            accept: vec!["image/*".to_string()],
        };
        assert!(policy.check(1, "image/png").is_ok());
        assert!(policy.check(1, "application/pdf").is_err());
    }

    #[test]
    fn delete_blob_reports_presence() {
        let mut store = Store::in_memory().expect("store");
        let handle = store.store_blob(b"x", "x.pdf", "application/pdf").expect("store");
        assert!(store.delete_blob(&handle).expect("delete"));
        assert!(!store.delete_blob(&handle).expect("delete again"));
        assert_eq!(store.resolve_blob(&handle), None);
    }
}
