use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: u64,
    pub file_path: String,
    /// Older records only carry `filePath`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub file_title: String,
    pub file_type: String,
    pub file_size: u64,
    pub file_created_at: DateTime<Utc>,
    pub file_updated_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Name of the backing file in the image directory: `fileName`, or the
    /// trailing segment of `filePath` for records that never stored one.
    pub fn backing_file_name(&self) -> &str {
        match self.file_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => self
                .file_path
                .rsplit('/')
                .next()
                .unwrap_or(&self.file_path),
        }
    }
}

/// An upload whose bytes have already been written to the image directory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub storage_name: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
}

/// An upload as received from the client, before validation and staging.
#[derive(Debug, Clone)]
pub struct IncomingImage {
    pub original_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub deleted_count: usize,
    pub deleted_images: Vec<ImageRecord>,
    /// Requested ids exactly as sent, including ones that are not integers.
    pub not_found_ids: Vec<serde_json::Value>,
}
