use super::{
    DeleteOutcome, ImageRecord, IncomingImage, LibraryError, UploadedFile,
    storage::{DynImageDirectory, LocalImageDirectory},
    store::MetadataStore,
};
use crate::StorageConfig;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

pub const INVALID_IDS_MESSAGE: &str = "Please provide an array of image IDs";

pub struct ImageLibrary {
    config: StorageConfig,
    store: MetadataStore,
    images: DynImageDirectory,
}

pub type SharedLibrary = Arc<ImageLibrary>;

impl ImageLibrary {
    pub fn new(config: StorageConfig) -> Self {
        let images = Arc::new(LocalImageDirectory::new(config.image_directory.clone()));
        Self::with_image_directory(config, images)
    }

    pub fn with_image_directory(config: StorageConfig, images: DynImageDirectory) -> Self {
        Self {
            store: MetadataStore::new(config.data_file.clone()),
            config,
            images,
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn images(&self) -> &DynImageDirectory {
        &self.images
    }

    /// All records in insertion order. Records that predate fully-qualified
    /// locators get one built from `origin`; the store is left untouched.
    pub async fn list(&self, origin: &str) -> Result<Vec<ImageRecord>, LibraryError> {
        let records = self.store.load_all().await?;
        Ok(records
            .into_iter()
            .map(|record| self.present(record, origin))
            .collect())
    }

    fn present(&self, mut record: ImageRecord, origin: &str) -> ImageRecord {
        if !is_qualified_locator(&record.file_path) {
            let locator =
                public_locator(origin, &self.config.public_path, record.backing_file_name());
            record.file_path = locator;
        }
        record
    }

    pub fn validate_upload(&self, mime_type: &str, size: u64) -> Result<(), LibraryError> {
        let allowed = self
            .config
            .allowed_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type));
        if !allowed {
            return Err(LibraryError::UnsupportedType(mime_type.to_string()));
        }

        if size > self.config.max_upload_bytes {
            return Err(LibraryError::FileTooLarge {
                size,
                limit: self.config.max_upload_bytes,
            });
        }

        Ok(())
    }

    /// Validates an incoming upload, stages its bytes under a generated
    /// name and records it. The staged file is removed again if the record
    /// cannot be written.
    pub async fn ingest(
        &self,
        incoming: Option<IncomingImage>,
        title: Option<&str>,
        origin: &str,
    ) -> Result<ImageRecord, LibraryError> {
        let incoming = incoming.ok_or(LibraryError::MissingFile)?;
        let size = incoming.bytes.len() as u64;
        self.validate_upload(&incoming.mime_type, size)?;

        let storage_name = storage_name_for(&incoming.mime_type, &incoming.original_name);
        self.images.write(&storage_name, &incoming.bytes).await?;

        let upload = UploadedFile {
            storage_name: storage_name.clone(),
            original_name: incoming.original_name,
            mime_type: incoming.mime_type,
            size,
        };

        match self.create(Some(upload), title, origin).await {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!("Failed to record upload {}: {}", storage_name, e);
                if let Err(cleanup) = self.images.delete_if_exists(&storage_name).await {
                    error!("Failed to remove staged upload {}: {}", storage_name, cleanup);
                }
                Err(e)
            }
        }
    }

    /// Records an upload whose bytes are already in the image directory.
    pub async fn create(
        &self,
        upload: Option<UploadedFile>,
        title: Option<&str>,
        origin: &str,
    ) -> Result<ImageRecord, LibraryError> {
        let upload = upload.ok_or(LibraryError::MissingFile)?;

        let mut session = self.store.begin_write().await?;
        let now = Utc::now();

        let file_title = match title {
            Some(title) if !title.trim().is_empty() => title.to_string(),
            _ => upload.original_name,
        };

        let record = ImageRecord {
            id: session.catalog.next_id()?,
            file_path: public_locator(origin, &self.config.public_path, &upload.storage_name),
            file_name: Some(upload.storage_name),
            file_title,
            file_type: upload.mime_type,
            file_size: upload.size,
            file_created_at: now,
            file_updated_at: now,
        };

        session.catalog.insert(record.clone());
        session.commit().await?;

        info!(
            "Stored image {} '{}' ({} bytes)",
            record.id, record.file_title, record.file_size
        );
        Ok(record)
    }

    /// Removes the given records and their backing files, in request order.
    /// Ids without a record, including repeats of an id already removed in
    /// this call and values that are not ids at all, are reported back in
    /// `not_found_ids` as given.
    pub async fn delete(&self, ids: &[Value]) -> Result<DeleteOutcome, LibraryError> {
        if ids.is_empty() {
            return Err(LibraryError::InvalidRequest(INVALID_IDS_MESSAGE.to_string()));
        }

        let mut session = self.store.begin_write().await?;
        let mut deleted_images = Vec::new();
        let mut not_found_ids = Vec::new();

        for requested in ids {
            let Some((id, record)) =
                record_id(requested).and_then(|id| session.catalog.get(id).map(|r| (id, r)))
            else {
                not_found_ids.push(requested.clone());
                continue;
            };

            let file_name = record.backing_file_name().to_string();
            if self.images.exists(&file_name).await? {
                self.images.delete_if_exists(&file_name).await?;
            } else {
                debug!("Backing file {} for image {} already absent", file_name, id);
            }

            if let Some(record) = session.catalog.remove(id) {
                deleted_images.push(record);
            }
        }

        session.commit().await?;

        info!(
            "Deleted {} images, {} ids not found",
            deleted_images.len(),
            not_found_ids.len()
        );

        Ok(DeleteOutcome {
            deleted_count: deleted_images.len(),
            deleted_images,
            not_found_ids,
        })
    }
}

/// Extracts `ids` from a delete request body. It must be a non-empty array;
/// its elements are matched against record ids later.
pub fn parse_delete_ids(body: &Value) -> Result<Vec<Value>, LibraryError> {
    match body.get("ids").and_then(Value::as_array) {
        Some(ids) if !ids.is_empty() => Ok(ids.clone()),
        _ => Err(LibraryError::InvalidRequest(INVALID_IDS_MESSAGE.to_string())),
    }
}

/// The record id a requested value names. Only JSON numbers with an exact
/// non-negative integer value can name a record; `"1"` does not.
pub fn record_id(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|n| *n >= 0.0 && n.fract() == 0.0 && *n <= u64::MAX as f64)
            .map(|n| n as u64)
    })
}

pub fn public_locator(origin: &str, public_path: &str, file_name: &str) -> String {
    let origin = origin.trim_end_matches('/');
    let prefix = public_path.trim_matches('/');
    let file_name = urlencoding::encode(file_name);

    if prefix.is_empty() {
        format!("{}/{}", origin, file_name)
    } else {
        format!("{}/{}/{}", origin, prefix, file_name)
    }
}

pub fn is_qualified_locator(path: &str) -> bool {
    Url::parse(path)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// `<unix millis>-<uuid>.<ext>`; the client's file name never reaches disk.
pub fn storage_name_for(mime_type: &str, original_name: &str) -> String {
    let extension = match mime_type.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg".to_string(),
        "image/png" => "png".to_string(),
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|extensions| extensions.first())
            .map(|ext| ext.to_string())
            .or_else(|| {
                std::path::Path::new(original_name)
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
                    .map(|ext| ext.to_ascii_lowercase())
            })
            .unwrap_or_else(|| "bin".to_string()),
    };

    format!(
        "{}-{}.{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        extension
    )
}
