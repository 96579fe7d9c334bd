use super::{ImageRecord, LibraryError};
use serde::Serialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Id-indexed view over the stored records. Keeps insertion order so the
/// store file is rewritten in the order it was read.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    records: Vec<ImageRecord>,
    index: HashMap<u64, usize>,
}

impl Catalog {
    pub fn from_records(records: Vec<ImageRecord>) -> Self {
        let mut catalog = Self {
            records,
            index: HashMap::new(),
        };
        catalog.reindex();
        catalog
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (position, record) in self.records.iter().enumerate() {
            // First occurrence wins if a hand-edited file repeats an id
            self.index.entry(record.id).or_insert(position);
        }
    }

    /// One past the highest stored id, or 1 for an empty catalog.
    pub fn next_id(&self) -> Result<u64, LibraryError> {
        match self.records.iter().map(|r| r.id).max() {
            None => Ok(1),
            Some(max) => max.checked_add(1).ok_or_else(|| {
                LibraryError::CorruptStore(serde::de::Error::custom(format!(
                    "image id {} leaves no room for another id",
                    max
                )))
            }),
        }
    }

    pub fn get(&self, id: u64) -> Option<&ImageRecord> {
        self.index.get(&id).map(|&position| &self.records[position])
    }

    /// Appends a record, replacing in place any record with the same id.
    pub fn insert(&mut self, record: ImageRecord) {
        match self.index.get(&record.id) {
            Some(&position) => self.records[position] = record,
            None => {
                self.index.insert(record.id, self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn remove(&mut self, id: u64) -> Option<ImageRecord> {
        let position = self.index.remove(&id)?;
        let record = self.records.remove(position);
        self.reindex();
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ImageRecord> {
        self.records
    }
}

/// The JSON file holding every image record.
///
/// Nothing is cached between calls: every operation reads the whole file,
/// and every mutation rewrites it. Writers within this process go through
/// [`MetadataStore::begin_write`], which holds a single async mutex for the
/// duration of the read-modify-write. The file is replaced by renaming a
/// freshly written sibling, so readers never observe a half-written store.
pub struct MetadataStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load_all(&self) -> Result<Vec<ImageRecord>, LibraryError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Metadata store {:?} not found, treating as empty", self.path);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        let records: Vec<ImageRecord> = serde_json::from_str(&contents)?;
        debug!("Loaded {} image records from {:?}", records.len(), self.path);
        Ok(records)
    }

    pub async fn save_all(&self, records: &[ImageRecord]) -> Result<(), LibraryError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serialize_records(records)?;
        let staging = self.staging_path();
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &self.path).await?;

        debug!("Saved {} image records to {:?}", records.len(), self.path);
        Ok(())
    }

    /// Takes the writer lock and loads the current records.
    pub async fn begin_write(&self) -> Result<WriteSession<'_>, LibraryError> {
        let guard = self.write_lock.lock().await;
        let catalog = Catalog::from_records(self.load_all().await?);
        Ok(WriteSession {
            _guard: guard,
            store: self,
            catalog,
        })
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "store".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// A read-modify-write cycle on the store. Changes to `catalog` reach the
/// file only through [`WriteSession::commit`]; dropping the session
/// discards them and releases the lock.
pub struct WriteSession<'a> {
    _guard: MutexGuard<'a, ()>,
    store: &'a MetadataStore,
    pub catalog: Catalog,
}

impl WriteSession<'_> {
    pub async fn commit(self) -> Result<(), LibraryError> {
        self.store.save_all(self.catalog.records()).await?;
        info!(
            "Metadata store {:?} now holds {} records",
            self.store.path,
            self.catalog.len()
        );
        Ok(())
    }
}

/// Pretty-printed with a four space indent, matching files written by
/// earlier versions of the service.
fn serialize_records(records: &[ImageRecord]) -> Result<Vec<u8>, LibraryError> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    records
        .serialize(&mut serializer)
        .map_err(std::io::Error::other)?;
    Ok(buffer)
}
