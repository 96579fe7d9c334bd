use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("No file uploaded")]
    MissingFile,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("File of {size} bytes exceeds the {limit} byte upload limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Metadata store is corrupt: {0}")]
    CorruptStore(#[from] serde_json::Error),

    #[error("Storage IO error: {0}")]
    StorageIo(#[from] std::io::Error),
}

impl LibraryError {
    /// Errors caused by the request itself rather than by the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LibraryError::MissingFile
                | LibraryError::InvalidRequest(_)
                | LibraryError::UnsupportedType(_)
                | LibraryError::FileTooLarge { .. }
        )
    }
}
