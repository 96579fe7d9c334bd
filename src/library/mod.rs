// Image library - metadata store, backing files and the operations on both
mod core;
mod error;
pub mod storage;
pub mod store;
mod types;

pub use self::core::{
    INVALID_IDS_MESSAGE, ImageLibrary, SharedLibrary, is_qualified_locator, parse_delete_ids,
    public_locator, record_id, storage_name_for,
};
pub use error::LibraryError;
pub use storage::{DynImageDirectory, ImageDirectory, LocalImageDirectory};
pub use store::{Catalog, MetadataStore, WriteSession};
pub use types::*;
