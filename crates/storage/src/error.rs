use devcat_core::EntryId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("override entry {id} failed its checksum; the log row was modified")]
    Corrupt { id: EntryId },

    #[error("core error: {0}")]
    Core(#[from] devcat_core::CoreError),
}
