use devcat_core::{CoreError, DeviceId, EntryId};
use devcat_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("override entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("window of {requested} days exceeds the maximum of {max}")]
    WindowTooLarge { requested: u32, max: u32 },

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Map a registry rejection onto the submission error kinds, keeping the
    /// field name so callers can point at the offending input.
    pub(crate) fn from_submission(field: &str, err: CoreError) -> Self {
        match err {
            CoreError::UnknownField(_) => Self::InvalidField {
                field: field.to_string(),
                reason: "unknown field".to_string(),
            },
            CoreError::ProtectedField(_) => Self::InvalidField {
                field: field.to_string(),
                reason: "field is read-only".to_string(),
            },
            CoreError::Coercion { field, reason } => Self::InvalidValue { field, reason },
            other => Self::Core(other),
        }
    }
}
