use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("field is read-only: {0}")]
    ProtectedField(String),

    #[error("cannot coerce value for {field}: {reason}")]
    Coercion { field: String, reason: String },

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl CoreError {
    pub(crate) fn coercion(field: &str, reason: impl Into<String>) -> Self {
        Self::Coercion {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
