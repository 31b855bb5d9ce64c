use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrellisError {
    /// The caller asked a query object for a capability it does not have,
    /// e.g. referencing a named property on a link that staged none.
    #[error("Query structure error: {0}")]
    Structure(String),
    /// A staging schema or table was used in the wrong activation state.
    /// These are programming errors, not retryable conditions.
    #[error("Staging state error: {0}")]
    State(String),
    #[error("Value type error: {0}")]
    Type(String),
    #[error("Cardinality error: {0}")]
    Cardinality(String),
    /// Errors from the backing store propagate unmodified.
    #[error(transparent)]
    Backing(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, TrellisError>;
