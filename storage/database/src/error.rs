//! Database error types.

//---------------------------------------------------------------------------------------------------- Types
/// Alias for a `Result` with a [`DbError`].
pub type DbResult<T> = Result<T, DbError>;

//---------------------------------------------------------------------------------------------------- DbError
/// Errors that can occur opening or using a [`KeyValueStore`](crate::KeyValueStore).
#[derive(thiserror::Error, Debug)]
pub enum DbError {
    /// I/O error.
    #[error("database I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The database file is corrupt and could not be repaired.
    #[error("database is corrupt: {0}")]
    Corrupt(String),

    /// A value could not be decoded into the requested type.
    #[error("value for key {key} could not be decoded")]
    Decode { key: String },

    /// Any other error from the backend.
    #[error("database backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync + 'static>),
}
