//! Conversion from `redb`'s errors -> [`DbError`].
//!
//! HACK: `redb`'s errors are `#[non_exhaustive]`, so each match ends in `_ =>`.

use crate::DbError;

impl From<redb::StorageError> for DbError {
    fn from(error: redb::StorageError) -> Self {
        use redb::StorageError as E;

        match error {
            E::Io(e) => Self::Io(e),
            E::Corrupted(s) => Self::Corrupt(s),
            // HACK: Handle new errors as `redb` adds them.
            _ => Self::Backend(Box::new(error)),
        }
    }
}

impl From<redb::DatabaseError> for DbError {
    /// Created by `redb` in:
    /// - [`redb::Builder::create_file`]
    /// - [`redb::Database::check_integrity`]
    fn from(error: redb::DatabaseError) -> Self {
        use redb::DatabaseError as E;

        match error {
            E::Storage(error) => error.into(),
            E::RepairAborted => Self::Corrupt("repair aborted".to_owned()),
            // HACK: Handle new errors as `redb` adds them.
            _ => Self::Backend(Box::new(error)),
        }
    }
}

impl From<redb::TransactionError> for DbError {
    /// Created by `redb` in:
    /// - [`redb::Database::begin_write`]
    /// - [`redb::Database::begin_read`]
    fn from(error: redb::TransactionError) -> Self {
        match error {
            redb::TransactionError::Storage(error) => error.into(),
            // HACK: Handle new errors as `redb` adds them.
            _ => Self::Backend(Box::new(error)),
        }
    }
}

impl From<redb::TableError> for DbError {
    /// Created by `redb` in:
    /// - [`redb::WriteTransaction::open_table`]
    /// - [`redb::ReadTransaction::open_table`]
    fn from(error: redb::TableError) -> Self {
        match error {
            redb::TableError::Storage(error) => error.into(),
            // HACK: Handle new errors as `redb` adds them.
            _ => Self::Backend(Box::new(error)),
        }
    }
}

impl From<redb::CommitError> for DbError {
    /// Created by `redb` in:
    /// - [`redb::WriteTransaction::commit`]
    fn from(error: redb::CommitError) -> Self {
        match error {
            redb::CommitError::Storage(error) => error.into(),
            // HACK: Handle new errors as `redb` adds them.
            _ => Self::Backend(Box::new(error)),
        }
    }
}
