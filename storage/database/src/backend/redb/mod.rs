//! `redb` backend.

mod env;
mod error;

pub use env::RedbStore;
