//! Database backends.

mod memory;
mod redb;

pub use memory::MemoryStore;
pub use redb::RedbStore;

#[cfg(test)]
mod tests;
