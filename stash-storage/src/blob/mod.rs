//! Blob store implementations.

pub mod lmdb;
pub mod memory;

pub use lmdb::LmdbBlobStore;
pub use memory::InMemoryBlobStore;
