//! Storage: blob gateway, record repository and the artifact store built
//! on top of both.

pub mod artifacts;
pub mod blob;
pub mod repository;

pub use artifacts::{ArtifactStore, SweepReport};
pub use blob::{BlobError, BlobStore, FsBlobStore};
pub use repository::{MemoryRepository, Repository, RepositoryError};
