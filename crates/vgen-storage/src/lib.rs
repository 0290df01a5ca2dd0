//! S3-compatible object storage.
//!
//! Used to make locally held images reachable by the generation provider:
//! bytes go up, a public URL comes back.

pub mod client;
pub mod error;
pub mod store;

pub use client::{ObjectStoreConfig, S3ObjectStore};
pub use error::{StorageError, StorageResult};
pub use store::{image_object_key, ObjectStore, IMAGE_PREFIX};
