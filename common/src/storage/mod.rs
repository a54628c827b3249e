// Destination blob stores

pub mod blob;
pub mod memory;
pub mod minio;

pub use blob::{BlobStore, DestinationProvider};
pub use memory::{MemoryBlobStore, MemoryDestinations};
pub use minio::{MinioClient, MinioDestinations};
