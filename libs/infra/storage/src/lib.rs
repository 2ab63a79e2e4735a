pub mod client;
pub mod errors;
pub mod key;

pub use client::StorageClient;
pub use errors::StorageError;
pub use key::{object_key, org_id_from_key, BlobKind};
