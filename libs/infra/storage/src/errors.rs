use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("put object failed: {0}")]
    Put(String),

    #[error("get object failed: {0}")]
    Get(String),

    #[error("delete object failed: {0}")]
    Delete(String),

    #[error("presigned url generation failed: {0}")]
    Presign(String),
}
