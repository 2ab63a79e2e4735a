use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis connection failed: {0}")]
    Connection(String),

    #[error("redis command failed: {0}")]
    Command(#[from] redis::RedisError),
}
