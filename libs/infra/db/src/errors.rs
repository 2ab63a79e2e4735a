use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("database configuration invalid: {0}")]
    Configuration(String),

    #[error("query failed: {0}")]
    Query(#[from] libsql::Error),

    #[error("row mapping failed: {0}")]
    Mapping(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<DbError> for breeze_domain_models::error::ApiError {
    fn from(err: DbError) -> Self {
        use breeze_domain_models::error::ApiError;
        match err {
            DbError::NotFound => ApiError::not_found("resource"),
            DbError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::TransientStoreFailure(other.to_string()),
        }
    }
}
