use breeze_domain_webhook::SsrfViolation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("database error: {0}")]
    Db(#[from] breeze_infra_db::DbError),

    #[error("cache error: {0}")]
    Cache(#[from] breeze_infra_cache::CacheError),

    #[error("ssrf guard rejected delivery: {0}")]
    Ssrf(#[from] SsrfViolation),

    #[error("dns resolution failed for {host}: {source}")]
    Dns { host: String, source: std::io::Error },

    #[error("host {0} resolved to no addresses")]
    NoAddress(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url could not be parsed: {0}")]
    InvalidUrl(String),
}
