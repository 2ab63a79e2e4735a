//! Environment-sourced configuration, read once at startup and handed to
//! every handler and background service through `AppState`.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_auth_token: Option<String>,
    pub redis_url: String,
    pub storage_bucket: String,
    pub storage_region: String,
    pub storage_endpoint_url: Option<String>,
    pub port: u16,
    /// HS256 signing secret for access and refresh tokens.
    pub jwt_secret: String,
    /// Previous signing secret, tried on verification failure against
    /// `jwt_secret` so a key rotation doesn't invalidate every live token.
    pub jwt_secret_previous: Option<String>,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    /// Derives the AES-256-GCM key that wraps a user's TOTP secret at rest.
    pub mfa_encryption_key: String,
    /// Pepper mixed into enrollment-key hashes.
    pub enrollment_key_pepper: String,
    /// Pepper mixed into MFA recovery-code hashes.
    pub mfa_recovery_code_pepper: String,
    /// Shared secret an enrolling agent must present alongside its
    /// enrollment key; independent of the key-hashing pepper above.
    pub agent_enrollment_secret: String,
    /// Bearer token gating `GET /metrics/scrape`.
    pub metrics_scrape_token: String,
    pub heartbeat_interval: chrono::Duration,
    pub mtls_enforced: bool,
    pub remote_session_idle_timeout: chrono::Duration,
    pub bcrypt_cost: u32,
    pub cors_allowed_origin: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            database_auth_token: std::env::var("TURSO_AUTH_TOKEN").ok(),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            storage_bucket: env_or("STORAGE_BUCKET", "breeze-blobs"),
            storage_region: env_or("STORAGE_REGION", "us-east-1"),
            storage_endpoint_url: std::env::var("S3_ENDPOINT_URL").ok(),
            port: env_u64("PORT", 8080) as u16,
            jwt_secret: std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
            jwt_secret_previous: std::env::var("JWT_SECRET_PREVIOUS").ok(),
            access_token_ttl: chrono::Duration::seconds(env_u64("ACCESS_TOKEN_TTL_SECONDS", 900) as i64),
            refresh_token_ttl: chrono::Duration::seconds(env_u64("REFRESH_TOKEN_TTL_SECONDS", 7 * 24 * 3600) as i64),
            mfa_encryption_key: std::env::var("MFA_ENCRYPTION_KEY").expect("MFA_ENCRYPTION_KEY must be set"),
            enrollment_key_pepper: std::env::var("ENROLLMENT_KEY_PEPPER").expect("ENROLLMENT_KEY_PEPPER must be set"),
            mfa_recovery_code_pepper: std::env::var("MFA_RECOVERY_CODE_PEPPER").expect("MFA_RECOVERY_CODE_PEPPER must be set"),
            agent_enrollment_secret: std::env::var("AGENT_ENROLLMENT_SECRET").expect("AGENT_ENROLLMENT_SECRET must be set"),
            metrics_scrape_token: std::env::var("METRICS_SCRAPE_TOKEN").unwrap_or_default(),
            heartbeat_interval: chrono::Duration::seconds(env_u64("HEARTBEAT_INTERVAL_SECONDS", 60) as i64),
            mtls_enforced: env_or("MTLS_ENFORCED", "false") == "true",
            remote_session_idle_timeout: chrono::Duration::minutes(env_u64("REMOTE_SESSION_IDLE_TIMEOUT_MINUTES", 30) as i64),
            bcrypt_cost: env_u64("BCRYPT_COST", 12) as u32,
            cors_allowed_origin: env_or("CORS_ALLOWED_ORIGIN", "*"),
        }
    }

    pub fn heartbeat_interval_std(&self) -> Duration {
        self.heartbeat_interval.to_std().unwrap_or(Duration::from_secs(60))
    }
}
