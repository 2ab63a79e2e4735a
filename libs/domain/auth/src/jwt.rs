//! Access-token signing and verification. HS256 against a single server
//! secret — Breeze has no need for asymmetric keys since the control plane
//! both mints and verifies every token itself.

use breeze_domain_models::identity::TokenClaims;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JwtError {
    #[error("token is malformed or signature is invalid")]
    Invalid,
    #[error("token has expired")]
    Expired,
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::Invalid,
        }
    }
}

pub fn sign(claims: &TokenClaims, secret: &str) -> Result<String, JwtError> {
    let token = encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

/// Verifies the signature and `exp`; does not consult the revocation cache
/// or recompute `accessibleOrgIds` — that is the caller's job, since both
/// require a live store lookup this crate deliberately has no access to.
pub fn verify(token: &str, secret: &str) -> Result<TokenClaims, JwtError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<TokenClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use breeze_domain_models::tenancy::Scope;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_claims(exp: i64) -> TokenClaims {
        TokenClaims {
            sub: Uuid::new_v4(),
            sid: Uuid::new_v4(),
            scope: Scope::Organization,
            role_id: Uuid::new_v4(),
            partner_id: None,
            org_id: Some(Uuid::new_v4()),
            exp,
        }
    }

    #[test]
    fn sign_then_verify_roundtrips() {
        let claims = sample_claims((Utc::now() + chrono::Duration::hours(1)).timestamp());
        let token = sign(&claims, "test-secret").unwrap();
        let verified = verify(&token, "test-secret").unwrap();
        assert_eq!(verified.sub, claims.sub);
        assert_eq!(verified.sid, claims.sid);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let claims = sample_claims((Utc::now() + chrono::Duration::hours(1)).timestamp());
        let token = sign(&claims, "test-secret").unwrap();
        assert!(matches!(verify(&token, "wrong-secret"), Err(JwtError::Invalid)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = sample_claims((Utc::now() - chrono::Duration::hours(1)).timestamp());
        let token = sign(&claims, "test-secret").unwrap();
        assert!(matches!(verify(&token, "test-secret"), Err(JwtError::Expired)));
    }
}
