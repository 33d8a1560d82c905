use std::path::Path;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::directory::DirectoryError;

/// Claims carried by access tokens issued by the account service.
/// Only verification happens here; issuance lives with the account service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Resolve the HS256 secret shared with the account service.
/// An explicit configured secret wins; otherwise `data_dir/jwt_secret` is used,
/// generated as 256 random bits on first boot so the issuer can share the file.
pub fn load_jwt_secret(
    configured: Option<&str>,
    data_dir: &str,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if let Some(secret) = configured.filter(|s| !s.is_empty()) {
        tracing::info!("JWT secret loaded from configuration");
        return Ok(secret.as_bytes().to_vec());
    }

    let key_path = Path::new(data_dir).join("jwt_secret");
    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if !key.is_empty() {
            tracing::info!("JWT secret loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT secret file {} is empty, regenerating", key_path.display());
    }

    std::fs::create_dir_all(data_dir)?;
    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::warn!(
        "JWT secret generated at {}; tokens must be signed with this key",
        key_path.display()
    );
    Ok(key.to_vec())
}

/// Validate an access token and return its claims.
pub fn validate_access_token(secret: &[u8], token: &str) -> Result<Claims, DirectoryError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => DirectoryError::TokenExpired,
            _ => DirectoryError::InvalidToken,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(secret: &[u8], user_id: &str, exp_offset: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            user_id: user_id.to_string(),
            iat: now,
            exp: now + exp_offset,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn valid_token_round_trips_user_id() {
        let token = token_for(b"secret", "user-1", 900);
        let claims = validate_access_token(b"secret", &token).unwrap();
        assert_eq!(claims.user_id, "user-1");
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = token_for(b"secret", "user-1", 900);
        assert_eq!(
            validate_access_token(b"other", &token).unwrap_err(),
            DirectoryError::InvalidToken
        );
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        // Past the default 60s leeway
        let token = token_for(b"secret", "user-1", -3600);
        assert_eq!(
            validate_access_token(b"secret", &token).unwrap_err(),
            DirectoryError::TokenExpired
        );
    }

    #[test]
    fn garbage_is_invalid() {
        assert_eq!(
            validate_access_token(b"secret", "not-a-jwt").unwrap_err(),
            DirectoryError::InvalidToken
        );
    }

    #[test]
    fn secret_prefers_configured_value() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        assert_eq!(load_jwt_secret(Some("abc"), data_dir).unwrap(), b"abc".to_vec());

        std::fs::write(dir.path().join("jwt_secret"), b"from-file").unwrap();
        assert_eq!(load_jwt_secret(None, data_dir).unwrap(), b"from-file".to_vec());
        assert_eq!(load_jwt_secret(Some(""), data_dir).unwrap(), b"from-file".to_vec());
    }

    #[test]
    fn missing_secret_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        let first = load_jwt_secret(None, data_dir).unwrap();
        assert_eq!(first.len(), 32);
        assert_eq!(load_jwt_secret(None, data_dir).unwrap(), first);
    }
}
