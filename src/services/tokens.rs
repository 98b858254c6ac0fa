//! Signed, timestamped tokens for links sent by email.
//!
//! A token is `<payload>.<timestamp>.<signature>`: the payload is JSON in
//! unpadded base64url, the timestamp is Unix seconds at issue time, and the
//! signature is HMAC-SHA256 over `<payload>.<timestamp>`. The MAC key is
//! derived from the server secret and a per-purpose salt, so a token minted
//! for one purpose never verifies for another.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::marker::PhantomData;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

pub const EMAIL_VERIFICATION_SALT: &str = "inkpost.accounts.verify-email";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Malformed, tampered with, or signed with another key or salt.
    #[error("bad token signature")]
    BadSignature,
    /// Signature is valid but the token is older than the allowed age.
    #[error("token expired {age_secs}s after issue")]
    Expired { age_secs: i64 },
}

/// What an email verification link carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationClaims {
    pub user_id: i64,
    pub email: String,
}

pub struct Signer<T> {
    key: [u8; 32],
    _claims: PhantomData<fn() -> T>,
}

impl<T> Clone for Signer<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            _claims: PhantomData,
        }
    }
}

impl<T> Signer<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(secret: &[u8], salt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(b"signer");
        hasher.update(secret);
        Self {
            key: hasher.finalize().into(),
            _claims: PhantomData,
        }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC takes keys of any length; 32 bytes cannot fail
        HmacSha256::new_from_slice(&self.key).expect("HMAC key length")
    }

    pub fn sign(&self, claims: &T, now: DateTime<Utc>) -> serde_json::Result<String> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signed = format!("{}.{}", payload, now.timestamp());
        let mut mac = self.mac();
        mac.update(signed.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", signed, signature))
    }

    /// Checks the signature first, then the age, then decodes the claims.
    pub fn verify(&self, token: &str, max_age: Duration, now: DateTime<Utc>) -> Result<T, TokenError> {
        let (signed, signature) = token.rsplit_once('.').ok_or(TokenError::BadSignature)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::BadSignature)?;
        let mut mac = self.mac();
        mac.update(signed.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let (payload, timestamp) = signed.rsplit_once('.').ok_or(TokenError::BadSignature)?;
        let issued_at: i64 = timestamp.parse().map_err(|_| TokenError::BadSignature)?;
        let age_secs = now.timestamp() - issued_at;
        let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        if age_secs > max_age_secs {
            return Err(TokenError::Expired { age_secs });
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::BadSignature)?;
        serde_json::from_slice(&bytes).map_err(|_| TokenError::BadSignature)
    }
}

pub type VerificationSigner = Signer<VerificationClaims>;

impl VerificationSigner {
    pub fn for_email_verification(secret: &[u8]) -> Self {
        Self::new(secret, EMAIL_VERIFICATION_SALT)
    }
}
