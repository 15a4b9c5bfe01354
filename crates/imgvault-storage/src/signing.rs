//! Signed read tokens for the local backend.
//!
//! Token = base64url(expiry_ts (u64 BE) || HMAC-SHA256(secret, expiry_ts || key)).
//! The key is bound by the MAC but not carried in the token; it comes from the URL path.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

const EXPIRY_LEN: usize = 8;
const MAC_LEN: usize = 32; // SHA256
const TOKEN_LEN: usize = EXPIRY_LEN + MAC_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    Expired,
}

fn mac_for(secret: &[u8], expiry: &[u8], key: &str) -> Hmac<Sha256> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts any key size");
    mac.update(expiry);
    mac.update(key.as_bytes());
    mac
}

/// Build a token granting read access to `key` until `expires_at` (unix seconds).
pub fn sign(key: &str, expires_at: u64, secret: &[u8]) -> String {
    let expiry = expires_at.to_be_bytes();
    let tag = mac_for(secret, &expiry, key).finalize().into_bytes();

    let mut token = [0u8; TOKEN_LEN];
    token[..EXPIRY_LEN].copy_from_slice(&expiry);
    token[EXPIRY_LEN..].copy_from_slice(&tag);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(token)
}

/// Check a token for `key` at time `now` (unix seconds). Returns the expiry.
pub fn verify(token: &str, key: &str, now: u64, secret: &[u8]) -> Result<u64, TokenError> {
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| TokenError::Malformed)?;
    if decoded.len() != TOKEN_LEN {
        return Err(TokenError::Malformed);
    }
    let (expiry, tag) = decoded.split_at(EXPIRY_LEN);
    mac_for(secret, expiry, key)
        .verify_slice(tag)
        .map_err(|_| TokenError::BadSignature)?;

    let mut expiry_bytes = [0u8; EXPIRY_LEN];
    expiry_bytes.copy_from_slice(expiry);
    let expires_at = u64::from_be_bytes(expiry_bytes);
    if now > expires_at {
        return Err(TokenError::Expired);
    }
    Ok(expires_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn valid_token_until_expiry() {
        let token = sign("generated_images/42.webp", 1_000, SECRET);
        assert_eq!(verify(&token, "generated_images/42.webp", 999, SECRET), Ok(1_000));
        assert_eq!(verify(&token, "generated_images/42.webp", 1_000, SECRET), Ok(1_000));
        assert_eq!(
            verify(&token, "generated_images/42.webp", 1_001, SECRET),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn token_is_bound_to_key_and_secret() {
        let token = sign("generated_images/42.webp", 1_000, SECRET);
        assert_eq!(
            verify(&token, "generated_images/43.webp", 0, SECRET),
            Err(TokenError::BadSignature)
        );
        assert_eq!(
            verify(&token, "generated_images/42.webp", 0, b"another-secret"),
            Err(TokenError::BadSignature)
        );
        assert_eq!(
            verify("not-a-token", "generated_images/42.webp", 0, SECRET),
            Err(TokenError::Malformed)
        );
    }
}
