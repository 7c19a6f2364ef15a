//! Opaque encoding of QR check-in tokens.
//!
//! Wire layout, base64url without padding:
//!
//! ```text
//! | session_id i64 | issuer_id i64 | issued_at i64 | nonce [u8; 16] | HMAC-SHA256 [u8; 32] |
//! ```
//!
//! Integers are fixed-width big-endian, so each payload has exactly one
//! byte representation and the MAC covers those bytes. Decoding never
//! touches the key; verification is the separate [`verify`] step.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bincode::config::{self, Config};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result, TokenError};
use crate::models::token::TokenPayload;

type HmacSha256 = Hmac<Sha256>;

/// Length of the canonical payload encoding in bytes.
pub const PAYLOAD_LEN: usize = 40;
/// Length of the HMAC-SHA256 tag in bytes.
pub const SIGNATURE_LEN: usize = 32;
/// Longest string accepted by [`decode`] before any work is done.
pub const MAX_TOKEN_CHARS: usize = 512;

/// A structurally valid token whose signature has not been checked yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    pub payload: TokenPayload,
    pub signature: [u8; SIGNATURE_LEN],
}

fn canonical_config() -> impl Config {
    config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

fn canonical_bytes(payload: &TokenPayload) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(payload, canonical_config())
        .map_err(|e| AppError::Internal(format!("Token payload encoding failed: {}", e)))
}

fn sign(payload_bytes: &[u8], key: &[u8]) -> Result<[u8; SIGNATURE_LEN]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| AppError::Internal("QR secret key length invalid".to_string()))?;
    mac.update(payload_bytes);
    let tag = mac.finalize().into_bytes();
    let mut signature = [0u8; SIGNATURE_LEN];
    signature.copy_from_slice(&tag);
    Ok(signature)
}

/// Signs `payload` with `key` and returns the opaque transport string.
pub fn encode(payload: &TokenPayload, key: &[u8]) -> Result<String> {
    let mut bytes = canonical_bytes(payload)?;
    let signature = sign(&bytes, key)?;
    bytes.extend_from_slice(&signature);
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Parses an opaque token into payload and signature.
///
/// Any structural problem is [`TokenError::Malformed`].
pub fn decode(token: &str) -> std::result::Result<DecodedToken, TokenError> {
    if token.is_empty() || token.len() > MAX_TOKEN_CHARS {
        return Err(TokenError::Malformed);
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|_| TokenError::Malformed)?;

    if bytes.len() != PAYLOAD_LEN + SIGNATURE_LEN {
        return Err(TokenError::Malformed);
    }

    let (payload_bytes, signature_bytes) = bytes.split_at(PAYLOAD_LEN);

    let (payload, read): (TokenPayload, usize) =
        bincode::serde::decode_from_slice(payload_bytes, canonical_config())
            .map_err(|_| TokenError::Malformed)?;

    if read != PAYLOAD_LEN {
        return Err(TokenError::Malformed);
    }

    let signature: [u8; SIGNATURE_LEN] = signature_bytes
        .try_into()
        .map_err(|_| TokenError::Malformed)?;

    Ok(DecodedToken { payload, signature })
}

/// Recomputes the MAC over `decoded.payload` and compares it to the
/// presented signature in constant time.
pub fn verify(decoded: &DecodedToken, key: &[u8]) -> Result<bool> {
    let expected = sign(&canonical_bytes(&decoded.payload)?, key)?;
    Ok(expected[..].ct_eq(&decoded.signature[..]).into())
}
