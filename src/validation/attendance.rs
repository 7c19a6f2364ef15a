use crate::crypto::token_codec::MAX_TOKEN_CHARS;
use crate::error::{AppError, Result, TokenError};

/// Longest note accepted on a manually marked record.
pub const MAX_NOTES_CHARS: usize = 500;

/// Validates a database id.
pub fn validate_id(field: &str, id: i64) -> Result<()> {
    if id <= 0 {
        return Err(AppError::Validation(format!("{} must be a positive integer", field)));
    }

    Ok(())
}

/// Validates the shape of a scanned QR token before any decoding.
///
/// # Arguments
///
/// * `token` - The token text as scanned.
///
/// # Returns
///
/// A `Result<()>` indicating whether the token is worth decoding. A token
/// that fails here is reported the same way as one that fails to decode.
pub fn validate_token(token: &str) -> Result<()> {
    let well_formed = !token.is_empty()
        && token.len() <= MAX_TOKEN_CHARS
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if !well_formed {
        tracing::debug!("Rejected QR token of {} bytes before decoding", token.len());
        return Err(TokenError::Malformed.into());
    }

    Ok(())
}

/// Validates free-text notes on a record.
pub fn validate_notes(notes: Option<&str>) -> Result<()> {
    if notes.is_some_and(|n| n.chars().count() > MAX_NOTES_CHARS) {
        return Err(AppError::Validation(format!(
            "Notes must be at most {} characters",
            MAX_NOTES_CHARS
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_must_be_positive() {
        assert!(validate_id("session_id", 42).is_ok());
        assert!(validate_id("session_id", 0).is_err());
        assert!(validate_id("session_id", -3).is_err());
    }

    #[test]
    fn tokens_must_use_url_safe_alphabet() {
        assert!(validate_token("AAAA-_zz09").is_ok());

        let too_long = "A".repeat(MAX_TOKEN_CHARS + 1);
        for bad in ["", "abc+/=", "not+base64/", too_long.as_str()] {
            assert!(matches!(
                validate_token(bad),
                Err(AppError::InvalidToken(TokenError::Malformed))
            ));
        }
    }

    #[test]
    fn long_notes_are_rejected() {
        assert!(validate_notes(None).is_ok());
        assert!(validate_notes(Some("late bus")).is_ok());
        assert!(validate_notes(Some(&"x".repeat(MAX_NOTES_CHARS + 1))).is_err());
    }
}
