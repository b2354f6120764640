//! Unverified decoding of compact JSON Web Tokens
//!
//! This decodes the payload segment of a JWT purely to extract the `exp` and
//! `iat` claims for local expiry bookkeeping. No signature or audience
//! verification is performed; nothing here may ever be treated as an
//! authentication check.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::clock::UnixTime;

/// An error while decoding the payload segment of a compact JWT
#[derive(Debug, Error)]
pub enum MalformedTokenError {
    /// The token does not have a payload segment
    #[error("token does not have a payload segment")]
    MissingPayload,
    /// The payload segment is not valid base64
    #[error("token payload is not valid base64")]
    InvalidBase64(#[from] base64::DecodeError),
    /// The decoded payload is not a JSON object
    #[error("token payload is not a JSON object")]
    InvalidJson(#[from] serde_json::Error),
}

/// Decodes the payload segment of a compact JWT, without verification
///
/// Splits the token on `.`, base64url-decodes the second segment after
/// restoring any stripped padding, and parses the result as a JSON object.
pub fn decode(token: &str) -> Result<Map<String, Value>, MalformedTokenError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or(MalformedTokenError::MissingPayload)?;

    let mut padded = payload.to_owned();
    for _ in 0..((4 - payload.len() % 4) % 4) {
        padded.push('=');
    }

    let bytes = URL_SAFE.decode(padded)?;
    let claims = serde_json::from_slice(&bytes)?;
    Ok(claims)
}

/// The expiry-related claims of a decoded token payload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExpiryClaims {
    /// The `exp` claim, when present and numeric
    pub exp: Option<UnixTime>,
    /// The `iat` claim, when present and numeric
    pub iat: Option<UnixTime>,
}

/// Extracts the `exp` and `iat` claims from a compact JWT
///
/// Claims that are absent or non-numeric are reported as `None`.
pub fn expiry_claims(token: &str) -> Result<ExpiryClaims, MalformedTokenError> {
    let claims = decode(token)?;
    let claim = |name: &str| claims.get(name).and_then(Value::as_u64).map(UnixTime);
    Ok(ExpiryClaims {
        exp: claim("exp"),
        iat: claim("iat"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn token_with_payload(payload: &str) -> String {
        format!("header.{}.signature", URL_SAFE_NO_PAD.encode(payload))
    }

    #[test]
    fn decodes_unpadded_payload() {
        let token = token_with_payload(r#"{"exp": 1700000000, "iat": 1699999700}"#);
        let claims = decode(&token).unwrap();
        assert_eq!(claims["exp"].as_u64(), Some(1700000000));
        assert_eq!(claims["iat"].as_u64(), Some(1699999700));
    }

    #[test]
    fn extracts_expiry_claims() {
        let token = token_with_payload(r#"{"exp": 1700000000, "iat": 1699999700}"#);
        let claims = expiry_claims(&token).unwrap();
        assert_eq!(claims.exp, Some(UnixTime(1700000000)));
        assert_eq!(claims.iat, Some(UnixTime(1699999700)));
    }

    #[test]
    fn tolerates_missing_claims() {
        let token = token_with_payload(r#"{"sub": "someone"}"#);
        let claims = expiry_claims(&token).unwrap();
        assert_eq!(claims, ExpiryClaims::default());
    }

    #[test]
    fn rejects_token_without_payload_segment() {
        let err = decode("justonesegment").unwrap_err();
        assert!(matches!(err, MalformedTokenError::MissingPayload));
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = decode("header.!!!.signature").unwrap_err();
        assert!(matches!(err, MalformedTokenError::InvalidBase64(_)));
    }

    #[test]
    fn rejects_non_json_payload() {
        let token = format!("header.{}.signature", URL_SAFE_NO_PAD.encode("not json"));
        let err = decode(&token).unwrap_err();
        assert!(matches!(err, MalformedTokenError::InvalidJson(_)));
    }

    #[test]
    fn rejects_non_object_payload() {
        let token = format!("header.{}.signature", URL_SAFE_NO_PAD.encode("42"));
        let err = decode(&token).unwrap_err();
        assert!(matches!(err, MalformedTokenError::InvalidJson(_)));
    }
}
