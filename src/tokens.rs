//! Credential records and expiry resolution

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::{DurationSecs, UnixTime};
use crate::jwt;

macro_rules! secret_string {
    ($(#[$meta:meta])* $name:ident, $hidden:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw secret value
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Exposes the underlying secret
            ///
            /// Only for placing the value into a request; never log this.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("***", $hidden, "***"))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(concat!("***", $hidden, "***"))
            }
        }
    };
}

secret_string! {
    /// A short-lived bearer credential presented to protected services
    AccessToken, "ACCESS TOKEN"
}

secret_string! {
    /// A long-lived secret used to obtain new access tokens
    RefreshToken, "REFRESH TOKEN"
}

/// A token response as returned by the authorization server
///
/// Exists only long enough to have an absolute expiry derived for it, after
/// which it is folded into a [`CredentialRecord`] and discarded.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// The new access token, when the grant succeeded
    #[serde(default)]
    pub access_token: Option<AccessToken>,
    /// A new refresh token, when the authority chose to rotate it
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    /// An absolute expiry, in the rare case the server provides one
    #[serde(default)]
    pub expires_at: Option<UnixTime>,
    /// The access token's validity relative to its unstated issue time
    #[serde(default)]
    pub expires_in: Option<DurationSecs>,
    /// The token type, typically `Bearer`
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Derives an absolute expiry for this response
    ///
    /// The first applicable source wins: an `expires_at` already present is
    /// kept unchanged; else the access token's `exp` claim; else
    /// `issued_at + expires_in`, where `issued_at` is the access token's
    /// `iat` claim or, failing that, one second before `now` so that a
    /// freshly issued token is never treated as not yet valid. When a source
    /// applies, the relative `expires_in` is dropped in favor of the
    /// absolute instant.
    ///
    /// A malformed access token is not an error here; it merely disqualifies
    /// the claim-based sources.
    pub fn resolve_expiry(mut self, now: UnixTime) -> Self {
        if self.expires_at.is_some() {
            self.expires_in = None;
            return self;
        }

        let claims = self
            .access_token
            .as_ref()
            .and_then(|t| jwt::expiry_claims(t.as_str()).ok())
            .unwrap_or_default();

        if let Some(exp) = claims.exp {
            self.expires_at = Some(exp);
            self.expires_in = None;
        } else if let Some(expires_in) = self.expires_in {
            let issued_at = claims.iat.unwrap_or(now - DurationSecs(1));
            self.expires_at = Some(issued_at + expires_in);
            self.expires_in = None;
        }

        self
    }
}

/// The persisted credential unit
///
/// Usable for an authenticated request only by virtue of its refresh token;
/// the access token and expiry are optional, derived state. `expires_at` is
/// always an absolute instant so that staleness checks remain correct no
/// matter when the record is read back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// The long-lived refresh token
    pub refresh_token: RefreshToken,
    /// The most recently obtained access token, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessToken>,
    /// When the access token expires, as an absolute instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<UnixTime>,
    /// The raw relative expiry, retained only when no absolute expiry could
    /// be computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<DurationSecs>,
    /// The token type, typically `Bearer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl CredentialRecord {
    /// Constructs a record holding only a refresh token
    pub fn from_refresh_token(refresh_token: RefreshToken) -> Self {
        Self {
            refresh_token,
            access_token: None,
            expires_at: None,
            expires_in: None,
            token_type: None,
        }
    }

    /// Builds a record from a first acquisition response
    ///
    /// Returns `None` if the response carries no refresh token, in which
    /// case there is nothing worth persisting.
    pub fn from_response(response: TokenResponse) -> Option<Self> {
        let refresh_token = response.refresh_token?;
        Some(Self {
            refresh_token,
            access_token: response.access_token,
            expires_at: response.expires_at,
            expires_in: response.expires_in,
            token_type: response.token_type,
        })
    }

    /// Replaces this record with a refresh response
    ///
    /// The prior refresh token is retained when the authority did not rotate
    /// it; everything else is taken from the response.
    pub fn merge(self, response: TokenResponse) -> Self {
        Self {
            refresh_token: response.refresh_token.unwrap_or(self.refresh_token),
            access_token: response.access_token,
            expires_at: response.expires_at,
            expires_in: response.expires_in,
            token_type: response.token_type,
        }
    }

    /// Whether the cached access token must be exchanged before use
    ///
    /// True when there is no usable access token, when no absolute expiry is
    /// known, or when the expiry has passed.
    pub fn needs_refresh(&self, now: UnixTime) -> bool {
        if self.access_token.is_none() {
            return true;
        }
        match self.expires_at {
            None => true,
            Some(at) => at < now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    const NOW: UnixTime = UnixTime(1700000000);

    fn jwt_with_claims(claims: &str) -> AccessToken {
        AccessToken::new(format!("h.{}.s", URL_SAFE_NO_PAD.encode(claims)))
    }

    fn response(access_token: Option<AccessToken>, expires_in: Option<u64>) -> TokenResponse {
        TokenResponse {
            access_token,
            refresh_token: Some(RefreshToken::new("abc")),
            expires_at: None,
            expires_in: expires_in.map(DurationSecs),
            token_type: Some("Bearer".to_owned()),
        }
    }

    #[test]
    fn existing_expires_at_is_kept() {
        let mut resp = response(Some(jwt_with_claims(r#"{"exp": 1700009999}"#)), Some(300));
        resp.expires_at = Some(UnixTime(1700000500));
        let resolved = resp.resolve_expiry(NOW);
        assert_eq!(resolved.expires_at, Some(UnixTime(1700000500)));
        assert_eq!(resolved.expires_in, None);
    }

    #[test]
    fn jwt_exp_beats_expires_in() {
        let resp = response(Some(jwt_with_claims(r#"{"exp": 1700009999}"#)), Some(300));
        let resolved = resp.resolve_expiry(NOW);
        assert_eq!(resolved.expires_at, Some(UnixTime(1700009999)));
        assert_eq!(resolved.expires_in, None);
    }

    #[test]
    fn expires_in_uses_iat_when_decodable() {
        let resp = response(Some(jwt_with_claims(r#"{"iat": 1699999700}"#)), Some(300));
        let resolved = resp.resolve_expiry(NOW);
        assert_eq!(resolved.expires_at, Some(UnixTime(1700000000)));
    }

    #[test]
    fn expires_in_falls_back_to_one_second_fudge() {
        // server returns an opaque access token and expires_in=60
        let resp = response(Some(AccessToken::new("xyz")), Some(60));
        let resolved = resp.resolve_expiry(NOW);
        assert_eq!(resolved.expires_at, Some(NOW - DurationSecs(1) + DurationSecs(60)));
    }

    #[test]
    fn no_source_leaves_expiry_unset() {
        let resp = response(Some(AccessToken::new("xyz")), None);
        let resolved = resp.resolve_expiry(NOW);
        assert_eq!(resolved.expires_at, None);
    }

    #[test]
    fn needs_refresh_when_expiry_absent_or_past() {
        let mut record = CredentialRecord::from_refresh_token(RefreshToken::new("abc"));
        record.access_token = Some(AccessToken::new("xyz"));
        assert!(record.needs_refresh(NOW));

        record.expires_at = Some(NOW - DurationSecs(1));
        assert!(record.needs_refresh(NOW));

        record.expires_at = Some(UnixTime(0));
        assert!(record.needs_refresh(NOW));
    }

    #[test]
    fn fresh_token_does_not_need_refresh() {
        let mut record = CredentialRecord::from_refresh_token(RefreshToken::new("abc"));
        record.access_token = Some(AccessToken::new("xyz"));
        record.expires_at = Some(NOW + DurationSecs(1));
        assert!(!record.needs_refresh(NOW));
    }

    #[test]
    fn missing_access_token_always_needs_refresh() {
        let mut record = CredentialRecord::from_refresh_token(RefreshToken::new("abc"));
        record.expires_at = Some(NOW + DurationSecs(300));
        assert!(record.needs_refresh(NOW));
    }

    #[test]
    fn merge_retains_refresh_token_when_not_rotated() {
        let record = CredentialRecord::from_refresh_token(RefreshToken::new("abc"));
        let resp = TokenResponse {
            access_token: Some(AccessToken::new("xyz")),
            refresh_token: None,
            expires_at: Some(UnixTime(1700000300)),
            expires_in: None,
            token_type: Some("Bearer".to_owned()),
        };
        let merged = record.merge(resp);
        assert_eq!(merged.refresh_token, RefreshToken::new("abc"));
        assert_eq!(merged.access_token, Some(AccessToken::new("xyz")));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let token = AccessToken::new("very-secret-value");
        assert_eq!(format!("{token:?}"), "***ACCESS TOKEN***");
        let token = RefreshToken::new("very-secret-value");
        assert_eq!(format!("{token}"), "***REFRESH TOKEN***");
    }
}
