//! The request-time refresh decision
//!
//! Before a protected request goes out, [`RefreshGate::authorize`] decides
//! whether the cached access token can be used as-is or must first be
//! exchanged via the refresh grant. Refresh happens at most once per
//! request; a failed refresh leaves the stale record on disk untouched.

use thiserror::Error;

use crate::clock::{Clock, System};
use crate::store::CredentialSink;
use crate::tokens::{CredentialRecord, TokenResponse};

/// An error while refreshing the access token
#[derive(Debug, Error)]
pub enum GateError {
    /// The authorization server rejected the refresh request
    #[error("authorization server returned status {status}\n{body}")]
    Authority {
        /// The HTTP status of the response
        status: reqwest::StatusCode,
        /// The response body, verbatim
        body: String,
    },
    /// The response body could not be deserialized
    #[error("error deserializing refresh response")]
    Body(#[from] serde_json::Error),
    /// The request could not be sent or its body could not be read
    #[error("error contacting authorization server")]
    Transport(#[from] reqwest::Error),
    /// The refresh succeeded but returned no access token
    #[error("refresh response carried no access token")]
    MissingAccessToken,
}

/// Decides whether a cached credential may be used or must be refreshed
#[derive(Debug)]
pub struct RefreshGate<C = System> {
    client: reqwest::Client,
    token_url: reqwest::Url,
    client_id: String,
    scope: Option<String>,
    clock: C,
}

impl RefreshGate<System> {
    /// Constructs a gate against the given token endpoint
    pub fn new(
        client: reqwest::Client,
        token_url: reqwest::Url,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url,
            client_id: client_id.into(),
            scope: None,
            clock: System,
        }
    }
}

impl<C> RefreshGate<C> {
    /// Includes a scope in refresh requests
    ///
    /// Most profiles omit it; the refresh grant reuses the scope originally
    /// granted.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> RefreshGate<D> {
        RefreshGate {
            client: self.client,
            token_url: self.token_url,
            client_id: self.client_id,
            scope: self.scope,
            clock,
        }
    }
}

impl<C: Clock> RefreshGate<C> {
    /// Produces an `Authorization` header value, refreshing if needed
    ///
    /// If `force_refresh` is set, the record has no usable access token, no
    /// absolute expiry is known, or the expiry has passed, the refresh
    /// token is exchanged for new credentials, the result is persisted
    /// through `sink` (a persist failure is logged and non-fatal), and the
    /// updated record is returned. Otherwise the cached token is used with
    /// no network call and no store write.
    pub async fn authorize<S: CredentialSink>(
        &self,
        record: CredentialRecord,
        sink: &mut S,
        force_refresh: bool,
    ) -> Result<(CredentialRecord, String), GateError> {
        let now = self.clock.now();

        if !force_refresh && !record.needs_refresh(now) {
            let token = record
                .access_token
                .as_ref()
                .ok_or(GateError::MissingAccessToken)?;
            tracing::debug!("using stored access token");
            let header = format!("Bearer {}", token.as_str());
            return Ok((record, header));
        }

        tracing::debug!(force_refresh, "getting new access token");
        let response = self.refresh(&record).await?;
        let record = record.merge(response.resolve_expiry(self.clock.now()));

        if let Err(error) = sink.persist(&record).await {
            tracing::warn!(
                error = (&*error as &dyn std::error::Error),
                "unable to persist refreshed credentials"
            );
        }

        let token = record
            .access_token
            .as_ref()
            .ok_or(GateError::MissingAccessToken)?;
        let header = format!("Bearer {}", token.as_str());
        Ok((record, header))
    }

    async fn refresh(&self, record: &CredentialRecord) -> Result<TokenResponse, GateError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", record.refresh_token.as_str()),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .client
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(response.status = status.as_u16(), "received refresh response");

        if !status.is_success() {
            return Err(GateError::Authority {
                status,
                body: response.text().await?,
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
