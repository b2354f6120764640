//! Interactive token acquisition flows
//!
//! Two ways of obtaining the initial refresh token: the OAuth2 device flow,
//! where the user approves the client from a browser on any device while we
//! poll the token endpoint, and the direct password grant. Both hand their
//! result to a [`CredentialSink`] exactly once and never touch the
//! credential file themselves.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::clock::{Clock, DurationSecs, UnixTime};
use crate::config::{AuthConfig, OFFLINE_SCOPE};
use crate::store::CredentialSink;
use crate::tokens::{CredentialRecord, TokenResponse};

/// The grant type of a device-flow token poll
pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// An error while acquiring tokens from the authorization server
#[derive(Debug, Error)]
pub enum FlowError {
    /// The authorization server rejected the request
    #[error("authorization server returned status {status}\n{body}")]
    Authority {
        /// The HTTP status of the response
        status: reqwest::StatusCode,
        /// The response body, verbatim
        body: String,
    },
    /// The response body could not be deserialized
    #[error("error deserializing response from authorization server")]
    Body(#[from] serde_json::Error),
    /// The request could not be sent or its body could not be read
    #[error("error contacting authorization server")]
    Transport(#[from] reqwest::Error),
    /// The device authorization expired before the user approved it
    #[error("device authorization expired before it was approved")]
    SessionExpired,
    /// The grant succeeded but returned no refresh token
    #[error("authorization response carried no refresh token")]
    MissingRefreshToken,
}

/// A device authorization session, as returned by the device endpoint
#[derive(Debug, Deserialize)]
struct DeviceAuthorization {
    device_code: String,
    verification_uri_complete: String,
    #[serde(default = "default_interval")]
    interval: u64,
    expires_in: Option<DurationSecs>,
}

// RFC 8628 §3.2: 5 seconds when the server does not specify
fn default_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
}

/// Runs the device flow to completion
///
/// Requests a device authorization, prompts the user (on stderr) to visit
/// the verification URL, then polls the token endpoint at the
/// server-specified interval until the user approves, the server reports a
/// terminal error, or the device session's own expiry passes. On success
/// the resulting record is persisted through `sink` exactly once and
/// returned.
///
/// Cancelling the returned future between polls aborts the flow with no
/// partial state persisted.
pub async fn device_flow<S, C>(
    client: &reqwest::Client,
    config: &AuthConfig,
    sink: &mut S,
    clock: &C,
) -> Result<CredentialRecord, FlowError>
where
    S: CredentialSink,
    C: Clock + Sync,
{
    tracing::debug!(client_id = %config.client_id, scope = %config.scope, "requesting device authorization");
    let response = client
        .post(config.device_url())
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("scope", config.scope.as_str()),
        ])
        .send()
        .await?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(FlowError::Authority {
            status,
            body: response.text().await?,
        });
    }
    let body = response.bytes().await?;
    let session: DeviceAuthorization = serde_json::from_slice(&body)?;

    let token_kind = if config.scope.contains(OFFLINE_SCOPE) {
        "an offline refresh"
    } else {
        "a refresh"
    };
    eprintln!(
        "\nTo authorize the creation of {token_kind} token, \
         use any web browser on any device to visit:\n    {}",
        session.verification_uri_complete
    );
    eprint!("\nWaiting for authorization...");

    // the server will reject the device code after its own expiry anyway
    let deadline = session.expires_in.map(|d| clock.now() + d);

    loop {
        if let Some(deadline) = deadline {
            if clock.now() >= deadline {
                eprintln!();
                return Err(FlowError::SessionExpired);
            }
        }

        tokio::time::sleep(Duration::from_secs(session.interval)).await;
        eprint!(".");

        let response = client
            .post(config.token_url())
            .form(&[
                ("client_id", config.client_id.as_str()),
                ("grant_type", DEVICE_CODE_GRANT),
                ("device_code", session.device_code.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if status == reqwest::StatusCode::BAD_REQUEST {
            if let Ok(err) = serde_json::from_slice::<TokenErrorResponse>(&body) {
                if err.error == "authorization_pending" {
                    tracing::trace!("authorization still pending");
                    continue;
                }
            }
        }
        eprintln!();

        if status == reqwest::StatusCode::OK {
            let response: TokenResponse = serde_json::from_slice(&body)?;
            return finish(response, sink, clock.now()).await;
        }

        return Err(FlowError::Authority {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }
}

/// Runs the direct password grant
///
/// Exchanges `username` and `password` for tokens in a single request. The
/// caller obtains the password without echoing it and must drop it as soon
/// as this returns, success or not. On success the resulting record is
/// persisted through `sink` exactly once and returned.
pub async fn password_flow<S, C>(
    client: &reqwest::Client,
    config: &AuthConfig,
    username: &str,
    password: &str,
    sink: &mut S,
    clock: &C,
) -> Result<CredentialRecord, FlowError>
where
    S: CredentialSink,
    C: Clock + Sync,
{
    tracing::debug!(client_id = %config.client_id, username, "requesting direct grant");
    let response = client
        .post(config.token_url())
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("scope", config.scope.as_str()),
            ("username", username),
            ("password", password),
            ("grant_type", "password"),
        ])
        .send()
        .await?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(FlowError::Authority {
            status,
            body: response.text().await?,
        });
    }
    let body = response.bytes().await?;
    let response: TokenResponse = serde_json::from_slice(&body)?;
    finish(response, sink, clock.now()).await
}

async fn finish<S: CredentialSink>(
    response: TokenResponse,
    sink: &mut S,
    now: UnixTime,
) -> Result<CredentialRecord, FlowError> {
    let record = CredentialRecord::from_response(response.resolve_expiry(now))
        .ok_or(FlowError::MissingRefreshToken)?;

    if let Err(error) = sink.persist(&record).await {
        tracing::warn!(
            error = (&*error as &dyn std::error::Error),
            "unable to persist new credentials"
        );
    }

    Ok(record)
}
