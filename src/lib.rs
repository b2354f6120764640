//! Credential cache and silent refresh for CLIs talking to OIDC-protected
//! services
//!
//! A command-line tool that queries an OAuth2/OIDC-protected HTTP service
//! should not make its user re-authenticate on every invocation. This crate
//! acquires a long-lived refresh token once, interactively (device flow or
//! direct password grant), persists it in an owner-only credential file
//! alongside a derived absolute expiry, and on each later invocation either
//! reuses the cached access token or silently exchanges the refresh token
//! for a new one, rewriting the store afterwards.
//!
//! The moving parts, leaves first:
//!
//! * [`jwt`] decodes a token's payload segment (without verification) to
//!   harvest `exp`/`iat` hints.
//! * [`tokens`] holds the persisted [`CredentialRecord`] and derives an
//!   absolute expiry from whatever the server provided.
//! * [`store`] owns the on-disk format, its mode-600 discipline, and the
//!   [`CredentialSink`][store::CredentialSink] seam that decouples
//!   acquisition from storage policy.
//! * [`flow`] drives the two interactive acquisition protocols.
//! * [`gate`] makes the per-request use-or-refresh decision.
//!
//! The tool assumes at most one process uses a given credential file at a
//! time; there is no file locking, and two concurrent refreshers can
//! overwrite each other's results. That is an accepted limitation for a
//! single-user CLI, not a coordination guarantee.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod clock;
pub mod config;
pub mod flow;
pub mod gate;
pub mod jwt;
pub mod store;
pub mod tokens;

pub use clock::{Clock, DurationSecs, System, UnixTime};
pub use config::AuthConfig;
pub use gate::RefreshGate;
pub use tokens::{AccessToken, CredentialRecord, RefreshToken, TokenResponse};

/// Prints an error and its causes to the error stream, innermost cause first
///
/// Diagnostics go to stderr so that a protected service's response on stdout
/// can still be piped and parsed.
pub fn print_error_chain(err: &(dyn std::error::Error + 'static)) {
    eprint!("{}", render_error_chain(err));
}

fn render_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut chain = Vec::new();
    let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(err) = cause {
        chain.push(err);
        cause = err.source();
    }

    let mut out = String::new();
    for err in chain.iter().rev() {
        out.push_str(&err.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("connection reset by peer")]
    struct Innermost;

    #[derive(Debug, Error)]
    #[error("error contacting authorization server")]
    struct Middle(#[from] Innermost);

    #[derive(Debug, Error)]
    #[error("error refreshing access token")]
    struct Outer(#[from] Middle);

    #[test]
    fn error_chain_is_rendered_innermost_first() {
        let err = Outer::from(Middle::from(Innermost));
        assert_eq!(
            render_error_chain(&err),
            "connection reset by peer\n\
             error contacting authorization server\n\
             error refreshing access token\n"
        );
    }

    #[test]
    fn single_error_renders_alone() {
        assert_eq!(render_error_chain(&Innermost), "connection reset by peer\n");
    }
}
