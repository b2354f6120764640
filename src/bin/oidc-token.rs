use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use reqwest::Url;
use thiserror::Error;

use oidc_cache::config::{self, AuthConfig, DEFAULT_REALM, OFFLINE_SCOPE};
use oidc_cache::flow::{self, FlowError};
use oidc_cache::store::FileSink;
use oidc_cache::System;

/// Get OIDC access and refresh tokens for use with `oidc-query` or another
/// client that connects to a service protected by OIDC.
#[derive(Debug, Parser)]
#[command(
    version,
    after_help = "There are two authentication methods: Device Flow (without --login), where \
        you will be instructed to visit a URL in a browser and sign in to the authentication \
        system there; and Direct Access (with --login), where you will be prompted for a \
        password locally. Some services may not allow every method. After you have \
        authenticated, OIDC tokens will be saved to TOKEN_FILE."
)]
struct Opts {
    /// OIDC client id (e.g. 'foobar-offline')
    #[arg(value_name = "CLIENT_ID")]
    client_id: String,

    /// Name of file to save tokens (default: {CLIENT_ID}.token)
    #[arg(value_name = "TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Request 'offline' tokens that don't expire when you log out
    /// (equivalent to `--scope offline_access`)
    #[arg(short, long)]
    offline: bool,

    /// Login as USERNAME with a password instead of using the device flow
    #[arg(short, long, value_name = "USERNAME")]
    login: Option<String>,

    /// Authorization scope (repeatable; 'openid' is always included)
    #[arg(short, long)]
    scope: Vec<String>,

    /// Authorization realm
    #[arg(short, long, env = "OIDC_REALM", default_value = DEFAULT_REALM)]
    realm: String,

    /// Authorization URL (default derived from the realm)
    #[arg(short = 'a', long, env = "OIDC_AUTH_URL")]
    auth_url: Option<Url>,

    /// Disable TLS host verification
    #[arg(long)]
    no_verify: bool,
}

#[derive(Debug, Error)]
enum RunError {
    #[error("invalid authorization URL {0:?}")]
    BadAuthUrl(String),
    #[error("error building HTTP client")]
    Client(#[source] reqwest::Error),
    #[error("error reading password")]
    Prompt(#[source] std::io::Error),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error("interrupted")]
    Interrupted,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let opts = Opts::parse();
    match run(opts).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Interrupted) => {
            eprintln!();
            ExitCode::FAILURE
        }
        Err(err) => {
            oidc_cache::print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(opts: Opts) -> Result<(), RunError> {
    let token_file = opts
        .token_file
        .unwrap_or_else(|| PathBuf::from(format!("{}.token", opts.client_id)));
    let auth_url = match opts.auth_url {
        Some(url) => url,
        None => {
            let raw = config::default_auth_url(&opts.realm);
            raw.parse().map_err(|_| RunError::BadAuthUrl(raw))?
        }
    };

    let mut scope = vec![config::DEFAULT_SCOPE.to_owned()];
    scope.extend(opts.scope);
    if opts.offline {
        scope.push(OFFLINE_SCOPE.to_owned());
    }
    let scope = scope.join(" ");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(opts.no_verify)
        .build()
        .map_err(RunError::Client)?;

    let config = AuthConfig::new(auth_url, opts.client_id.clone(), scope);
    let mut sink = FileSink::new(token_file.clone());
    let clock = System;

    if let Some(username) = &opts.login {
        let prompt = format!("Password for {username} at {}: ", opts.realm);
        let password = rpassword::prompt_password(prompt).map_err(RunError::Prompt)?;
        flow::password_flow(&client, &config, username, &password, &mut sink, &clock).await?;
    } else {
        tokio::select! {
            result = flow::device_flow(&client, &config, &mut sink, &clock) => {
                result?;
            }
            _ = tokio::signal::ctrl_c() => return Err(RunError::Interrupted),
        }
    }

    println!("Saved token to {}", token_file.display());
    Ok(())
}
