use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use reqwest::{Method, Url};
use thiserror::Error;

use oidc_cache::config::{self, AuthConfig, DEFAULT_REALM};
use oidc_cache::gate::GateError;
use oidc_cache::store::{self, FileSink, StoreError};
use oidc_cache::RefreshGate;

/// Make a request to a protected service, refreshing the cached access
/// token first when needed.
#[derive(Debug, Parser)]
#[command(
    version,
    after_help = "The response from the service will be written to standard output. Any other \
        diagnostic output will be written to standard error. If method is PUT or POST, and \
        neither --data nor --datafile are given, the request body will be read from standard \
        input."
)]
struct Opts {
    /// Name of file containing tokens (default: {CLIENT_ID}.token)
    #[arg(short, long)]
    token_file: Option<PathBuf>,

    /// Get a new access token even if the one in TOKEN_FILE is not expired
    /// (useful after an 'invalid token' error)
    #[arg(long)]
    force_refresh: bool,

    /// Authorization realm
    #[arg(short, long, env = "OIDC_REALM", default_value = DEFAULT_REALM)]
    realm: String,

    /// Authorization URL (default derived from the realm)
    #[arg(short = 'a', long, env = "OIDC_AUTH_URL")]
    auth_url: Option<Url>,

    /// Authorization scope
    #[arg(short, long, default_value = "openid offline_access")]
    scope: String,

    /// HTTP request method
    #[arg(short = 'X', long, default_value = "GET", value_parser = parse_method)]
    method: Method,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,

    /// Name of file containing the request body
    #[arg(long, conflicts_with = "data")]
    datafile: Option<PathBuf>,

    /// HTTP request header, as 'Name: Value' (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Equivalent to -H 'Content-Type: application/json; charset=utf-8'
    #[arg(short, long)]
    json: bool,

    /// Disable TLS host verification
    #[arg(long)]
    no_verify: bool,

    /// OIDC client id (e.g. 'foobar-offline')
    #[arg(value_name = "CLIENT_ID")]
    client_id: String,

    /// Query URL (e.g. 'https://api.foobar.caida.org/v1/foo')
    #[arg(value_name = "QUERY")]
    query: Url,
}

fn parse_method(raw: &str) -> Result<Method, String> {
    Method::from_bytes(raw.to_uppercase().as_bytes())
        .map_err(|_| format!("invalid HTTP method: {raw}"))
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected 'Name: Value', got {raw:?}"))?;
    Ok((name.trim().to_owned(), value.trim_start().to_owned()))
}

#[derive(Debug, Error)]
enum RunError {
    #[error("invalid authorization URL {0:?}")]
    BadAuthUrl(String),
    #[error("error building HTTP client")]
    Client(#[source] reqwest::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("error reading request body from {}", path.display())]
    Body {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("error sending request")]
    Transport(#[source] reqwest::Error),
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
        Err(err) => {
            oidc_cache::print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(opts: Opts) -> Result<(), RunError> {
    let token_file = opts
        .token_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.token", opts.client_id)));
    let auth_url = match opts.auth_url.clone() {
        Some(url) => url,
        None => {
            let raw = config::default_auth_url(&opts.realm);
            raw.parse().map_err(|_| RunError::BadAuthUrl(raw))?
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .danger_accept_invalid_certs(opts.no_verify)
        .build()
        .map_err(RunError::Client)?;

    let config = AuthConfig::new(auth_url, opts.client_id.clone(), opts.scope.clone());

    let body = request_body(&opts).await?;

    let record = store::load(&token_file).await?;
    let gate = RefreshGate::new(client.clone(), config.token_url(), config.client_id.clone())
        .with_scope(config.scope.clone());
    let mut sink = FileSink::new(token_file);
    let (_, authorization) = gate.authorize(record, &mut sink, opts.force_refresh).await?;

    let mut request = client
        .request(opts.method.clone(), opts.query.clone())
        .header(reqwest::header::AUTHORIZATION, authorization);
    for (name, value) in &opts.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if opts.json {
        request = request.header(
            reqwest::header::CONTENT_TYPE,
            "application/json; charset=utf-8",
        );
    }
    if let Some(body) = body {
        request = request.body(body);
    }

    let response = request.send().await.map_err(RunError::Transport)?;

    eprintln!("\x1b[31mHTTP response status: {}\x1b[m", response.status());
    eprintln!("HTTP response headers: {:?}", response.headers());
    eprintln!("HTTP response text:");
    let text = response.text().await.map_err(RunError::Transport)?;
    println!("{text}");

    Ok(())
}

async fn request_body(opts: &Opts) -> Result<Option<Vec<u8>>, RunError> {
    if opts.method != Method::PUT && opts.method != Method::POST {
        return Ok(None);
    }

    if let Some(data) = &opts.data {
        return Ok(Some(data.clone().into_bytes()));
    }

    if let Some(path) = &opts.datafile {
        let data = tokio::fs::read(path).await.map_err(|source| RunError::Body {
            path: path.clone(),
            source,
        })?;
        return Ok(Some(data));
    }

    use tokio::io::AsyncReadExt;
    let mut data = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut data)
        .await
        .map_err(|source| RunError::Body {
            path: PathBuf::from("<stdin>"),
            source,
        })?;
    Ok(Some(data))
}
