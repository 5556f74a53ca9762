//! Gatehouse CLI
//!
//! Command-line interface for managing a gateway session and sending
//! requests through the token-refresh-aware client.
//!
//! # Usage
//!
//! ```bash
//! # Store credentials obtained elsewhere
//! gatehouse login --access-token "$ACCESS" --refresh-token "$REFRESH"
//!
//! # Show which credentials are stored
//! gatehouse status
//!
//! # Send a request; the unwrapped `data` is printed as JSON
//! gatehouse request get /orders --param page=2
//! gatehouse request post /orders --data '{"qty": 2}'
//!
//! # Forget the session
//! gatehouse logout
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gatehouse_client::{
    ClientConfig, HttpClient, HttpClientBuilder, LogSessionListener, RequestDescriptor,
    load_config,
};
use gatehouse_core::Secret;
use serde_json::{Value, json};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "Session management and requests for envelope-style API gateways")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the gateway base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store an access/refresh token pair
    Login {
        #[arg(long)]
        access_token: String,

        #[arg(long)]
        refresh_token: String,
    },

    /// Remove stored credentials
    Logout,

    /// Show which credentials are stored
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Send a request and print the response data
    Request {
        #[arg(value_enum)]
        method: HttpMethod,

        /// Path relative to the base URL
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,

        /// Query parameter (key=value), repeatable
        #[arg(short, long = "param", value_parser = parse_pair)]
        params: Vec<(String, String)>,

        /// Extra header (name=value), repeatable
        #[arg(short = 'H', long = "header", value_parser = parse_pair)]
        headers: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = resolve_config(cli.config.as_deref(), cli.base_url)?;
    debug!(base_url = %config.base_url, "configuration loaded");

    let client = HttpClientBuilder::from_config(&config)
        .listener(Arc::new(LogSessionListener))
        .build()
        .context("Failed to build HTTP client")?;

    match cli.command {
        Commands::Login {
            access_token,
            refresh_token,
        } => login(&client, access_token, refresh_token).await,
        Commands::Logout => logout(&client).await,
        Commands::Status { format } => status(&client, &config, &format).await,
        Commands::Request {
            method,
            path,
            data,
            params,
            headers,
        } => {
            let descriptor = build_request(method, &path, data.as_deref(), params, headers)?;
            send_request(&client, descriptor).await
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(path: Option<&std::path::Path>, base_url: Option<String>) -> Result<ClientConfig> {
    let mut config = load_config(path).context("Failed to load configuration")?;
    if let Some(base_url) = base_url {
        config.base_url = base_url;
    }
    Ok(config)
}

async fn login(client: &HttpClient, access_token: String, refresh_token: String) -> Result<()> {
    client
        .tokens()
        .set_tokens(&Secret::new(access_token), &Secret::new(refresh_token))
        .await
        .context("Failed to store credentials")?;

    info!("credentials stored");
    println!("Logged in to {}", client.base_url());
    Ok(())
}

async fn logout(client: &HttpClient) -> Result<()> {
    client
        .tokens()
        .clear()
        .await
        .context("Failed to clear credentials")?;

    println!("Logged out");
    Ok(())
}

async fn status(client: &HttpClient, config: &ClientConfig, format: &str) -> Result<()> {
    let credentials = client
        .tokens()
        .credentials()
        .await
        .context("Failed to read credentials")?;

    let access = credentials.access_token.is_some();
    let refresh = credentials.refresh_token.is_some();

    match format {
        "json" => {
            let report = json!({
                "base_url": config.base_url,
                "config_path": config.config_path,
                "access_token": access,
                "refresh_token": refresh,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            println!("Gateway:       {}", config.base_url);
            if let Some(path) = &config.config_path {
                println!("Config:        {}", path.display());
            }
            println!("Access token:  {}", presence(access));
            println!("Refresh token: {}", presence(refresh));
        }
    }
    Ok(())
}

fn presence(stored: bool) -> &'static str {
    if stored { "stored" } else { "missing" }
}

fn build_request(
    method: HttpMethod,
    path: &str,
    data: Option<&str>,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
) -> Result<RequestDescriptor> {
    let mut descriptor = match method {
        HttpMethod::Get => RequestDescriptor::get(path),
        HttpMethod::Post => RequestDescriptor::post(path),
        HttpMethod::Put => RequestDescriptor::put(path),
        HttpMethod::Patch => RequestDescriptor::patch(path),
        HttpMethod::Delete => RequestDescriptor::delete(path),
    };

    if let Some(data) = data {
        let body: Value = serde_json::from_str(data).context("--data is not valid JSON")?;
        descriptor = descriptor.json(body);
    }
    for (key, value) in params {
        descriptor = descriptor.query(key, value);
    }
    for (name, value) in headers {
        descriptor = descriptor.header(name, value);
    }

    Ok(descriptor)
}

async fn send_request(client: &HttpClient, descriptor: RequestDescriptor) -> Result<()> {
    let target = format!("{} {}", descriptor.method, descriptor.url);
    let data = client
        .execute_value(descriptor)
        .await
        .with_context(|| format!("{} failed", target))?;

    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

/// Parse `key=value`.
fn parse_pair(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {:?}", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_pair() {
        assert_eq!(parse_pair("page=2").unwrap(), ("page".into(), "2".into()));
        assert_eq!(parse_pair("q=a=b").unwrap(), ("q".into(), "a=b".into()));
        assert_eq!(parse_pair("empty=").unwrap(), ("empty".into(), "".into()));
        assert!(parse_pair("novalue").is_err());
        assert!(parse_pair("=x").is_err());
    }

    #[test]
    fn test_request_command_parses() {
        let cli = Cli::try_parse_from([
            "gatehouse",
            "request",
            "post",
            "/orders",
            "--data",
            r#"{"qty":2}"#,
            "--param",
            "dry_run=true",
            "-H",
            "X-Tenant=acme",
        ])
        .unwrap();

        match cli.command {
            Commands::Request {
                method,
                path,
                data,
                params,
                headers,
            } => {
                assert_eq!(method, HttpMethod::Post);
                assert_eq!(path, "/orders");
                assert_eq!(data.as_deref(), Some(r#"{"qty":2}"#));
                assert_eq!(params, vec![("dry_run".to_string(), "true".to_string())]);
                assert_eq!(headers, vec![("X-Tenant".to_string(), "acme".to_string())]);
            }
            _ => panic!("expected request command"),
        }
    }

    #[test]
    fn test_build_request() {
        let descriptor = build_request(
            HttpMethod::Patch,
            "/orders/7",
            Some(r#"{"qty":3}"#),
            vec![("v".into(), "2".into())],
            vec![],
        )
        .unwrap();

        assert_eq!(descriptor.method.as_str(), "PATCH");
        assert_eq!(descriptor.body, Some(json!({ "qty": 3 })));
        assert_eq!(descriptor.query, vec![("v".to_string(), "2".to_string())]);

        assert!(build_request(HttpMethod::Post, "/x", Some("{oops"), vec![], vec![]).is_err());
    }

    #[test]
    fn test_base_url_flag_overrides_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_url = \"https://file.example.com\"").unwrap();

        let config = resolve_config(Some(file.path()), Some("https://flag.example.com".into()))
            .unwrap();
        assert_eq!(config.base_url, "https://flag.example.com");
        assert_eq!(config.config_path.as_deref(), Some(file.path()));
    }

    #[tokio::test]
    async fn test_login_status_logout_with_memory_store() {
        let mut config = ClientConfig::default();
        config.storage.backend = gatehouse_client::StorageBackend::Memory;
        let client = HttpClient::from_config(&config).unwrap();

        login(&client, "A".into(), "R".into()).await.unwrap();
        let credentials = client.tokens().credentials().await.unwrap();
        assert_eq!(credentials.access_token.unwrap().expose(), "A");

        status(&client, &config, "json").await.unwrap();

        logout(&client).await.unwrap();
        assert!(client.tokens().credentials().await.unwrap().is_empty());
    }
}
