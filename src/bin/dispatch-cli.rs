use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;
use tokio::net::TcpListener;

use resilient_dispatch::config::{load_config, ConfigWatcher};
use resilient_dispatch::{admin, observability, Dispatcher, Shutdown};

#[derive(Parser)]
#[command(name = "dispatch-cli")]
#[command(about = "Management CLI for the resilient dispatcher", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "DISPATCH_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a config file
    CheckConfig { path: PathBuf },
    /// Run a dispatcher with its admin endpoint, reloading the config on change
    Serve { config: PathBuf },
    /// Summary of breakers and in-flight calls
    Status,
    /// Full resilience snapshot
    Snapshot,
    /// Reset a service's circuit breaker
    ResetBreaker { service: String },
    /// Clear the error pattern table
    ClearPatterns,
    /// Force the next health probe for a provider
    InvalidateProvider { name: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (method, path) = match &cli.command {
        Commands::CheckConfig { path } => return check_config(path),
        Commands::Serve { config } => return serve(config).await,
        Commands::Status => (Method::GET, "/admin/status".to_string()),
        Commands::Snapshot => (Method::GET, "/admin/snapshot".to_string()),
        Commands::ResetBreaker { service } => (
            Method::POST,
            format!("/admin/circuit-breakers/{}/reset", service),
        ),
        Commands::ClearPatterns => (Method::DELETE, "/admin/error-patterns".to_string()),
        Commands::InvalidateProvider { name } => (
            Method::POST,
            format!("/admin/providers/{}/invalidate", name),
        ),
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = reqwest::Client::new()
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

fn check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    match load_config(path) {
        Ok(config) => {
            println!(
                "{}: ok ({} service override(s))",
                path.display(),
                config.services.len()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

async fn serve(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    observability::install(&config.observability);

    if !config.admin.enabled {
        tracing::warn!("Admin endpoint disabled in config, nothing to serve");
        return Ok(());
    }

    let listener = TcpListener::bind(&config.admin.bind_address).await?;
    let api_key = config.admin.api_key.clone();
    let dispatcher = Dispatcher::new(config);

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    let (watcher, updates) = ConfigWatcher::new(path);
    let _watch_handle = watcher.run()?;
    let follower = {
        let dispatcher = dispatcher.clone();
        let signal = shutdown.subscribe();
        tokio::spawn(async move { dispatcher.follow_config_updates(updates, signal).await })
    };

    admin::serve(listener, admin::router(dispatcher, api_key), &shutdown).await?;
    let _ = follower.await;
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Response: {}", text);
            }
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
