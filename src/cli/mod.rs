use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::process::ExitCode;

use crate::infra::config::Config;

#[derive(Parser)]
#[command(name = "direct-mcp-gateway")]
#[command(about = "Direct MCP Gateway - LLM tool bridge and admin CLI")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Health check the service
    Health {
        /// Service URL to check
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,
    },
    /// Validate configuration
    Config {
        /// Validate config without starting service
        #[arg(long)]
        validate: bool,
    },
    /// List the tools the providers expose, through the in-process bridge
    Tools,
    /// Send a query to a running service and stream the answer
    Ask {
        /// Service URL
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,
        /// Natural-language query
        query: String,
    },
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    run_commands(cli.command.unwrap_or(Commands::Serve)).await
}

pub async fn run_commands(command: Commands) -> ExitCode {
    match command {
        Commands::Serve => match crate::infra::boot::run_server().await {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("❌ Server failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Health { url } => match health_check(&url).await {
            Ok(_) => {
                println!("✅ Service is healthy");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Health check failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Config { validate } => match validate_config(validate) {
            Ok(_) => {
                println!("✅ Configuration is valid");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Configuration validation failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Tools => match list_tools().await {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("❌ Tool listing failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Ask { url, query } => match ask(&url, &query).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("\n❌ Query failed: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}

async fn health_check(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/healthz", url))
        .timeout(std::time::Duration::from_millis(500))
        .send()
        .await?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(format!("HTTP {}", response.status()).into())
    }
}

fn validate_config(strict: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    if strict {
        config.validate()?;
    }

    println!("📋 Configuration:");
    println!("  Port: {}", config.port);
    println!("  Completion API: {}", config.completion.base_url);
    println!("  Model: {}", config.completion.model);
    println!("  Max tool rounds: {}", config.orchestrator.max_tool_rounds);
    println!("  JMA: {}", config.weather.base_url);
    Ok(())
}

async fn list_tools() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let providers = crate::tools::registry::build_providers(&config)?;
    let bridge = crate::tools::bridge::build_bridge(&providers).await?;

    println!("🔧 {} tools:", bridge.definitions().len());
    for def in bridge.definitions() {
        println!(
            "  {} - {}",
            def.name(),
            def.function.description.as_deref().unwrap_or("")
        );
    }
    bridge.shutdown().await;
    Ok(())
}

async fn ask(url: &str, query: &str) -> Result<(), Box<dyn std::error::Error>> {
    let response = reqwest::Client::new()
        .post(format!("{}/query", url.trim_end_matches('/')))
        .json(&serde_json::json!({ "query": query }))
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("HTTP {}: {}", status, body).into());
    }

    let mut stdout = std::io::stdout();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        stdout.write_all(&chunk?)?;
        stdout.flush()?;
    }
    println!();
    Ok(())
}
