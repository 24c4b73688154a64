use clap::{Parser, Subcommand};
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "count-cli")]
#[command(about = "Command-line client for the telemetry service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Prefix configured as `server.base_path` on the service.
    #[arg(short, long, default_value = "")]
    base_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current count
    Get,
    /// Add a value to the count
    Add {
        #[arg(allow_hyphen_values = true)]
        value: i64,
    },
    /// Show service status
    Status,
    /// Check service health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let base = cli.url.trim_end_matches('/');
    let prefix = cli.base_path.trim_matches('/');
    let api = if prefix.is_empty() {
        format!("{base}/api/v1")
    } else {
        format!("{base}/{prefix}/api/v1")
    };

    let request = match cli.command {
        Commands::Get => client.get(format!("{api}/count")),
        Commands::Add { value } => client
            .post(format!("{api}/count"))
            .query(&[("count", value.to_string())]),
        Commands::Status => client.get(format!("{api}/status")),
        Commands::Health => client.get(format!("{base}/health")),
    };

    let res = request
        .header(ACCEPT, HeaderValue::from_static("application/json"))
        .send()
        .await?;
    print_response(res).await
}

/// A non-2xx answer from the service.
#[derive(Debug, thiserror::Error)]
#[error("service returned status {status}")]
struct StatusError {
    status: StatusCode,
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Err(StatusError { status }.into());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
