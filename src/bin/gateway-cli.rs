use clap::{Parser, Subcommand};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use api_gateway::security::auth::{Claims, SubjectId};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Development CLI for the API gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query the gateway's liveness endpoint
    Health {
        #[arg(short, long, default_value = "http://localhost:8000")]
        url: String,
    },
    /// Mint an HS256 access token the way the auth service does
    Token {
        #[arg(short, long, env = "JWT_SECRET")]
        secret: String,
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value_t = 900)]
        ttl_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Health { url } => {
            let res = reqwest::Client::new()
                .get(format!("{}/health", url.trim_end_matches('/')))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Token {
            secret,
            user_id,
            email,
            ttl_secs,
        } => {
            let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
            let user_id = match user_id.parse::<i64>() {
                Ok(id) => SubjectId::Numeric(id),
                Err(_) => SubjectId::Text(user_id),
            };
            let claims = Claims {
                user_id,
                email,
                exp: now + ttl_secs,
                iat: Some(now),
            };
            let token = encode(
                &Header::default(),
                &claims,
                &EncodingKey::from_secret(secret.as_bytes()),
            )?;
            println!("{}", token);
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
