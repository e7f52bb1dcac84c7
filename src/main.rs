use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use tollgate::admission::{AdmissionController, AdmissionRequest};
use tollgate::clock::{Clock, SystemClock};
use tollgate::config::TollgateConfig;
use tollgate::ratelimit::{connect_store, RoutePolicyTable};
use tollgate::token::{Identity, StaticIdentities, TokenCodec};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Issue, inspect and verify bearer tokens
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },

    /// Print the configured route policy table
    Routes,

    /// Run admissions against the configured store and print the decisions
    Simulate {
        /// Route identifier, e.g. "POST /register"
        #[arg(long)]
        route: String,

        /// Client address
        #[arg(long, default_value = "127.0.0.1")]
        address: String,

        /// Authorization header value
        #[arg(long)]
        authorization: Option<String>,

        /// Known principal as `id:secret`; may be repeated
        #[arg(long = "identity", value_name = "ID:SECRET")]
        identities: Vec<String>,

        /// Number of requests to send
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Send all requests at once instead of one after another
        #[arg(long)]
        concurrent: bool,
    },
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Issue a token for an identifier
    Issue {
        identifier: String,
        #[arg(long)]
        secret: String,
    },

    /// Decode a token without verifying it
    Inspect { token: String },

    /// Verify a token against a secret
    Verify {
        token: String,
        #[arg(long)]
        secret: String,
    },
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    info!("Tollgate v{}", env!("CARGO_PKG_VERSION"));

    let config = TollgateConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Command::Token { command } => run_token(command, &config, clock),
        Command::Routes => print_routes(&config),
        Command::Simulate {
            route,
            address,
            authorization,
            identities,
            count,
            concurrent,
        } => {
            let identities = parse_identities(&identities)?;
            let store = connect_store(&config.store, clock.clone())
                .await
                .context("Failed to connect to the counter store")?;
            let controller = AdmissionController::from_config(&config, store, Arc::new(identities), clock)?;

            let request = AdmissionRequest::new(&address, &route).with_authorization(authorization.as_deref());
            simulate(&controller, &request, count, concurrent).await
        }
    }
}

fn run_token(command: TokenCommand, config: &TollgateConfig, clock: Arc<dyn Clock>) -> anyhow::Result<()> {
    let codec = TokenCodec::new(config.auth.salt.clone(), clock)
        .with_max_age(config.auth.max_age_secs.map(std::time::Duration::from_secs));

    match command {
        TokenCommand::Issue { identifier, secret } => {
            println!("{}", codec.issue(&identifier, &secret));
        }
        TokenCommand::Inspect { token } => {
            let identifier = codec.identifier_of(&token)?;
            let issued_at = codec.issued_at(&token)?;
            let issued = Utc
                .timestamp_opt(issued_at as i64, 0)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| issued_at.to_string());
            println!("{}", json!({ "identifier": identifier, "issued_at": issued }));
        }
        TokenCommand::Verify { token, secret } => {
            if !codec.verify(&token, &secret) {
                bail!("token is not valid for this secret");
            }
            println!("valid");
        }
    }
    Ok(())
}

fn print_routes(config: &TollgateConfig) -> anyhow::Result<()> {
    let table = RoutePolicyTable::from_limits(&config.limits)?;
    println!("global  {}", config.limits.global);
    for (route, policy) in table.iter() {
        let limit = policy.limit.map_or_else(|| "-".to_string(), |l| l.to_string());
        let auth = if policy.requires_auth { "auth" } else { "anonymous" };
        println!("{:<48} {:<16} {}", route, limit, auth);
    }
    Ok(())
}

fn parse_identities(raw: &[String]) -> anyhow::Result<StaticIdentities> {
    raw.iter()
        .map(|entry| match entry.split_once(':') {
            Some((id, secret)) if !id.is_empty() => Ok(Identity::new(id, secret)),
            _ => bail!("identity must look like ID:SECRET, got {:?}", entry),
        })
        .collect()
}

async fn simulate(
    controller: &AdmissionController,
    request: &AdmissionRequest<'_>,
    count: usize,
    concurrent: bool,
) -> anyhow::Result<()> {
    let decisions = if concurrent {
        futures::future::join_all((0..count).map(|_| decide(controller, request))).await
    } else {
        let mut decisions = Vec::with_capacity(count);
        for _ in 0..count {
            decisions.push(decide(controller, request).await);
        }
        decisions
    };

    for (n, decision) in decisions.into_iter().enumerate() {
        println!("{}", json!({ "n": n + 1, "decision": decision }));
    }
    Ok(())
}

async fn decide(controller: &AdmissionController, request: &AdmissionRequest<'_>) -> serde_json::Value {
    let outcome = match controller.admit(request).await {
        Ok(admitted) => controller.response_headers(&admitted).await.map(|headers| {
            json!({
                "status": 200,
                "identity": admitted.identity,
                "headers": pairs_to_json(headers.to_pairs()),
            })
        }),
        Err(rejection) => Err(rejection),
    };

    match outcome {
        Ok(value) => value,
        Err(rejection) => json!({
            "status": rejection.status_code(),
            "body": rejection.body(),
            "headers": pairs_to_json(rejection.headers()),
        }),
    }
}

fn pairs_to_json(pairs: Vec<(&'static str, String)>) -> serde_json::Value {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), serde_json::Value::String(value)))
        .collect::<serde_json::Map<_, _>>()
        .into()
}
