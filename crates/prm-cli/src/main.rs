use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prm_hubspot::{HubSpotClient, HubSpotConnector};
use prm_storage::{
    ensure_schema, MemorySettings, MemoryStore, PgSettings, PgStore, PrmStore, SettingsStore,
};
use prm_sync::ImportOutcome;
use prm_web::AppState;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Parser)]
#[command(name = "prm-cli")]
#[command(about = "PRM sync service command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API.
    Serve,
    /// One-time bulk import from the CRM (insert mode, not idempotent).
    Migrate,
    /// Reconcile the store with the CRM (upsert mode, safe to re-run).
    Sync,
}

#[derive(Debug, Clone)]
struct Config {
    port: u16,
    database_url: Option<String>,
    crm_access_token: Option<String>,
}

impl Config {
    fn from_env() -> Self {
        Self {
            port: std::env::var("PRM_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            database_url: std::env::var("DATABASE_URL").ok(),
            crm_access_token: std::env::var("HUBSPOT_ACCESS_TOKEN").ok(),
        }
    }
}

fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn build_stores(config: &Config) -> Result<(Arc<dyn PrmStore>, Arc<dyn SettingsStore>)> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url)
                .await
                .context("connecting to DATABASE_URL")?;
            ensure_schema(store.pool())
                .await
                .context("preparing database schema")?;
            let settings = PgSettings::new(store.pool().clone());
            Ok((Arc::new(store), Arc::new(settings)))
        }
        None => {
            info!("DATABASE_URL not set; using the in-memory store");
            Ok((Arc::new(MemoryStore::new()), Arc::new(MemorySettings::new())))
        }
    }
}

async fn run_pipeline(config: &Config, migrate: bool) -> Result<ImportOutcome> {
    let token = config
        .crm_access_token
        .as_deref()
        .context("HUBSPOT_ACCESS_TOKEN is not set")?;
    let client = HubSpotClient::new(token)?;
    let (store, _settings) = build_stores(config).await?;
    let outcome = if migrate {
        prm_sync::run_migration(&client, store.as_ref()).await
    } else {
        prm_sync::run_sync(&client, store.as_ref()).await
    };
    Ok(outcome)
}

fn print_outcome(op: &str, outcome: &ImportOutcome) {
    println!(
        "{op} complete: partners={} deals={} leads={} total={}",
        outcome.counts.partners, outcome.counts.deals, outcome.counts.leads, outcome.counts.total
    );
    for err in &outcome.errors {
        eprintln!("{op} error: {err}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let (store, settings) = build_stores(&config).await?;
            let state = AppState::new(store, settings, Arc::new(HubSpotConnector::new()));
            prm_web::serve(state, config.port).await?;
        }
        Commands::Migrate => {
            let outcome = run_pipeline(&config, true).await?;
            print_outcome("migrate", &outcome);
        }
        Commands::Sync => {
            let outcome = run_pipeline(&config, false).await?;
            print_outcome("sync", &outcome);
        }
    }

    Ok(())
}
