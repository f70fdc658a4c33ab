// medrelay — desktop CLI for the MedRelay patient store and gateway
//
// Manages the on-device patient repository and issues search/create
// operations through the same gateway engine mesh devices run. There is no
// radio here: the CLI uses a no-op transport, so "remote" results come from
// the direct backend path when the device is online.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use colored::*;
use tracing::debug;

use config::Config;
use medrelay_core::{
    ConnectivityMonitor, GatewayConfig, GatewayEvent, HttpBackend, HttpBackendConfig, MeshGateway,
    MeshTransport, PatientRecord, PatientRepository, SledStorage,
};

#[derive(Parser)]
#[command(name = "medrelay")]
#[command(about = "MedRelay — offline-first patient lookups", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a patient to the local store
    Add {
        name: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Comma-separated conditions
        #[arg(long)]
        conditions: Option<String>,
        /// Comma-separated medications
        #[arg(long)]
        medications: Option<String>,
        /// Comma-separated allergies
        #[arg(long)]
        allergies: Option<String>,
    },
    /// List all locally stored patients
    List,
    /// Delete a patient by id
    Delete { id: String },
    /// Search local records, and the remote service when online
    Search {
        query: String,
        /// Skip the remote service even if online
        #[arg(long)]
        offline: bool,
    },
    /// Create a patient on the remote service (JSON document)
    Create {
        json: String,
        #[arg(long)]
        offline: bool,
    },
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show store and connectivity status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    SetBackend { url: String },
    SetOnline { online: bool },
}

/// The CLI has no mesh radio; broadcasts go nowhere
struct NullTransport;

#[async_trait]
impl MeshTransport for NullTransport {
    fn local_peer_id(&self) -> String {
        "cli".to_string()
    }

    async fn broadcast(&self, text: &str) -> anyhow::Result<()> {
        debug!(len = text.len(), "broadcast dropped (no mesh transport)");
        Ok(())
    }
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn open_repository(config: &Config) -> Result<PatientRepository> {
    let path = config.storage_path()?;
    let backend = SledStorage::open(&path)
        .with_context(|| format!("Failed to open patient store at {path}"))?;
    Ok(PatientRepository::new(Arc::new(backend)))
}

fn build_gateway(
    config: &Config,
    repository: PatientRepository,
    online: bool,
) -> Result<(MeshGateway, tokio::sync::mpsc::Receiver<GatewayEvent>)> {
    let backend = HttpBackend::new(HttpBackendConfig {
        base_url: config.backend_url.clone(),
        request_timeout: Duration::from_secs(config.request_timeout_secs),
    })
    .context("Failed to build HTTP client")?;

    Ok(MeshGateway::new(
        Arc::new(NullTransport),
        Arc::new(backend),
        repository,
        ConnectivityMonitor::with_initial(online),
        GatewayConfig::default(),
    ))
}

fn print_record(record: &PatientRecord) {
    println!("  {} {}", record.id.dimmed(), record.name.bold());
    if let Some(phone) = &record.phone {
        println!("      phone: {phone}");
    }
    if let Some(email) = &record.email {
        println!("      email: {email}");
    }
    if !record.conditions.is_empty() {
        println!("      conditions: {}", record.conditions.join(", "));
    }
    if !record.medications.is_empty() {
        println!("      medications: {}", record.medications.join(", "));
    }
    if !record.allergies.is_empty() {
        println!("      allergies: {}", record.allergies.join(", "));
    }
}

async fn run_search(config: &Config, query: &str, offline: bool) -> Result<()> {
    let repository = open_repository(config)?;
    let online = config.assume_online && !offline;
    let (gateway, mut events) = build_gateway(config, repository, online)?;

    gateway.submit_search(query).await;

    if online {
        // Wait for the direct backend path to contribute or give up
        let deadline = Duration::from_secs(config.request_timeout_secs + 1);
        let _ = tokio::time::timeout(deadline, async {
            while let Some(event) = events.recv().await {
                match event {
                    GatewayEvent::RemoteSearchResults { .. }
                    | GatewayEvent::SearchCompleted { .. } => break,
                    GatewayEvent::LocalError { message } => {
                        eprintln!("{} {message}", "error:".red());
                        break;
                    }
                    _ => {}
                }
            }
        })
        .await;
    }

    println!("{}", gateway.display_message().bold());
    for section in gateway.sections() {
        println!("{}", section.title.cyan());
        for record in &section.records {
            print_record(record);
        }
    }
    Ok(())
}

async fn run_create(config: &Config, json: &str, offline: bool) -> Result<()> {
    let repository = open_repository(config)?;
    let online = config.assume_online && !offline;
    let (gateway, mut events) = build_gateway(config, repository, online)?;

    if !online {
        println!(
            "{}",
            "Offline and no mesh transport: the request cannot be delivered".yellow()
        );
        return Ok(());
    }

    gateway.submit_create(json).await;

    let deadline = Duration::from_secs(config.request_timeout_secs + 1);
    let outcome = tokio::time::timeout(deadline, async {
        while let Some(event) = events.recv().await {
            match event {
                GatewayEvent::CreateResult { body } => return Some(body),
                GatewayEvent::CreateTimedOut => {
                    return Some("error - no response from service".to_string())
                }
                GatewayEvent::LocalError { message } => {
                    return Some(format!("error - {message}"))
                }
                _ => {}
            }
        }
        None
    })
    .await;

    match outcome {
        Ok(Some(body)) if body.starts_with("success") => {
            println!("{} {body}", "created:".green())
        }
        Ok(Some(body)) => println!("{} {body}", "failed:".red()),
        _ => println!("{}", "failed: no response from service".red()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Add {
            name,
            phone,
            email,
            conditions,
            medications,
            allergies,
        } => {
            let repository = open_repository(&config)?;
            let mut record = PatientRecord::new(name)
                .with_conditions(split_list(conditions))
                .with_medications(split_list(medications))
                .with_allergies(split_list(allergies));
            record.phone = phone;
            record.email = email;
            repository.add(&record)?;
            println!("{} {}", "added:".green(), record.id);
        }
        Commands::List => {
            let repository = open_repository(&config)?;
            let mut records = repository.list()?;
            records.sort_by(|a, b| a.name.cmp(&b.name));
            println!("{} patient(s)", records.len());
            for record in &records {
                print_record(record);
            }
        }
        Commands::Delete { id } => {
            let repository = open_repository(&config)?;
            repository.delete(&id)?;
            println!("{} {id}", "deleted:".green());
        }
        Commands::Search { query, offline } => {
            run_search(&config, &query, offline).await?;
        }
        Commands::Create { json, offline } => {
            run_create(&config, &json, offline).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::SetBackend { url } => {
                config.backend_url = url;
                config.save()?;
                println!("{}", "saved".green());
            }
            ConfigAction::SetOnline { online } => {
                config.assume_online = online;
                config.save()?;
                println!("{}", "saved".green());
            }
        },
        Commands::Status => {
            let repository = open_repository(&config)?;
            println!("backend:  {}", config.backend_url);
            println!(
                "online:   {}",
                if config.assume_online {
                    "assumed".green()
                } else {
                    "no".red()
                }
            );
            println!("store:    {}", config.storage_path()?);
            println!("patients: {}", repository.count()?);
        }
    }
    Ok(())
}
