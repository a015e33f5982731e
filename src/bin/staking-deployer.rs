// Staking Deployer CLI
//
// Resolves, plans and deploys the staking contract cluster described by a
// JSON configuration file.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use common::utils::display_address;
use dotenv::dotenv;
use log::{error, info, warn};
use staking_deployer::config::PRIVATE_KEY_ENV;
use staking_deployer::transport::{EthereumConnector, HttpBootstrap, MemoryTransport};
use staking_deployer::{
    AddressResolver, AddressSource, ConfigManager, Credential, DeployConfig, DeployError, DeploymentReport,
    DeploymentRun, Transport,
};
use std::path::{Path, PathBuf};

/// Staking Deployer - dependency-ordered deployment of the staking contracts
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy missing roles and wire them together
    Deploy {
        /// Path to configuration file
        #[clap(short, long)]
        config: PathBuf,

        /// Rehearse the plan on an in-memory chain instead of sending it
        #[clap(long)]
        dry_run: bool,

        /// Write a JSON report of the run
        #[clap(short, long)]
        report: Option<PathBuf>,
    },

    /// Print the addresses of the deployed cluster
    Resolve {
        /// Path to configuration file
        #[clap(short, long)]
        config: PathBuf,
    },

    /// Print the steps a deployment would take
    Plan {
        /// Path to configuration file
        #[clap(short, long)]
        config: PathBuf,
    },

    /// Print a saved deployment report
    Report {
        /// Report written by `deploy --report`
        #[clap(short, long)]
        input: PathBuf,

        /// Output format (text, json)
        #[clap(short, long, default_value = "text")]
        format: String,
    },

    /// Generate a default configuration file
    Config {
        /// Output file path
        #[clap(short, long)]
        output: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy {
            config,
            dry_run,
            report,
        } => deploy(&config, dry_run, report.as_deref()).await,
        Commands::Resolve { config } => resolve(&config).await,
        Commands::Plan { config } => plan(&config).await,
        Commands::Report { input, format } => show_report(&input, &format),
        Commands::Config { output } => {
            ConfigManager::save_to_file(&DeployConfig::default(), &output)
                .context("Failed to save configuration")?;
            println!("Default configuration saved to {:?}", output);
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<DeployConfig> {
    ConfigManager::load_from_file(path).context("Failed to load configuration")
}

/// Connect to the node only when something will actually be read from or
/// sent to it
async fn connect_if(needed: bool, config: &DeployConfig) -> Result<Option<EthereumConnector>> {
    if !needed {
        return Ok(None);
    }
    let connector = EthereumConnector::connect(&config.network)
        .await
        .with_context(|| format!("Failed to connect to {}", config.network.rpc_url))?;
    info!("connected to chain {}", connector.chain_id());
    Ok(Some(connector))
}

async fn deploy(config_path: &Path, dry_run: bool, report_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let registry = config.load_registry().context("Failed to load contract artifacts")?;
    let bootstrap = HttpBootstrap::new(&config.bootstrap.url)?;

    let resolving = config.address_source == AddressSource::Resolve;
    let connector = connect_if(!dry_run || resolving, &config).await?;
    let memory = MemoryTransport::new();

    let reader: &dyn Transport = match &connector {
        Some(connector) => connector,
        None => &memory,
    };
    let writer: &dyn Transport = if dry_run { &memory } else { reader };

    let credential = match Credential::from_env(PRIVATE_KEY_ENV) {
        Ok(credential) => credential,
        Err(err) if dry_run => {
            warn!("{}; rehearsing with a throwaway key", err);
            Credential::ephemeral()
        }
        Err(err) => return Err(err).context("No deployer credential"),
    };
    info!("deploying from {}", display_address(&credential.address()));

    let chain_id = connector.as_ref().map(EthereumConnector::chain_id);
    let mut run = DeploymentRun::new(&config, &registry, &bootstrap, reader, writer);

    match run.run(&credential).await {
        Ok(outcome) => {
            if outcome.plan.is_empty() {
                println!("Nothing to do: every desired role is deployed");
            }
            for (role, address) in outcome.new_addresses() {
                println!("{}: {}", role, display_address(&address));
            }
            if let Some(path) = report_path {
                DeploymentReport::completed(&outcome, chain_id, dry_run)
                    .save_to_file(path)
                    .context("Failed to save report")?;
                println!("Report saved to {:?}", path);
            }
            Ok(())
        }
        Err(DeployError::Execution(err)) => {
            error!("deployment halted at step {}: {}", err.step, err.cause);
            println!("Failed at step {} ({} {})", err.step, err.kind, err.role);
            if let Some(logic) = err.cause.orphaned_logic() {
                println!("Logic contract left without a proxy: {}", display_address(&logic));
            }
            println!("Addresses so far:");
            for (role, address) in err.addresses.iter() {
                println!("{}: {}", role, display_address(&address));
            }

            if let Some(path) = report_path {
                let report = DeploymentReport::halted(
                    &err,
                    run.initial().cloned().unwrap_or_default(),
                    run.plan().cloned().unwrap_or_default(),
                    chain_id,
                    dry_run,
                );
                report.save_to_file(path).context("Failed to save report")?;
                println!("Report saved to {:?}", path);
            }
            Err(anyhow!("deployment failed at step {}: {}", err.step, err.cause))
        }
        Err(err) => Err(err).context(format!("Run failed while {}", run.state())),
    }
}

fn show_report(path: &Path, format: &str) -> Result<()> {
    let report = DeploymentReport::load_from_file(path).context("Failed to load report")?;
    match format {
        "json" => println!("{}", report.to_json()?),
        "text" => print!("{}", report.to_text()),
        other => return Err(anyhow!("unsupported format: {}", other)),
    }
    Ok(())
}

async fn resolve(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let connector = connect_if(true, &config)
        .await?
        .ok_or_else(|| anyhow!("no node connection"))?;
    let bootstrap = HttpBootstrap::new(&config.bootstrap.url)?;

    let addresses = AddressResolver::new(&bootstrap, &connector)
        .with_field(config.bootstrap.field.clone())
        .resolve_with_retry(&config.retry)
        .await
        .context("Failed to resolve addresses")?;

    for (role, address) in addresses.iter() {
        println!("{}: {}", role, display_address(&address));
    }
    Ok(())
}

async fn plan(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let registry = config.load_registry().context("Failed to load contract artifacts")?;
    let bootstrap = HttpBootstrap::new(&config.bootstrap.url)?;

    let connector = connect_if(config.address_source == AddressSource::Resolve, &config).await?;
    let memory = MemoryTransport::new();
    let reader: &dyn Transport = match &connector {
        Some(connector) => connector,
        None => &memory,
    };

    let mut run = DeploymentRun::new(&config, &registry, &bootstrap, reader, &memory);
    let (initial, plan) = run.plan_only().await.context("Failed to plan deployment")?;

    println!("Starting from: {}", initial);
    if plan.is_empty() {
        println!("Nothing to do");
    }
    for (index, step) in plan.iter().enumerate() {
        println!("{:>3}. {}", index + 1, step);
    }
    Ok(())
}
