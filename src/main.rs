//! HealthLedger: healthcare records with a ledger mirror.
//!
//! Operator entry point: node status, contract deployment and event watching.

use std::io::{BufRead, IsTerminal};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use healthledger::adapters::sanitize::SanitizingMakeWriter;
use healthledger::adapters::{AlloyLedger, FileContractStore, FileJournal, SolcCompiler, SqliteStorage};
use healthledger::application::{EventWatcher, LedgerClient};
use healthledger::config::{self, Config};
use healthledger::domain::credential::parse_signer;
use healthledger::ports::{Ledger, Storage};

type Client = LedgerClient<AlloyLedger, FileContractStore>;

enum Command {
    Status,
    Deploy(Option<std::path::PathBuf>),
    Watch,
}

fn usage() -> String {
    "Usage: healthledger <status | deploy [source.sol] | watch>\n\n\
     status   show node, contract and store state\n\
     deploy   compile and deploy the records contract (default source from config)\n\
     watch    print contract events until Enter is pressed"
        .to_string()
}

fn parse_args() -> Result<Command, String> {
    let mut args = std::env::args().skip(1);
    let command = match args.next().as_deref() {
        None | Some("status") => Command::Status,
        Some("deploy") => Command::Deploy(args.next().map(std::path::PathBuf::from)),
        Some("watch") => Command::Watch,
        Some(_) => return Err(usage()),
    };
    if args.next().is_some() {
        return Err(usage());
    }
    Ok(command)
}

fn init_logging(config: &Config) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let use_file = match config.log.mode.as_str() {
        "file" => true,
        "stdout" => false,
        // auto: keep an interactive terminal clean
        _ => std::io::stdout().is_terminal(),
    };

    let (writer, guard) = if use_file {
        if let Some(parent) = config.log.file.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log.file)
            .with_context(|| format!("Failed to open log file {}", config.log.file.display()))?;
        tracing_appender::non_blocking(file)
    } else {
        tracing_appender::non_blocking(std::io::stdout())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    Ok(guard)
}

/// Connect to the node; an unreachable node yields an offline client so
/// status still reports the off-chain side.
fn connect(config: &Config) -> Client {
    let contracts = FileContractStore::new(&config.contract.reference_path);
    let settings = config.ledger_settings();

    let connected = AlloyLedger::connect(&config.ledger.rpc_url, config.request_timeout())
        .map_err(|e| e.to_string())
        .and_then(|ledger| {
            LedgerClient::new(
                Arc::new(ledger),
                FileContractStore::new(&config.contract.reference_path),
                settings,
            )
            .map_err(|e| e.to_string())
        });

    let client = match connected {
        Ok(client) => client,
        Err(reason) => {
            tracing::warn!(endpoint = %config.ledger.rpc_url, %reason, "Ledger unavailable, on-chain features disabled");
            LedgerClient::offline(contracts, settings, reason)
        }
    };
    client.load_contract();
    client
}

fn status(config: &Config, client: &Client) -> Result<()> {
    let storage = SqliteStorage::new(&config.db_path)
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    let patients = storage.patients_page(0, 1)?.total_count;

    println!("store:    {} ({patients} patients)", config.db_path.display());
    match client.ledger() {
        Ok(ledger) => {
            let head = ledger.block_number().map_err(|e| anyhow!("{e}"))?;
            println!("node:     {} (block {head})", config.ledger.rpc_url);
        }
        Err(e) => println!("node:     offline ({e})"),
    }
    match client.contract() {
        Some(reference) => println!("contract: {}", reference.address),
        None => println!("contract: not deployed"),
    }

    let journal = FileJournal::new(&config.journal_path);
    let pending = journal.entries()?.len();
    if pending > 0 {
        println!("journal:  {pending} entries awaiting reconciliation in {}", journal.path().display());
    }
    Ok(())
}

fn deploy(config: &Config, mut client: Client, source: Option<std::path::PathBuf>) -> Result<()> {
    if let Some(key) = config::deployer_key(|k| std::env::var(k).ok())? {
        let signer = parse_signer(&key).context("Invalid deployer key")?;
        client.set_deployer(signer);
    }

    let source_path = source.unwrap_or_else(|| config.contract.source_path.clone());
    let source = std::fs::read_to_string(&source_path)
        .with_context(|| format!("Failed to read {}", source_path.display()))?;

    let mut compiler = SolcCompiler::new(&config.contract.solc_version, &config.contract.solc_dir);
    if let Some(name) = &config.contract.name {
        compiler = compiler.with_contract_name(name);
    }

    let reference = client.deploy_and_initialize(&compiler, &source)?;
    println!("Deployed contract at {}", reference.address);
    if let Some(tx) = reference.deployment_tx {
        println!("Deployment transaction {tx}");
    }
    Ok(())
}

fn watch(config: &Config, client: Client) -> Result<()> {
    let handle = EventWatcher::spawn(Arc::new(client), config.watch_settings(), |event| {
        let block = event.log.block_number.unwrap_or_default();
        let tx = event
            .log
            .tx_hash
            .map(|h| h.to_string())
            .unwrap_or_else(|| "-".to_string());
        tracing::info!(event = %event.name, block, %tx, "Contract event");
        println!("{} block={block} tx={tx}", event.name);
    })?;

    println!("Watching {} events. Press Enter to stop.", config.watch_settings().event);
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    handle.stop();
    Ok(())
}

fn main() -> Result<()> {
    let command = match parse_args() {
        Ok(command) => command,
        Err(usage) => {
            eprintln!("{usage}");
            std::process::exit(2);
        }
    };

    let config = Config::load().context("Failed to load configuration")?;
    let _guard = init_logging(&config)?;
    tracing::info!("Starting HealthLedger...");

    let client = connect(&config);
    match command {
        Command::Status => status(&config, &client)?,
        Command::Deploy(source) => deploy(&config, client, source)?,
        Command::Watch => watch(&config, client)?,
    }

    tracing::info!("HealthLedger shutdown complete.");
    Ok(())
}
