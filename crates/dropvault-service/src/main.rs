use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use dropvault_core::engine::{assemble, VaultEngine};
use dropvault_core::models::normalize_ip;
use dropvault_core::registry::PageQuery;
use dropvault_core::sweep::spawn_sweep_loop;
use dropvault_core::VaultConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Dropvault file vault service", long_about = None)]
struct Cli {
    /// Override the data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the data directory and initialize the database
    Init,
    /// Run the vault daemon with the periodic expiry sweep
    Run,
    /// Run a single expiry sweep and exit
    Sweep,
    /// List entries (admin)
    List {
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long)]
        search: Option<String>,
    },
    /// Block an uploader IP, optionally purging its entries (admin)
    BlockIp {
        ip: String,
        #[arg(long)]
        purge: bool,
    },
    /// Remove IPs from the block list (admin)
    UnblockIp { ips: Vec<String> },
    /// Show the block list (admin)
    BlockedIps,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dropvault=info".parse().expect("static filter")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.data_dir)?;

    match cli.command {
        Commands::Init => init_command(&config).await,
        Commands::Run => run_command(&config).await,
        Commands::Sweep => {
            let engine = build_engine(&config).await?;
            let removed = engine.sweep_expired().await?;
            println!("removed {removed} expired entries");
            Ok(())
        }
        Commands::List { offset, limit, search } => {
            let engine = build_engine(&config).await?;
            list_command(&engine, offset, limit, search).await
        }
        Commands::BlockIp { ip, purge } => {
            let engine = build_engine(&config).await?;
            let ip = normalize_ip(&ip);
            let purged = engine.block_ip(&ip, purge).await?;
            println!("blocked {ip} ({purged} entries purged)");
            Ok(())
        }
        Commands::UnblockIp { ips } => {
            let engine = build_engine(&config).await?;
            let ips: Vec<String> = ips.iter().map(|ip| normalize_ip(ip)).collect();
            if engine.unblock_ips(&ips).await? {
                println!("unblocked {} ips", ips.len());
                Ok(())
            } else {
                Err(anyhow!("unable to remove the selected ips"))
            }
        }
        Commands::BlockedIps => {
            let engine = build_engine(&config).await?;
            for row in engine.blocked_ips().await? {
                println!(
                    "{}\tblocked_at={}\tpurged={}",
                    row.ip,
                    row.blocked_at.to_rfc3339(),
                    row.purged
                );
            }
            Ok(())
        }
    }
}

fn load_config(data_dir_override: Option<PathBuf>) -> Result<VaultConfig> {
    let data_dir = match data_dir_override {
        Some(dir) => dir,
        None => ProjectDirs::from("com", "dropvault", "dropvault")
            .ok_or_else(|| anyhow!("cannot determine data directory"))?
            .data_dir()
            .to_path_buf(),
    };
    // configuration problems abort here, before anything is wired
    let config = VaultConfig::from_env(data_dir)?;
    Ok(config)
}

async fn build_engine(config: &VaultConfig) -> Result<Arc<VaultEngine>> {
    std::fs::create_dir_all(&config.data_dir)?;
    Ok(Arc::new(assemble(config).await?))
}

async fn init_command(config: &VaultConfig) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(config.files_dir())?;
    let _ = build_engine(config).await?;
    println!("vault initialized at {}", config.data_dir.display());
    if config.salt.is_none() {
        println!("note: DROPVAULT_SALT is unset, at-rest encryption is disabled");
    }
    if config.clamscan_path.is_none() {
        println!("note: DROPVAULT_CLAMSCAN is unset, the scan gate is disabled");
    }
    Ok(())
}

async fn run_command(config: &VaultConfig) -> Result<()> {
    let engine = build_engine(config).await?;
    info!(
        data_dir = %config.data_dir.display(),
        scan_gate = config.clamscan_path.is_some(),
        encryption = config.salt.is_some(),
        "dropvault service starting"
    );

    let (sweep_task, sweep_shutdown) = spawn_sweep_loop(
        engine,
        Duration::from_secs(config.sweep_interval_secs),
    );

    signal::ctrl_c().await?;
    info!("service stopping");
    let _ = sweep_shutdown.send(true);
    sweep_task.abort();
    Ok(())
}

async fn list_command(
    engine: &VaultEngine,
    offset: u32,
    limit: u32,
    search: Option<String>,
) -> Result<()> {
    let total = engine.entry_count(search.as_deref()).await?;
    let query = PageQuery {
        offset,
        limit,
        search,
        ..Default::default()
    };
    for entry in engine.list_paged(&query).await? {
        println!(
            "{}\t{}\t{}\t{}B\t{}\texpires={}\t{}",
            entry.token,
            entry.source_kind.as_str(),
            entry.uploader_ip,
            entry.size_bytes,
            entry.protection.as_str(),
            entry
                .expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".into()),
            entry.file_name.as_deref().unwrap_or("-"),
        );
    }
    println!("{total} entries total");
    Ok(())
}
