use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use opsync_core::config::Config;
use opsync_core::core_crypto::{decrypt, encrypt};
use opsync_core::core_oplog::apply::{EntityReducer, LwwResolver, ReducerChain, StateContainer};
use opsync_core::core_oplog::clock::VectorClockTracker;
use opsync_core::core_oplog::store::{OperationLogEntry, OperationLogStore};
use opsync_core::logging::{init_logging_with_config, LogConfig};
use opsync_core::metrics::init_metrics;
use opsync_core::AppState;
use secrecy::{ExposeSecret, SecretString};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "opsync")]
#[command(author, version, about = "Inspect and maintain an opsync operation log", long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file; environment variables are used otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Operation log directory, overrides the configuration
    #[arg(short, long)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt text (or stdin) into a payload blob
    Encrypt {
        /// Password; falls back to OPSYNC_PASSWORD
        #[arg(short, long)]
        password: Option<String>,
        text: Option<String>,
    },
    /// Decrypt a payload blob (or stdin), modern or legacy format
    Decrypt {
        /// Password; falls back to OPSYNC_PASSWORD
        #[arg(short, long)]
        password: Option<String>,
        blob: Option<String>,
    },
    /// Operation log maintenance
    Log {
        #[command(subcommand)]
        command: LogCommand,
    },
    /// Print the persisted vector clock
    Clock,
}

#[derive(Subcommand, Debug)]
enum LogCommand {
    /// List logged operations
    List {
        /// Only local operations waiting for upload
        #[arg(long)]
        unsynced: bool,
        /// Only entries after this sequence
        #[arg(long, default_value_t = 0)]
        after: u64,
    },
    /// Rebuild state from the state cache and the log, print it as JSON
    Replay,
    /// Rebuild state, write a state cache and drop finished operations
    Compact {
        /// Ignore the configured compaction threshold
        #[arg(long)]
        force: bool,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env().context("loading config from environment")?,
    };
    if let Some(dir) = &args.data_dir {
        config.store.data_dir = PathBuf::from(dir);
    }
    let expanded = shellexpand::tilde(&config.store.data_dir.to_string_lossy()).into_owned();
    config.store.data_dir = PathBuf::from(expanded);
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    Ok(config)
}

fn log_config(config: &Config) -> Result<LogConfig> {
    LogConfig::try_from(&config.logging)
        .with_context(|| format!("invalid log level '{}'", config.logging.level))
}

fn password(arg: Option<String>) -> Result<SecretString> {
    match arg.or_else(|| std::env::var("OPSYNC_PASSWORD").ok()) {
        Some(pw) if !pw.is_empty() => Ok(SecretString::new(pw)),
        _ => bail!("no password given, use --password or OPSYNC_PASSWORD"),
    }
}

fn input(arg: Option<String>) -> Result<String> {
    match arg {
        Some(text) => Ok(text),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
            Ok(buf.trim_end_matches('\n').to_string())
        }
    }
}

fn open_store(config: &Config) -> Result<Arc<OperationLogStore>> {
    let dir = &config.store.data_dir;
    let store = OperationLogStore::open(dir)
        .with_context(|| format!("opening operation log in {}", dir.display()))?;
    Ok(Arc::new(store))
}

/// State container without capture; nothing here creates operations
fn restore(config: &Config, store: &OperationLogStore) -> Result<StateContainer> {
    let chain = ReducerChain::new(EntityReducer).layer(LwwResolver);
    let container = StateContainer::new(AppState::new(), chain)
        .with_aliases(store.aliases().clone())
        .with_max_hydration_batch(config.store.max_hydration_batch);
    container.restore_from_log(store)?;
    Ok(container)
}

fn print_entry(entry: &OperationLogEntry) {
    let status = if entry.rejected_at.is_some() {
        "rejected"
    } else if entry.is_pending_upload() {
        "pending"
    } else if entry.is_pending_apply() {
        "unapplied"
    } else {
        "done"
    };
    println!(
        "{:>6}  {}  {:<11} {:<16} {:<24} {:?}  {}",
        entry.seq,
        entry.op.id,
        entry.op.op_type.as_str(),
        entry.op.entity_type.as_str(),
        entry.op.entity_id.as_deref().unwrap_or("-"),
        entry.source,
        status
    );
}

fn run_log(config: &Config, command: LogCommand) -> Result<()> {
    let store = open_store(config)?;
    match command {
        LogCommand::List { unsynced, after } => {
            let entries = if unsynced {
                store.get_unsynced()?.into_iter().filter(|e| e.seq > after).collect()
            } else {
                store.get_ops_after_seq(after)?
            };
            for entry in &entries {
                print_entry(entry);
            }
            info!(count = entries.len(), "Listed operations");
        }
        LogCommand::Replay => {
            let container = restore(config, &store)?;
            let state = container.state()?;
            println!("{}", serde_json::to_string_pretty(state.as_ref())?);
        }
        LogCommand::Compact { force } => {
            if !force && !store.needs_compaction(config.store.compaction_threshold)? {
                println!(
                    "{} operations since last compaction, threshold is {}",
                    store.ops_since_compaction()?,
                    config.store.compaction_threshold
                );
                return Ok(());
            }
            let container = restore(config, &store)?;
            let tracker = VectorClockTracker::new(store.clone())?;
            let state = container.state()?;
            let stats = store.compact(
                state.as_ref(),
                &tracker.current_clock()?,
                config.store.compaction_retention,
            )?;
            println!(
                "removed {} operations, kept {}, state cached at seq {}",
                stats.removed, stats.retained, stats.cache_seq
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging_with_config(log_config(&config)?)?;
    init_metrics();

    match args.command {
        Command::Encrypt { password: pw, text } => {
            let pw = password(pw)?;
            let plaintext = input(text)?;
            let blob = tokio::task::spawn_blocking(move || encrypt(&plaintext, pw.expose_secret()))
                .await??;
            println!("{}", blob);
        }
        Command::Decrypt { password: pw, blob } => {
            let pw = password(pw)?;
            let blob = input(blob)?;
            let plaintext = tokio::task::spawn_blocking(move || decrypt(blob.trim(), pw.expose_secret()))
                .await??;
            println!("{}", plaintext);
        }
        Command::Log { command } => run_log(&config, command)?,
        Command::Clock => {
            let store = open_store(&config)?;
            let tracker = VectorClockTracker::new(store)?;
            println!("{}", serde_json::to_string_pretty(&tracker.current_clock()?)?);
        }
    }

    Ok(())
}
