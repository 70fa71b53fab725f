//! linkloom CLI: thin wrapper over linkloom-core.
//!
//! The `demo` subcommand runs the full engine end to end against the
//! in-process store: two independent sync loops ("tabs") observing the same
//! session converge on every mutation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use linkloom_core::config::CoreConfig;
use linkloom_core::logging::init_logging;
use linkloom_core::memory_store::MemoryStore;
use linkloom_core::runner;
use linkloom_core::session::SessionTracker;
use linkloom_core::store::{AuthProvider, RecordStore};
use linkloom_core::sync::{SyncPhase, SyncSnapshot};

#[derive(Parser)]
#[command(name = "linkloom", version, about = "Session-aware live sync for private link collections")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the two-tab live-sync demo against the in-process store.
    Demo,
    /// Print version information.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CoreConfig::load(path).context("loading config")?,
        None => CoreConfig::default(),
    };
    init_logging(&config.log).context("initializing logging")?;

    match cli.command {
        Command::Demo => demo(&config).await,
        Command::Version => {
            println!("linkloom {}", linkloom_core::VERSION);
            Ok(())
        }
    }
}

fn print_tab(name: &str, snapshot: &SyncSnapshot) {
    println!("[{name}] phase={:?} records={}", snapshot.phase, snapshot.records.len());
    for record in &snapshot.records {
        println!("  {}  {}  {}", record.id, record.title, record.target);
    }
}

async fn demo(config: &CoreConfig) -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.register_user(&config.provider, "u-demo", "demo@example.com");

    let auth: Arc<dyn AuthProvider> = Arc::new(store.clone());
    let records: Arc<dyn RecordStore> = Arc::new(store.clone());

    let tracker = SessionTracker::start(auth);
    let (tab_a, _task_a) = runner::spawn(Arc::clone(&records), tracker.watch_identity(), config);
    let (tab_b, _task_b) = runner::spawn(Arc::clone(&records), tracker.watch_identity(), config);

    info!(provider = %config.provider, "signing in");
    tracker.begin_sign_in(&config.provider).await?;
    tab_a.wait_for(|s| s.phase == SyncPhase::Ready).await?;
    tab_b.wait_for(|s| s.phase == SyncPhase::Ready).await?;

    info!("creating a link in tab A");
    tab_a.create("Example", "https://example.com").await?;
    tab_a.wait_for(|s| s.records.len() == 1).await?;
    tab_b.wait_for(|s| s.records.len() == 1).await?;
    print_tab("A", &tab_a.snapshot());
    print_tab("B", &tab_b.snapshot());

    info!("removing it from tab B");
    let id = tab_b.snapshot().records[0].id.clone();
    tab_b.remove(id).await?;
    tab_a.wait_for(|s| s.records.is_empty()).await?;
    tab_b.wait_for(|s| s.records.is_empty()).await?;
    print_tab("A", &tab_a.snapshot());
    print_tab("B", &tab_b.snapshot());

    info!("signing out");
    tracker.sign_out().await?;
    tab_a.wait_for(|s| s.phase == SyncPhase::NoIdentity).await?;
    tab_b.wait_for(|s| s.phase == SyncPhase::NoIdentity).await?;

    println!("demo complete: both tabs converged on every step");
    Ok(())
}
