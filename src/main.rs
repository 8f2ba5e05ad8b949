use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use appstate::state::{AppStateReader, FixtureProvider};
use appstate::store::{last_known_state, JsonFileStore, LastKnownStateRecorder};
use appstate::{trigger_channel, DeliveryPolicy, ObserverConfig, StateChangeObservable, Trigger};

#[derive(Parser)]
#[command(name = "appstate", about = "Infer and watch an application's foreground/background state")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the current state inferred from a snapshot file
    Infer {
        /// Package/bundle id of the application; defaults to the snapshot's `self_owner_id`
        #[arg(long)]
        owner: Option<String>,
        /// JSON snapshot of tasks and processes
        #[arg(long)]
        snapshot: PathBuf,
    },
    /// Read lifecycle triggers from stdin and print a state per notification
    Watch {
        /// Package/bundle id of the application; defaults to the snapshot's `self_owner_id`
        #[arg(long)]
        owner: Option<String>,
        /// JSON snapshot, re-read on every trigger
        #[arg(long)]
        snapshot: PathBuf,
        /// Only print when the state differs from the previous notification
        #[arg(long)]
        changes_only: bool,
        /// Where to cache the last known state
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Print the last state recorded by `watch`
    Last {
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries results
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match Cli::parse().command {
        Command::Infer { owner, snapshot } => {
            let provider = FixtureProvider::new(snapshot);
            let owner = resolve_owner(owner, &provider)?;
            let reader = AppStateReader::new(provider, owner);
            println!("{}", reader.current_state());
            Ok(())
        }
        Command::Watch {
            owner,
            snapshot,
            changes_only,
            store,
        } => watch(owner, snapshot, changes_only, store).await,
        Command::Last { store } => {
            let path = store.unwrap_or_else(JsonFileStore::default_path);
            let store = JsonFileStore::open(&path)
                .with_context(|| format!("Failed to open store {}", path.display()))?;
            println!("{}", last_known_state(&store));
            Ok(())
        }
    }
}

/// Explicit `--owner` wins; otherwise use the id recorded in the snapshot
fn resolve_owner(owner: Option<String>, provider: &FixtureProvider) -> Result<String> {
    match owner {
        Some(owner) => Ok(owner),
        None => provider.owner_id().with_context(|| {
            format!(
                "No --owner given and no self_owner_id readable from {}",
                provider.path().display()
            )
        }),
    }
}

async fn watch(
    owner: Option<String>,
    snapshot: PathBuf,
    changes_only: bool,
    store: Option<PathBuf>,
) -> Result<()> {
    let policy = if changes_only {
        DeliveryPolicy::ChangesOnly
    } else {
        DeliveryPolicy::EveryTrigger
    };
    let provider = FixtureProvider::new(snapshot);
    let owner = resolve_owner(owner, &provider)?;
    let observable = StateChangeObservable::new(
        provider,
        ObserverConfig::new(owner).with_policy(policy),
    );

    let store_path = store.unwrap_or_else(JsonFileStore::default_path);
    let store = JsonFileStore::open(&store_path)
        .with_context(|| format!("Failed to open store {}", store_path.display()))?;
    let _recorder = observable.subscribe(LastKnownStateRecorder::new(store));

    let notifications = Arc::new(AtomicU64::new(0));
    let counter = notifications.clone();
    let _printer = observable.subscribe_fn(move |state| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        println!("{} {}", n, state);
        Ok(())
    });

    // Spawn stdin reader feeding the trigger channel
    let (tx, rx) = trigger_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    if tx.send(Trigger::parse(&line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "failed to read trigger from stdin");
                    break;
                }
            }
        }
    });

    observable.run(rx).await;
    tracing::info!(
        notifications = notifications.load(Ordering::SeqCst),
        "trigger source closed"
    );
    Ok(())
}
