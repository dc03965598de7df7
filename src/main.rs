//! ShadowPI command-line entry point.
//!
//! `run` speaks the platform-collaborator contract: inbound moderation
//! events as JSON lines on stdin, outbound actions as JSON lines on
//! stdout. The remaining subcommands operate on the local store.

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shadowpi::actions::JsonLineSink;
use shadowpi::config::load_settings;
use shadowpi::engine::Engine;
use shadowpi::event::ModerationEvent;
use shadowpi::gate::{ActivationGate, UnlockOutcome};
use shadowpi::overrides::OverrideLedger;
use shadowpi::reputation::HttpReputationClient;
use shadowpi::roster::import_roster;
use shadowpi::store::ProfileStore;
use shadowpi::sweep::{SweepEngine, SweepMode};
use shadowpi::sync::WatchlistSync;

#[derive(Parser)]
#[command(name = "shadowpi", about = "Moderation risk-scoring and enforcement engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process events from stdin, emit actions on stdout.
    Run,
    /// Batch re-score a group's stored profiles.
    Sweep {
        #[arg(long)]
        group: i64,
        #[arg(long, default_value = "report")]
        mode: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Import a membership roster file for a group.
    ImportRoster {
        #[arg(long)]
        group: i64,
        file: std::path::PathBuf,
    },
    /// Store, replace, or clear an admin override.
    Override {
        #[command(subcommand)]
        op: OverrideOp,
    },
    /// Unlock a group's activation gate with the out-of-band secret.
    Unlock {
        #[arg(long)]
        group: i64,
        #[arg(long)]
        admin: i64,
        secret: String,
    },
    /// Re-lock a group's activation gate.
    Lock {
        #[arg(long)]
        group: i64,
        #[arg(long)]
        admin: i64,
    },
    /// Toggle the patrol flag without touching the lock.
    Patrol {
        #[arg(long)]
        group: i64,
        #[arg(long)]
        enabled: bool,
    },
    /// Flag an identity for silent discard.
    Shadowban { identity: i64 },
    /// Lift a shadowban.
    Shadowlift { identity: i64 },
    /// Run one watchlist sync now.
    Sync,
    /// Print store totals.
    Stats,
}

#[derive(Subcommand)]
enum OverrideOp {
    Allow {
        identity: i64,
        #[arg(long)]
        note: Option<String>,
        #[arg(long, default_value = "cli")]
        author: String,
    },
    Ban {
        identity: i64,
        #[arg(long)]
        note: Option<String>,
        #[arg(long, default_value = "cli")]
        author: String,
    },
    Clear { identity: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = load_settings().context("loading settings")?;
    let store = Arc::new(
        ProfileStore::open(format!("{}/db", settings.data_dir), &settings)
            .context("opening profile store")?,
    );

    match cli.command {
        Command::Run => {
            let reputation = Arc::new(HttpReputationClient::new(&settings)?);
            let sync = Arc::new(WatchlistSync::new(
                store.clone(),
                reputation.clone(),
                &settings,
            ));
            tokio::spawn(sync.run_forever());

            let sink = JsonLineSink::new(std::io::stdout());
            let engine = Engine::new(store, reputation, sink, settings);

            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = line.context("reading event line")?;
                if line.trim().is_empty() {
                    continue;
                }
                let event: ModerationEvent = match serde_json::from_str(&line) {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping malformed event line");
                        continue;
                    }
                };
                if let Err(err) = engine.process_event(&event).await {
                    // The event counts as "no action taken"; never replayed.
                    tracing::error!(
                        identity_id = event.identity_id,
                        group_id = event.group_id,
                        error = %err,
                        "event processing failed"
                    );
                }
            }
        }
        Command::Sweep { group, mode, limit } => {
            let mode: SweepMode = mode.parse()?;
            let sweeper = SweepEngine::new(store, settings);
            let sink = JsonLineSink::new(std::io::stdout());
            let report = sweeper.run(group, mode, limit, &sink).await?;
            eprintln!("{}", report.as_text());
        }
        Command::ImportRoster { group, file } => {
            let body = std::fs::read_to_string(&file)
                .with_context(|| format!("reading roster file {}", file.display()))?;
            let summary = import_roster(&store, group, &body).await?;
            println!(
                "Imported {} members, skipped {} lines.",
                summary.imported, summary.skipped
            );
            for line in &summary.skipped_lines {
                println!("  skipped: {line}");
            }
        }
        Command::Override { op } => {
            let ledger = OverrideLedger::new(&store);
            match op {
                OverrideOp::Allow { identity, note, author } => {
                    ledger.allow(identity, note.as_deref(), &author).await?;
                    println!("Override stored for {identity}: allow");
                }
                OverrideOp::Ban { identity, note, author } => {
                    ledger.force_ban(identity, note.as_deref(), &author).await?;
                    println!("Override stored for {identity}: force-ban");
                }
                OverrideOp::Clear { identity } => {
                    let existed = ledger.clear(identity).await?;
                    println!(
                        "{}",
                        if existed {
                            format!("Cleared override for {identity}.")
                        } else {
                            format!("No override for {identity}.")
                        }
                    );
                }
            }
        }
        Command::Unlock { group, admin, secret } => {
            let gate = ActivationGate::new(&settings);
            let outcome = gate.try_unlock(&store, group, admin, &secret).await?;
            match outcome {
                UnlockOutcome::Unlocked => println!("Group {group} unlocked."),
                UnlockOutcome::AlreadyUnlocked => println!("Group {group} was already unlocked."),
                UnlockOutcome::Denied => println!("Denied."),
            }
        }
        Command::Lock { group, admin } => {
            let gate = ActivationGate::new(&settings);
            gate.lock(&store, group, admin)?;
            println!("Group {group} locked.");
        }
        Command::Patrol { group, enabled } => {
            let gate = ActivationGate::new(&settings);
            gate.set_patrol(&store, group, enabled)?;
            println!(
                "Patrol {} for group {group}.",
                if enabled { "enabled" } else { "stood down" }
            );
        }
        Command::Shadowban { identity } => {
            store.set_shadowban(identity, true).await?;
            println!("Shadowbanned {identity}. Future contributions are discarded.");
        }
        Command::Shadowlift { identity } => {
            store.set_shadowban(identity, false).await?;
            println!("Shadowban lifted for {identity}.");
        }
        Command::Sync => {
            let reputation = Arc::new(HttpReputationClient::new(&settings)?);
            let sync = WatchlistSync::new(store, reputation, &settings);
            let outcome = sync.run_once().await?;
            println!("Sync outcome: {outcome:?}");
        }
        Command::Stats => {
            let summary = store.counts_summary()?;
            println!("Identities observed: {}", summary.total_identities);
            println!("Messages processed: {}", summary.total_messages);
            println!("Warnings issued:    {}", summary.total_warnings);
            println!("Deletions recorded: {}", summary.total_deletions);
            println!("Shadowbanned:       {}", summary.shadowbanned);
            println!("Watchlist size:     {}", summary.watchlist_size);
        }
    }

    Ok(())
}
