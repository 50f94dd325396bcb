// =============================================================================
// propwatch — real-time compliance monitor for prop-firm trading accounts
// =============================================================================
//
// Subcommands:
//   monitor      run the supervisor over the configured account set
//   review       run the stateless compliance review API
//   rules show   print the resolved Rules and their source for a firm/program
//
// Exit codes: 0 clean shutdown, 1 configuration error, 2 unrecoverable
// runtime error.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod anchor;
mod api;
mod config;
mod errors;
mod evaluator;
mod monitor;
mod notify;
mod platform;
mod presets;
mod resolver;
mod rules;
mod snapshot;
mod store;
mod supervisor;
mod taxonomy;
mod types;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::rest::{router, ApiState};
use crate::config::MonitorConfig;
use crate::errors::{ConfigError, ResolveError};
use crate::notify::{Notifier, NotifySink, TerminalSink, DEFAULT_QUEUE_CAPACITY};
use crate::presets::PresetRegistry;
use crate::resolver::{Resolver, RuleStore};
use crate::store::SqliteRuleStore;
use crate::supervisor::Supervisor;
use crate::taxonomy::ProgramTaxonomy;

#[derive(Parser)]
#[command(name = "propwatch", version, about = "Prop-firm compliance monitor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor over the configured account set.
    Monitor {
        /// JSON config file; omit to use the PROPWATCH_ACCOUNT_* environment
        /// form for a single account.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Also serve the review API and health endpoint on this address.
        #[arg(long, value_name = "ADDR")]
        serve: Option<String>,
    },

    /// Run the stateless compliance review API.
    Review {
        #[arg(long, default_value = "0.0.0.0:8470")]
        bind: String,
    },

    /// Inspect resolved rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
}

#[derive(Subcommand)]
enum RulesCommand {
    /// Print the resolved Rules and their source tag.
    Show {
        #[arg(long)]
        firm: String,

        #[arg(long)]
        program: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = format!("{e:#}"), "fatal");
            if e.downcast_ref::<ConfigError>().is_some()
                || e.downcast_ref::<ResolveError>().is_some()
            {
                ExitCode::from(1)
            } else {
                ExitCode::from(2)
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Monitor { config, serve } => run_monitor(config, serve).await,
        Command::Review { bind } => run_review_api(bind).await,
        Command::Rules {
            command: RulesCommand::Show { firm, program },
        } => run_rules_show(firm, program).await,
    }
}

/// Connect the rule store when a URL is configured. Fail-soft: a store that
/// cannot be reached only disables the database tier.
async fn connect_store(url: Option<&str>) -> Option<Arc<dyn RuleStore>> {
    let url = url
        .map(str::to_string)
        .or_else(|| std::env::var("PROPWATCH_RULE_STORE_URL").ok())?;

    match SqliteRuleStore::connect(&url).await {
        Ok(store) => Some(Arc::new(store) as Arc<dyn RuleStore>),
        Err(e) => {
            warn!(url, error = %e, "rule store unavailable — database tier disabled");
            None
        }
    }
}

fn build_resolver(store: Option<Arc<dyn RuleStore>>) -> Arc<Resolver> {
    Arc::new(Resolver::new(
        store,
        Arc::new(PresetRegistry::builtin()),
        Arc::new(ProgramTaxonomy::builtin()),
    ))
}

async fn run_monitor(config_path: Option<PathBuf>, serve: Option<String>) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::from_env()?,
    };

    info!("╔══════════════════════════════════════════════════╗");
    info!("║        propwatch — compliance monitor            ║");
    info!("╚══════════════════════════════════════════════════╝");

    let store = connect_store(config.rule_store_url.as_deref()).await;
    let resolver = build_resolver(store);

    let sinks: Vec<Arc<dyn NotifySink>> = vec![Arc::new(TerminalSink)];
    let (notifier, drain) = Notifier::start(sinks, DEFAULT_QUEUE_CAPACITY);

    let supervisor = Supervisor::start(&config, resolver.clone(), notifier.clone()).await;

    // Combined mode: health + review next to the monitors.
    let server = match serve {
        Some(addr) => {
            let state = Arc::new(ApiState {
                resolver,
                status: Some(supervisor.status_view()),
            });
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("cannot bind API server on {addr}"))?;
            info!(addr = %addr, "review API listening (combined mode)");
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, router(state)).await {
                    error!(error = %e, "API server failed");
                }
            }))
        }
        None => None,
    };

    info!("monitors running — press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    warn!("shutdown signal received");

    supervisor.shutdown().await;
    if let Some(server) = server {
        server.abort();
    }
    drain.abort();

    let dropped = notifier.dropped_count();
    if dropped > 0 {
        warn!(dropped, "notification dispatches were dropped during this run");
    }

    info!("propwatch shut down cleanly");
    Ok(())
}

async fn run_review_api(bind: String) -> anyhow::Result<()> {
    let store = connect_store(None).await;
    let resolver = build_resolver(store);

    let state = Arc::new(ApiState {
        resolver,
        status: None,
    });

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("cannot bind review API on {bind}"))?;
    info!(addr = %bind, "review API listening");

    tokio::select! {
        result = axum::serve(listener, router(state)) => {
            result.context("review API server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received");
        }
    }

    Ok(())
}

async fn run_rules_show(firm: String, program: Option<String>) -> anyhow::Result<()> {
    let store = connect_store(None).await;
    let resolver = build_resolver(store);

    let (rules, source) = resolver.resolve(&firm, program.as_deref(), None).await?;

    println!("# source: {source}");
    if let Some(program) = &program {
        let taxonomy = ProgramTaxonomy::builtin();
        let canonical = taxonomy.canonical_program_id(&firm, program);
        if let Some(display) = taxonomy.display_name(&firm, &canonical) {
            println!("# program: {canonical} ({display})");
        }
    }
    println!("{}", serde_json::to_string_pretty(&rules)?);
    Ok(())
}
