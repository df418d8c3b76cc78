use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

mod config;
mod db;
mod error;
mod models;
mod notify;
mod scheduler;
mod sources;

use config::Config;
use db::Repository;
use error::{AppError, Result};
use models::NewWatch;
use notify::{LogNotifier, Notifier};
use scheduler::Scheduler;
use sources::{Aggregator, SourceRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let config = Config::load()?;
    let repo = Arc::new(Repository::new(&config.db_path).await?);
    let registry = build_registry();

    match args.get(1).map(String::as_str) {
        Some("--add") => {
            let terms = args
                .get(2)
                .ok_or_else(|| AppError::Config("--add requires search terms".to_string()))?;
            let strict = args.iter().any(|a| a == "--strict");
            add_watch(&repo, &registry, terms, strict).await?;
        }
        Some("--list") => list_watches(&repo).await?,
        Some("--ack") => {
            let id = parse_id(&args)?;
            repo.acknowledge(id).await?;
            println!("Acknowledged watch {id}");
        }
        Some("--pause") => {
            let id = parse_id(&args)?;
            repo.set_watch_active(id, false).await?;
            println!("Paused watch {id}");
        }
        Some("--resume") => {
            let id = parse_id(&args)?;
            repo.set_watch_active(id, true).await?;
            println!("Resumed watch {id}");
        }
        Some("--remove") => {
            let id = parse_id(&args)?;
            repo.delete_watch(id).await?;
            println!("Removed watch {id}");
        }
        Some("--run-once") => {
            build_scheduler(&config, repo, registry).run_once().await?;
        }
        Some("--help") | Some("-h") => usage(),
        Some(other) => {
            eprintln!("Unknown argument: {other}");
            usage();
        }
        None => {
            if registry.is_empty() {
                tracing::warn!("No marketplace adapters registered; runs will find nothing");
            }
            tracing::info!(
                "Watching every {} minutes",
                config.refresh_interval_minutes
            );
            build_scheduler(&config, repo, registry).run().await?;
        }
    }

    Ok(())
}

/// Marketplace adapters plug in here. Scraping lives behind the
/// SourceAdapter trait, one implementation per site.
fn build_registry() -> SourceRegistry {
    SourceRegistry::new()
}

fn build_scheduler(config: &Config, repo: Arc<Repository>, registry: SourceRegistry) -> Scheduler {
    let aggregator = Arc::new(Aggregator::new(
        registry,
        Duration::from_secs(config.source_timeout_secs as u64),
    ));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    Scheduler::new(
        repo,
        aggregator,
        notifier,
        Duration::from_secs(config.refresh_interval_minutes as u64 * 60),
        config.max_concurrent_watches,
    )
}

async fn add_watch(
    repo: &Repository,
    registry: &SourceRegistry,
    terms: &str,
    strict: bool,
) -> Result<()> {
    let terms: Vec<String> = terms
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return Err(AppError::Config("a watch needs at least one term".to_string()));
    }

    let enabled_sites: HashMap<String, bool> =
        registry.names().into_iter().map(|name| (name, true)).collect();

    let id = repo
        .insert_watch(NewWatch {
            terms: terms.clone(),
            strict,
            enabled_sites,
        })
        .await?;
    println!("Added watch {id}: {}", terms.join(", "));
    Ok(())
}

async fn list_watches(repo: &Repository) -> Result<()> {
    let watches = repo.get_all_watches().await?;
    if watches.is_empty() {
        println!("No watches. Add one with --add \"term1,term2\"");
        return Ok(());
    }
    for watch in watches {
        let meta = repo.get_meta(watch.id).await?;
        let state = if watch.active { "active" } else { "paused" };
        let last_run = watch
            .last_run
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:>4}  {:<30}  {}  {} new / {} total  last run {}",
            watch.id,
            watch.terms.join(", "),
            state,
            meta.new_count,
            meta.total_count,
            last_run,
        );
    }
    Ok(())
}

fn parse_id(args: &[String]) -> Result<i64> {
    let raw = args
        .get(2)
        .ok_or_else(|| AppError::Config("missing watch id".to_string()))?;
    raw.parse()
        .map_err(|_| AppError::Config(format!("invalid watch id: {raw}")))
}

fn usage() {
    println!("bargainwatch - marketplace watch daemon");
    println!();
    println!("Usage:");
    println!("  bargainwatch                      run the watch daemon");
    println!("  bargainwatch --run-once           run every active watch once and exit");
    println!("  bargainwatch --add \"terms\" [--strict]  add a watch (comma-separated terms)");
    println!("  bargainwatch --list               list watches and counts");
    println!("  bargainwatch --ack <id>           mark a watch's items as read");
    println!("  bargainwatch --pause <id>         skip a watch until resumed");
    println!("  bargainwatch --resume <id>        re-activate a paused watch");
    println!("  bargainwatch --remove <id>        delete a watch and its results");
}
