use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use stash_arena::ArenaHeader;
use stash_gate::{SlotManagement, StoreConfig};
use stash_pool::StringPool;
use tracing::info;

use crate::cli::*;
use crate::demo::{EventSummary, SlotWorker};

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StoreConfig::default(),
    };
    match cli.command {
        Command::Run(args) => cmd_run(config, args, cli.format).await,
        Command::Dump(args) => cmd_dump(config, args),
        Command::Config => cmd_config(&config),
    }
}

async fn cmd_run(config: StoreConfig, args: RunArgs, format: OutputFormat) -> anyhow::Result<()> {
    let slots = args.slots.unwrap_or(config.num_slots).max(1);
    let pool = Arc::new(StringPool::new());
    let arenas = Arc::new(ArenaHeader::new(config.name.clone()));
    info!(slots, events = args.events, "starting run");

    let mut tasks = Vec::with_capacity(slots);
    for slot in 0..slots {
        let worker = SlotWorker::new(
            &config,
            slot,
            slots,
            Arc::clone(&pool),
            Arc::clone(&arenas),
            args.seed,
            args.hits,
        )?;
        let events = args.events;
        let force_clear = args.force_clear;
        tasks.push(tokio::task::spawn_blocking(move || {
            (slot as u64..events)
                .step_by(slots)
                .map(|event| worker.process(event, true, force_clear))
                .collect::<anyhow::Result<Vec<EventSummary>>>()
        }));
    }

    let mut summaries = Vec::new();
    for task in tasks {
        summaries.extend(task.await.context("slot worker panicked")??);
    }
    summaries.sort_by_key(|s| s.event);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
        OutputFormat::Text => {
            for s in &summaries {
                println!(
                    "{} {}  {}  hits={} tracks={} energy={}",
                    "event".dimmed(),
                    format!("#{}", s.event).yellow().bold(),
                    format!("slot#{}", s.slot).cyan(),
                    s.hits,
                    s.tracks,
                    s.energy
                );
            }
            println!(
                "{} {} events on {} slots, {} pooled keys",
                "✓".green().bold(),
                summaries.len(),
                slots,
                pool.len()
            );
            for report in arenas.report() {
                println!("  {}", report.to_string().dimmed());
            }
        }
    }
    Ok(())
}

fn cmd_dump(config: StoreConfig, args: DumpArgs) -> anyhow::Result<()> {
    let worker = SlotWorker::new(
        &config,
        0,
        1,
        Arc::new(StringPool::new()),
        Arc::new(ArenaHeader::new(config.name.clone())),
        args.seed,
        args.hits,
    )?;
    let summary = worker.process(args.event, false, false)?;
    for line in worker.gate.dump()?.lines() {
        if line.starts_with("=====") {
            println!("{}", line.bold());
        } else if line.starts_with("clid") {
            println!("{}", line.cyan());
        } else {
            println!("{line}");
        }
    }
    println!(
        "{} event {}: {} tracks, energy {}",
        "✓".green().bold(),
        summary.event.to_string().yellow(),
        summary.tracks,
        summary.energy
    );
    let report = worker.gate.clear_store(false)?;
    println!("  cleared: {} reset, {} removed", report.reset, report.removed);
    Ok(())
}

fn cmd_config(config: &StoreConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}
