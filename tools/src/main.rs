//! load-runner: replays a directory of daily batch files into the warehouse.
//!
//! Usage:
//!   load-runner --db dwh.db --data-dir ./data --archive-dir ./archive
//!   load-runner --db dwh.db --config dwh.json --reference-sql seed.sql
//!   load-runner --data-dir ./data --no-archive

use anyhow::{Context, Result};
use chrono::Timelike;
use fraudwatch_core::{
    config::DwhConfig,
    engine::{new_run_id, CycleReport, LoadEngine},
    store::DwhStore,
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = arg_value(&args, "--db").unwrap_or(":memory:");
    let mut config = match arg_value(&args, "--config") {
        Some(path) => DwhConfig::load(path)?,
        None => DwhConfig::default(),
    };
    if let Some(dir) = arg_value(&args, "--data-dir") {
        config.input_dir = dir.to_string();
    }
    if let Some(dir) = arg_value(&args, "--archive-dir") {
        config.archive_dir = dir.to_string();
    }
    if args.iter().any(|a| a == "--no-archive") {
        config.archive = false;
    }
    let reference_sql = arg_value(&args, "--reference-sql");

    println!("fraudwatch load-runner");
    println!("  db:           {db}");
    println!("  data_dir:     {}", config.input_dir);
    println!("  archive_dir:  {}", config.archive_dir);
    println!("  archive:      {}", config.archive);
    println!("  table_prefix: {}", config.table_prefix);
    println!();

    let store = DwhStore::open(db)?;
    let run_id = new_run_id();
    let mut engine = LoadEngine::build(run_id.clone(), config, store)?;

    if let Some(path) = reference_sql {
        let sql = std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
        engine.store().execute_script(&sql)?;
        log::info!("Reference data loaded from {path}");
    }

    let now = chrono::Local::now().naive_local();
    let detected_at = now.with_nanosecond(0).unwrap_or(now);
    let reports = engine.run_directory(detected_at)?;

    print_summary(&engine, &run_id, &reports)?;
    Ok(())
}

fn print_summary(engine: &LoadEngine, run_id: &str, reports: &[CycleReport]) -> Result<()> {
    println!("=== LOAD SUMMARY ===");
    println!("  run_id:       {run_id}");
    println!("  cycles:       {}", reports.len());
    for report in reports {
        println!();
        println!("  --- {} ---", report.load_date);
        for entity in &report.entities {
            println!(
                "  {:<20} staged {:>6}  new {:>5}  upd {:>5}  del {:>5}  appended {:>6}",
                entity.kind.to_string(),
                entity.staged,
                entity.new,
                entity.updated,
                entity.deleted,
                entity.appended
            );
        }
        for (label, count) in &report.fraud.counts {
            println!("  {label:<50} {count:>5}");
        }
    }

    let total = engine.store().fraud_events(engine.registry())?.len();
    println!();
    println!("  fraud events in report: {total}");
    println!("  load log entries:       {}", engine.store().load_events(engine.registry(), run_id)?.len());
    Ok(())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
