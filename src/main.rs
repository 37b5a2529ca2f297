use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

use race_trainer::artifacts::manifest_file_name;
use race_trainer::config::TrainingConfig;
use race_trainer::estimator::Task;
use race_trainer::pipeline;

const USAGE: &str = "usage: race_trainer [--samples N] [--seed N] [--models-dir DIR] \
[--run-id ID] [--roster FILE] [--records FILE]";

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_tracing();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    let mut cfg = TrainingConfig::from_env().context("reading RACE_* environment")?;
    cfg.apply_args(&args).context("parsing command-line flags")?;

    let outcome = pipeline::run(&cfg)
        .map_err(|err| anyhow!("training run failed at the {} stage: {err}", err.stage()))?;

    println!("run {}", outcome.run_id);
    match outcome.seed {
        Some(seed) => println!(
            "  generated {} entries in {} races (seed {seed})",
            outcome.labels.records, outcome.labels.races
        ),
        None => println!(
            "  loaded {} entries in {} races",
            outcome.labels.records, outcome.labels.races
        ),
    }
    println!(
        "  split: {} train / {} eval",
        outcome.manifest.train_rows, outcome.manifest.eval_rows
    );
    for task in Task::ALL {
        let Some(entry) = outcome.manifest.selected(task) else {
            continue;
        };
        println!(
            "  {:<9} {:<20} {}  -> {}",
            task.name(),
            entry.algorithm.id(),
            entry.metrics.summary(),
            entry.file
        );
    }
    for skipped in &outcome.skipped {
        println!(
            "  skipped {} / {}: {}",
            skipped.task, skipped.algorithm, skipped.reason
        );
    }
    println!(
        "manifest: {}",
        cfg.models_dir
            .join(manifest_file_name(&outcome.run_id))
            .display()
    );
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|arg| arg == name)
}
