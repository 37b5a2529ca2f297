use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

use race_trainer::artifacts::{latest_run_id, load_run};
use race_trainer::config::TrainingConfig;
use race_trainer::sample_gen::SampleGenerator;

// Prints a persisted run's manifest and scores one freshly simulated race with it.
fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut cfg = TrainingConfig::from_env().context("reading RACE_* environment")?;
    cfg.apply_args(&args).context("parsing command-line flags")?;

    let run_id = match cfg.run_id.clone() {
        Some(id) => id,
        None => latest_run_id(&cfg.models_dir)?
            .ok_or_else(|| anyhow!("no runs found in {}", cfg.models_dir.display()))?,
    };
    let run = load_run(&cfg.models_dir, &run_id).with_context(|| format!("loading run {run_id}"))?;

    if has_flag(&args, "--json") {
        println!(
            "{}",
            serde_json::to_string_pretty(&run.manifest).context("serializing manifest")?
        );
        return Ok(());
    }

    let m = &run.manifest;
    println!("run {} (schema v{})", m.run_id, m.schema_version);
    println!(
        "  samples {} ({} train / {} eval), seed {}",
        m.sample_count,
        m.train_rows,
        m.eval_rows,
        m.seed.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
    );
    println!("  features: {}", m.feature_list.join(", "));
    for (task, entry) in &m.selected_models {
        println!(
            "  {:<9} {:<20} {}  ({})",
            task,
            entry.algorithm.id(),
            entry.metrics.summary(),
            entry.policy_description
        );
    }
    if !m.skipped.is_empty() {
        println!("  {} candidate(s) skipped", m.skipped.len());
    }

    let generator = SampleGenerator::new(cfg.roster()?)?;
    let grid = generator.roster().grid_size();
    let seed = cfg.seed.unwrap_or(7);
    let race = generator.generate(grid, Some(seed))?;
    let mut scored = Vec::with_capacity(race.len());
    for record in &race {
        scored.push((record, run.predict(record)?));
    }
    scored.sort_by(|a, b| a.1.position.total_cmp(&b.1.position));

    println!();
    println!(
        "sample race at {} (seed {seed}):",
        race.first().map(|r| r.circuit.as_str()).unwrap_or("-")
    );
    println!(
        "  {:<22} {:<16} {:>5} {:>7} {:>6} {:>7} {:>6}",
        "driver", "team", "quali", "pred", "win%", "podium%", "actual"
    );
    for (record, pred) in scored {
        println!(
            "  {:<22} {:<16} {:>5} {:>7.2} {:>6.1} {:>7.1} {:>6}",
            record.driver,
            record.team,
            record.qualifying_position,
            pred.position,
            pred.win_probability * 100.0,
            pred.podium_probability * 100.0,
            record.finishing_position
        );
    }
    Ok(())
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|arg| arg == name)
}
