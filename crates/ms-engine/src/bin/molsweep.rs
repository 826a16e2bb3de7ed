//! molsweep: run a scaffold-split cross-validation sweep from a YAML config.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ms_data::CsvDatasetSource;
use ms_engine::Dispatcher;
use ms_types::SweepFile;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Hyperparameter sweeps for molecular property regression
#[derive(Parser, Debug)]
#[command(name = "molsweep", version, about, long_about = None)]
struct Cli {
    /// Sweep config file; bare names are looked up under ./config/
    #[arg(short, long)]
    config: String,

    /// Sweep name used in logs (defaults to the config file stem)
    #[arg(long)]
    name: Option<String>,

    /// Override the worker pool cap
    #[arg(long)]
    max_workers: Option<usize>,

    /// Expand and validate the grid, then exit without training
    #[arg(long)]
    dry_run: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(filter),
        )
        .init();

    let path: PathBuf = SweepFile::resolve_path(&cli.config);
    let file = SweepFile::load(&path)
        .with_context(|| format!("failed to load sweep config {}", path.display()))?;

    let mut settings = file.sweep.apply_env_overrides()?;
    if let Some(n) = cli.max_workers {
        settings = settings.with_max_workers(n);
    }
    settings.validate()?;

    let name = cli.name.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sweep".to_string())
    });

    let source = Arc::new(CsvDatasetSource::new(settings.data_root.clone()));
    let dispatcher = Dispatcher::new(settings, source);

    let sets = dispatcher.expand(&file.params)?;
    let jobs = dispatcher.validate(&sets)?;

    if cli.dry_run {
        for (n, (params, job)) in sets.iter().zip(&jobs).enumerate() {
            println!("{n:>4}  {params}  ({} folds x {} epochs)", job.num_cv_folds, job.epochs);
        }
        println!("{} parameter sets", sets.len());
        return Ok(());
    }

    let report = dispatcher.run(&name, sets)?;
    println!(
        "{}: {} completed, {} failed, {} cancelled -> {}",
        name,
        report.status.trials_completed,
        report.status.trials_failed,
        report.status.trials_cancelled,
        report.results_path.display()
    );
    if let Some(best) = &report.status.best_trial {
        println!("best trial {}: mean_val_loss {:.4}  {}", best.trial_number, best.objective, best.parameters);
    }
    Ok(())
}
