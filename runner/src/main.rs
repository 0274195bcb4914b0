use clap::Parser;
use confront_runner::{
    config::RunConfig,
    distributed::LocalGroup,
    driver::{run_worker, RunError, RunOptions, WorkerSetup},
    logging::{init_tracing, verbosity_level, ParallelLog, RecordFormat},
};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Confront a set of models with a set of benchmarks")]
struct Args {
    /// path to the run configuration (YAML)
    #[arg(long)]
    config: PathBuf,
    /// root at which to search for models, overrides models.root
    #[arg(long)]
    root: Option<PathBuf>,
    /// only run these models
    #[arg(long, num_args = 1..)]
    models: Vec<String>,
    /// only run confrontations whose name contains one of these
    #[arg(long, num_args = 1..)]
    confrontations: Vec<String>,
    /// regions to compute over
    #[arg(long, num_args = 1..)]
    regions: Vec<String>,
    /// ignore and overwrite existing analysis files
    #[arg(long)]
    clean: bool,
    /// drop completed units before partitioning, remove partial artifacts
    #[arg(long)]
    skip_cache: bool,
    /// number of workers
    #[arg(long)]
    workers: Option<usize>,
    /// output directory, overrides build_dir
    #[arg(long)]
    build_dir: Option<PathBuf>,
    /// format of the shared log, overrides log_format
    #[arg(long, value_enum)]
    log_format: Option<RecordFormat>,
    /// increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn apply(&self, config: &mut RunConfig) {
        if let Some(ref root) = self.root {
            config.models.root = root.clone();
        }

        if !self.models.is_empty() {
            config.models.only = self.models.clone();
        }

        if !self.regions.is_empty() {
            config.requested_regions = self.regions.clone();
        }

        if let Some(ref build_dir) = self.build_dir {
            config.build_dir = build_dir.clone();
        }

        if let Some(format) = self.log_format {
            config.log_format = format;
        }

        if self.workers.is_some() {
            config.workers = self.workers;
        }

        config.clean |= self.clean;
        config.skip_cache |= self.skip_cache;
        config.select_tasks(&self.confrontations);
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match RunConfig::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");

            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);

    let log = match ParallelLog::next_in(&config.build_dir, &config.log_prefix) {
        Ok(log) => log,
        Err(error) => {
            eprintln!("Failed to choose a log file in {}: {error}", config.build_dir.display());

            return ExitCode::FAILURE;
        }
    };
    init_tracing(&log, verbosity_level(args.verbose), config.log_format);

    if config.preflight_checks() {
        error!("Configuration failed the preflight checks, see above");

        return ExitCode::FAILURE;
    }

    let mut options = RunOptions::from_config(&config);
    options.log = Some(log.path().to_path_buf());
    let workers = config.worker_count();

    info!(workers, log = ?log.path(), "Starting worker group");

    // every worker resolves its own models and tasks, just like separate processes would
    let results = LocalGroup::run(workers, |comm| {
        run_worker(&comm, WorkerSetup::from_config(&config), &options)
    });

    let mut exit = ExitCode::SUCCESS;

    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(Ok(report)) => {
                if let Some(metrics) = report.metrics {
                    info!(
                        failed = metrics.failed_units(),
                        failing_workers = metrics.failing_workers(),
                        "Run finished"
                    );
                }
            }
            Ok(Err(RunError::Aborted(reason))) => {
                error!(rank, "Aborted: {reason}");
                exit = ExitCode::FAILURE;
            }
            Ok(Err(error)) => {
                error!(rank, "Worker failed: {error}");
                exit = ExitCode::FAILURE;
            }
            Err(_) => {
                error!(rank, "Worker panicked");
                exit = ExitCode::FAILURE;
            }
        }
    }

    if let Err(error) = log.close() {
        eprintln!("Failed to close {}: {error}", log.path().display());
    }

    exit
}
