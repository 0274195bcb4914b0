use crate::{
    config::{ConfigErrors, RunConfig},
    distributed::{
        comm::{CollectiveExt, CommError, Communicator, ROOT},
        election::elect_masters,
        util::worker_id,
    },
    executors::{command::CommandConfrontation, TaskExecutor, UnitOutcome},
    models,
    report::{final_line, write_summary, ReportError, ScoreTable},
    runtime::{aggregate, RunMetrics, WorkerStats},
    work::{completion::CompletionStore, partition::WorkPartitioner, Model, Task, WorkUnit},
};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use thiserror::Error;
use tracing::{error, info, info_span};

pub const SCORE_FILE: &str = "scores.csv";
pub const SUMMARY_FILE: &str = "summary.yaml";

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Run aborted: {0}")]
    Aborted(String),
    #[error("Collective communication failed: {0}")]
    Comm(#[from] CommError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Options every worker of a run shares
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub build_dir: PathBuf,
    pub artifact_extension: String,
    pub clean: bool,
    pub skip_cache: bool,
    /// shared log, named in the final summary if anything failed
    pub log: Option<PathBuf>,
}

impl RunOptions {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            build_dir: config.build_dir.clone(),
            artifact_extension: config.artifact_extension.clone(),
            clean: config.clean,
            skip_cache: config.skip_cache,
            log: None,
        }
    }
}

/// Replicated inputs of a worker: the tasks and models of the run
#[derive(Debug, Clone)]
pub struct WorkerSetup {
    pub tasks: Vec<Task>,
    pub models: Vec<Model>,
}

impl WorkerSetup {
    /// resolve models and build one command confrontation per configured task
    pub fn from_config(config: &RunConfig) -> Result<Self, ConfigErrors> {
        if let Some(region) = config
            .requested_regions
            .iter()
            .find(|region| !config.region_defined(region))
        {
            return Err(ConfigErrors::UndefinedRegion(region.clone()));
        }

        let models = models::discover(&config.models.root, &config.models.only)?;
        let tasks = config
            .tasks
            .iter()
            .map(|(name, task)| {
                Task::new(
                    name.clone(),
                    task.output_dir(&config.build_dir, name),
                    Arc::new(CommandConfrontation::load(
                        name,
                        task,
                        &config.requested_regions,
                    )),
                )
            })
            .collect();

        Ok(Self { tasks, models })
    }

    /// checks that have to pass on every worker before any unit runs
    fn validate(&self) -> Result<(), ConfigErrors> {
        if self.models.is_empty() {
            return Err(ConfigErrors::NoModels);
        }

        if self.tasks.is_empty() {
            return Err(ConfigErrors::NoTasks);
        }

        for task in self.tasks.iter() {
            fs::create_dir_all(&task.output_dir).map_err(|source| {
                ConfigErrors::OutputDirectory {
                    path: task.output_dir.clone(),
                    source,
                }
            })?;
        }

        Ok(())
    }
}

/// Everything a worker did during a run
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub rank: usize,
    /// master rank of every task
    pub masters: Vec<usize>,
    pub analysis: Vec<(WorkUnit, UnitOutcome)>,
    pub post_processing: Vec<(WorkUnit, UnitOutcome)>,
    /// outcomes of the tasks this worker was master of, by task index
    pub composites: Vec<(usize, UnitOutcome)>,
    pub stats: WorkerStats,
    /// group wide metrics, only present on the reporting worker
    pub metrics: Option<RunMetrics>,
}

/// agree on whether every worker is able to start, abort all of them otherwise
fn agree_on_setup<C: Communicator + ?Sized>(
    comm: &C,
    setup: Result<WorkerSetup, ConfigErrors>,
) -> Result<WorkerSetup, RunError> {
    let setup = setup.and_then(|setup| setup.validate().map(|()| setup));

    if let Err(ref error) = setup {
        error!(error = %error, "Setup failed, aborting the run");
    }

    let all_ok = comm.all_agree(setup.is_ok())?;

    match setup {
        Ok(setup) if all_ok => Ok(setup),
        Ok(_) => Err(RunError::Aborted(String::from(
            "a peer worker failed its setup",
        ))),
        Err(error) => Err(RunError::Aborted(error.to_string())),
    }
}

/// run one worker through both phases
///
/// Sequence: agree on setup, partition, elect masters, analysis, barrier, plot limits,
/// post-processing, barrier, composites on masters, barrier, aggregate and report on the root.
/// Every worker of the group has to call this with the same tasks, models and options.
pub fn run_worker<C: Communicator + ?Sized>(
    comm: &C,
    setup: Result<WorkerSetup, ConfigErrors>,
    options: &RunOptions,
) -> Result<WorkerReport, RunError> {
    let rank = comm.rank();
    let _span = info_span!("worker", id = %worker_id(rank)).entered();
    let start = Instant::now();

    let WorkerSetup { mut tasks, models } = agree_on_setup(comm, setup)?;

    if comm.is_root() {
        info!(
            models = %models.iter().map(|model| model.name.as_str()).collect::<Vec<_>>().join(", "),
            tasks = %tasks.iter().map(|task| task.name.as_str()).collect::<Vec<_>>().join(", "),
            workers = comm.size(),
            "Running model-confrontation pairs"
        );
    }

    let store = CompletionStore::new(options.artifact_extension.clone());
    let partitioner = WorkPartitioner::new(&store).clean(options.clean);

    // the filtered list decides what phase 1 runs, the full one drives phase 2 and the election
    let analysis_units = partitioner
        .clone()
        .skip_cache(options.skip_cache)
        .partition(&tasks, &models, rank, comm.size());
    let local_units = partitioner.partition(&tasks, &models, rank, comm.size());

    // the election is a gather to the root, so no worker starts writing artifacts before every
    // worker finished the skip-cache filter
    let masters = elect_masters(comm, &mut tasks, &local_units)?;

    let mut executor = TaskExecutor::new(&store, rank, options.clean);
    let analysis = executor.run_analysis(&tasks, &models, &analysis_units);

    comm.barrier()?;

    executor.determine_plot_limits(&mut tasks, &models);
    let post_processing = executor.run_post_processing(&tasks, &models, &local_units);

    comm.barrier()?;

    let composites = executor.run_composites(&tasks, &models);

    comm.barrier()?;

    let stats = executor.into_stats();
    let metrics = aggregate(comm, &stats, start.elapsed(), ROOT)?;

    if let Some(ref metrics) = metrics {
        report(&tasks, &models, &store, metrics, options)?;
    }

    Ok(WorkerReport {
        rank,
        masters,
        analysis,
        post_processing,
        composites,
        stats,
        metrics,
    })
}

/// final outputs of the reporting worker
fn report(
    tasks: &[Task],
    models: &[Model],
    store: &CompletionStore,
    metrics: &RunMetrics,
    options: &RunOptions,
) -> Result<(), ReportError> {
    fs::create_dir_all(&options.build_dir)?;
    ScoreTable::collect(tasks, models, store).dump(&options.build_dir.join(SCORE_FILE))?;
    write_summary(metrics, &options.build_dir.join(SUMMARY_FILE))?;

    match metrics.load_balance() {
        Some(balance) => info!("Load balance (max/min elapsed): {balance:.2}"),
        None => info!("Load balance unavailable, a worker did no measurable work"),
    }

    if let Some(efficiency) = metrics.parallel_efficiency() {
        info!("Parallel efficiency: {:.1} %", efficiency * 100.0);
    }

    let log = options.log.as_deref().unwrap_or_else(|| Path::new("the log"));

    if metrics.has_errors() {
        error!("{}", final_line(metrics, log));
    } else {
        info!("{}", final_line(metrics, log));
    }

    Ok(())
}
