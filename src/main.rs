//! traffic-alloc CLI.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use traffic_alloc::config::EngineConfig;
use traffic_alloc::ga::{select_elite, Evaluated, GaRunner, SchedulingProblem};
use traffic_alloc::io::{self, StatsWriter};
use traffic_alloc::models::{Experiment, Individual, TrafficProfile};
use traffic_alloc::restart::{self, RestartPlan};
use traffic_alloc::sampling;
use traffic_alloc::search::LocalSearch;

#[derive(Parser)]
#[command(name = "traffic-alloc")]
#[command(about = "Schedules experiments onto hourly segment traffic", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the genetic algorithm
    Evolve {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Run local search from the best sampled individual
    LocalSearch {
        #[command(flatten)]
        run: RunArgs,
        /// Number of iterations
        #[arg(long, default_value_t = 1000)]
        iterations: usize,
    },
    /// Run simulated annealing from the best sampled individual
    Anneal {
        #[command(flatten)]
        run: RunArgs,
        /// Number of iterations
        #[arg(long, default_value_t = 1000)]
        iterations: usize,
    },
    /// Sample random individuals and keep the best
    Sample {
        #[command(flatten)]
        run: RunArgs,
        /// Number of individuals to sample
        #[arg(long, default_value_t = 50)]
        size: usize,
    },
    /// Build a segmented traffic profile from aggregate hourly requests
    Profile {
        /// CSV with the hourly totals in its third column
        #[arg(long)]
        aggregate: PathBuf,
        /// Segment names
        #[arg(long, value_delimiter = ',', default_value = "group1,group2,group3,group4,group5")]
        segments: Vec<String>,
        /// Share of the traffic each segment receives, in segment order
        #[arg(long, value_delimiter = ',', default_value = "0.4,0.1,0.2,0.15,0.15")]
        shares: Vec<f64>,
        /// Share of each hour held back for the control group
        #[arg(long, default_value_t = 0.0)]
        control: f64,
        /// Output profile CSV
        #[arg(long)]
        out: PathBuf,
    },
    /// Grow an experiment set by copying its experiments
    Scale {
        /// Experiment set JSON
        #[arg(long)]
        experiments: PathBuf,
        /// Size of the largest set
        #[arg(long)]
        size: usize,
        /// Also write every set this many experiments apart
        #[arg(long)]
        step: Option<usize>,
        /// Seed for the copied priorities
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Output directory
        #[arg(long, default_value = "experiments")]
        out: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Traffic profile CSV
    #[arg(long)]
    profile: PathBuf,
    /// Engine configuration JSON
    #[arg(long)]
    config: Option<PathBuf>,
    /// Master seed, overrides the configuration
    #[arg(long)]
    seed: Option<u64>,
    /// Output directory
    #[arg(long, default_value = "out")]
    out: PathBuf,
    /// Experiment set JSON
    #[arg(long, conflicts_with_all = ["generate", "restart_from"])]
    experiments: Option<PathBuf>,
    /// Generate this many random experiments
    #[arg(long, conflicts_with = "restart_from")]
    generate: Option<usize>,
    /// Target services of generated experiments
    #[arg(long, value_delimiter = ',', default_value = "service1")]
    services: Vec<String>,
    /// Prior best individual to restart from
    #[arg(long, requires = "restart_at")]
    restart_from: Option<PathBuf>,
    /// Hour of the prior run at which to restart
    #[arg(long, requires = "restart_from")]
    restart_at: Option<u32>,
    /// Experiments added at the restart
    #[arg(long, requires = "restart_from")]
    new_experiments: Option<PathBuf>,
    /// Experiment ids dropped at the restart
    #[arg(long, num_args = 1.., requires = "restart_from")]
    discard: Vec<u32>,
    /// Start from a saved population instead of sampling one
    #[arg(long)]
    population: Option<PathBuf>,
}

/// Where the experiments of a run come from.
enum Source {
    Fresh(Vec<Arc<Experiment>>),
    Restart(RestartPlan),
}

struct Setup {
    problem: SchedulingProblem,
    source: Source,
    seed: u64,
    population: Option<PathBuf>,
}

impl Setup {
    fn prepare(run: &RunArgs) -> Result<Self> {
        let mut config = match &run.config {
            Some(path) => EngineConfig::from_json_file(path)
                .with_context(|| format!("loading configuration {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(seed) = run.seed {
            config = config.with_seed(seed);
        }
        let seed = config.master_seed();
        let config = config.with_seed(seed);

        let profile = io::load_profile(&run.profile)
            .with_context(|| format!("loading traffic profile {}", run.profile.display()))?;
        info!(hours = profile.horizon(), seed, "traffic profile loaded");

        if let (Some(prior_path), Some(cutoff)) = (&run.restart_from, run.restart_at) {
            let prior = io::load_individual(prior_path)
                .with_context(|| format!("loading prior schedule {}", prior_path.display()))?;
            let new_experiments = match &run.new_experiments {
                Some(path) => io::load_experiments(path)
                    .with_context(|| format!("loading new experiments {}", path.display()))?,
                None => Vec::new(),
            };
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let plan = restart::prepare_restart(
                &prior,
                &profile,
                &new_experiments,
                &run.discard,
                cutoff,
                &mut rng,
            )
            .context("preparing restart")?;
            let problem = plan.problem(config)?;
            return Ok(Self {
                problem,
                source: Source::Restart(plan),
                seed,
                population: run.population.clone(),
            });
        }

        let experiments = match (&run.experiments, run.generate) {
            (Some(path), _) => io::load_experiments(path)
                .with_context(|| format!("loading experiments {}", path.display()))?,
            (None, Some(count)) => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                sampling::sample_experiments(count, &profile.segments(), &run.services, &mut rng)
            }
            (None, None) => bail!("one of --experiments, --generate or --restart-from is required"),
        };
        let problem = SchedulingProblem::new(Arc::new(profile), &experiments, config)?;
        Ok(Self {
            problem,
            source: Source::Fresh(experiments.into_iter().map(Arc::new).collect()),
            seed,
            population: run.population.clone(),
        })
    }

    fn experiments(&self) -> Vec<Experiment> {
        match &self.source {
            Source::Fresh(experiments) => experiments.iter().map(|e| e.as_ref().clone()).collect(),
            Source::Restart(plan) => plan.seed.experiments().map(|e| e.as_ref().clone()).collect(),
        }
    }

    fn profile(&self) -> &TrafficProfile {
        self.problem.profile()
    }

    /// Saved population if one was given, else a sampled one.
    fn population(&self, size: usize) -> Result<Vec<Individual>> {
        if let Some(path) = &self.population {
            info!(path = %path.display(), "starting from saved population");
            return io::load_population(path)
                .with_context(|| format!("loading population {}", path.display()));
        }
        let population = match &self.source {
            Source::Fresh(experiments) => {
                sampling::create_population(&self.problem, experiments, size, self.seed)?
            }
            Source::Restart(plan) => {
                restart::population_for_restart(&self.problem, plan, size, self.seed)?
            }
        };
        Ok(population)
    }
}

fn fittest(problem: &SchedulingProblem, population: Vec<Individual>) -> Result<Evaluated> {
    let evaluated: Vec<Evaluated> = population
        .into_iter()
        .map(|ind| {
            let fitness = problem.fitness(&ind);
            Evaluated::new(ind, fitness)
        })
        .collect();
    match select_elite(&evaluated, 1).first() {
        Some(&i) => Ok(evaluated[i].clone()),
        None => bail!("empty population"),
    }
}

/// Creates the output directory and writes the experiment set the run
/// starts from.
fn save_snapshot(out: &Path, setup: &Setup) -> Result<()> {
    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let path = out.join("experiments.json");
    io::save_experiments(&setup.experiments(), &path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Writes the best individual and one consumption file per target service.
fn save_outputs(out: &Path, setup: &Setup, best: &Individual) -> Result<()> {
    io::save_individual(best, out.join("best.json"))?;

    let experiments = setup.experiments();
    let mut services: Vec<&str> = experiments.iter().map(|e| e.target_service.as_str()).collect();
    services.sort_unstable();
    services.dedup();
    for service in services {
        let path = out.join(format!("consumption_{service}.csv"));
        let file = fs::File::create(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        io::write_consumption(best, service, setup.profile(), std::io::BufWriter::new(file))?;
    }
    Ok(())
}

fn evolve(run: &RunArgs) -> Result<()> {
    let setup = Setup::prepare(run)?;
    save_snapshot(&run.out, &setup)?;
    let initial = setup.population(setup.problem.config().population_size)?;

    let mut stats = StatsWriter::create(run.out.join("stats.csv"))?;
    let mut write_error = None;
    let result = GaRunner::new(&setup.problem).run_with(initial, |s| {
        if let Err(e) = stats.record(s) {
            write_error.get_or_insert(e);
        }
    })?;
    if let Some(e) = write_error {
        return Err(e).context("writing statistics");
    }
    stats.flush()?;

    let population: Vec<Individual> = result
        .population
        .iter()
        .map(|e| e.individual.clone())
        .collect();
    io::save_population(&population, run.out.join("population.json"))?;
    save_outputs(&run.out, &setup, &result.best.individual)?;

    info!(
        generations = result.generations,
        best = result.best.total(),
        mutations = result.mutations,
        crossovers = result.crossovers,
        "evolution done"
    );
    Ok(())
}

fn search(run: &RunArgs, iterations: usize, anneal: bool) -> Result<()> {
    let setup = Setup::prepare(run)?;
    save_snapshot(&run.out, &setup)?;
    let initial = setup.population(setup.problem.config().population_size)?;
    let start = fittest(&setup.problem, initial)?;
    info!(start = start.total(), "search start selected");

    let search = if anneal {
        LocalSearch::annealing(&setup.problem)
    } else {
        LocalSearch::improving(&setup.problem)
    };
    let result = search.run(start.individual, iterations)?;

    let mut stats = StatsWriter::create(run.out.join("stats.csv"))?;
    for row in &result.history {
        stats.record(row)?;
    }
    stats.flush()?;
    save_outputs(&run.out, &setup, &result.best.individual)?;

    if let Some(t) = result.suggested_temperature {
        info!(temperature = t, "suggested annealing start temperature");
    }
    info!(best = result.best.total(), skipped = result.skipped, "search done");
    Ok(())
}

fn sample(run: &RunArgs, size: usize) -> Result<()> {
    let setup = Setup::prepare(run)?;
    save_snapshot(&run.out, &setup)?;
    let population = setup.population(size)?;
    let best = fittest(&setup.problem, population)?;

    let mut stats = StatsWriter::create(run.out.join("stats.csv"))?;
    stats.record(&traffic_alloc::fitness::GenerationStats::new(0, &best.fitness))?;
    stats.flush()?;
    save_outputs(&run.out, &setup, &best.individual)?;

    info!(size, best = best.total(), "sampling done");
    Ok(())
}

fn profile(
    aggregate: &Path,
    segments: &[String],
    shares: &[f64],
    control: f64,
    out: &Path,
) -> Result<()> {
    if segments.len() != shares.len() {
        bail!("{} segments but {} shares", segments.len(), shares.len());
    }
    let totals = io::load_aggregate(aggregate)
        .with_context(|| format!("loading aggregate traffic {}", aggregate.display()))?;
    let shares: Vec<(String, f64)> = segments
        .iter()
        .cloned()
        .zip(shares.iter().copied())
        .collect();
    let profile = sampling::profile_from_aggregate(&totals, &shares, control)?;
    io::save_profile(&profile, out).with_context(|| format!("writing {}", out.display()))?;
    info!(hours = profile.horizon(), path = %out.display(), "traffic profile written");
    Ok(())
}

/// Writes `experiments_<n>.json` for every `n` from the input size plus
/// `step` up to `size`.
fn scale(
    experiments: &Path,
    size: usize,
    step: Option<usize>,
    seed: u64,
    out: &Path,
) -> Result<()> {
    let input = io::load_experiments(experiments)
        .with_context(|| format!("loading experiments {}", experiments.display()))?;
    if size <= input.len() {
        bail!("target size {size} does not exceed the {} input experiments", input.len());
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let scaled = sampling::scale_experiments(&input, size, &mut rng)?;

    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let step = step.unwrap_or(size - input.len()).max(1);
    for n in (input.len() + step..=size).step_by(step) {
        let path = out.join(format!("experiments_{n}.json"));
        io::save_experiments(&scaled[..n], &path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(size = n, path = %path.display(), "experiment set written");
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Evolve { run } => evolve(run),
        Commands::LocalSearch { run, iterations } => search(run, *iterations, false),
        Commands::Anneal { run, iterations } => search(run, *iterations, true),
        Commands::Sample { run, size } => sample(run, *size),
        Commands::Profile {
            aggregate,
            segments,
            shares,
            control,
            out,
        } => profile(aggregate, segments, shares, *control, out),
        Commands::Scale {
            experiments,
            size,
            step,
            seed,
            out,
        } => scale(experiments, *size, *step, *seed, out),
    }
}
