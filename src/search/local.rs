//! Single-lineage optimizers.
//!
//! Both optimizers start from one feasible individual and, every
//! iteration, mutate a clone of the current solution until the clone is
//! feasible. Local search accepts the neighbor only if it is strictly
//! fitter. Simulated annealing also accepts a worse neighbor with
//! probability `exp(-|Δ| / T)`, with `T` cooling geometrically.
//!
//! # Reference
//! Kirkpatrick et al. (1983), "Optimization by Simulated Annealing"

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fitness::GenerationStats;
use crate::ga::{mutate, Evaluated, SchedulingProblem};
use crate::models::Individual;

/// Iterations between progress log lines.
const LOG_EVERY: usize = 100;

/// Acceptance ratio targeted by the start-temperature suggestion.
const TARGET_ACCEPTANCE: f64 = 0.8;

/// Neighbor acceptance rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acceptance {
    /// Strict improvement only.
    Improving,
    /// Metropolis criterion with geometric cooling.
    Annealing {
        start_temperature: f64,
        decay: f64,
    },
}

/// Outcome of a local search or annealing run.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Solution held when the run ended.
    pub current: Evaluated,
    /// Fittest solution seen.
    pub best: Evaluated,
    /// Fitness of the current solution after every iteration.
    pub history: Vec<GenerationStats>,
    /// Iterations skipped because no feasible neighbor was found.
    pub skipped: usize,
    /// Temperature at the end of the run (annealing only).
    pub final_temperature: Option<f64>,
    /// Start temperature that would accept the mean observed improvement
    /// with probability 0.8 (local search only, when anything improved).
    pub suggested_temperature: Option<f64>,
}

/// Local search or simulated annealing over a [`SchedulingProblem`].
///
/// # Example
/// ```no_run
/// use traffic_alloc::search::{Acceptance, LocalSearch};
/// # fn demo(problem: &traffic_alloc::ga::SchedulingProblem, start: traffic_alloc::models::Individual) {
/// let result = LocalSearch::new(problem, Acceptance::Improving)
///     .run(start, 1_000)
///     .unwrap();
/// println!("best {}", result.best.total());
/// # }
/// ```
pub struct LocalSearch<'a> {
    problem: &'a SchedulingProblem,
    acceptance: Acceptance,
}

impl<'a> LocalSearch<'a> {
    pub fn new(problem: &'a SchedulingProblem, acceptance: Acceptance) -> Self {
        Self {
            problem,
            acceptance,
        }
    }

    /// Local search with strict improvement.
    pub fn improving(problem: &'a SchedulingProblem) -> Self {
        Self::new(problem, Acceptance::Improving)
    }

    /// Simulated annealing with the configured temperature schedule.
    pub fn annealing(problem: &'a SchedulingProblem) -> Self {
        let config = problem.config();
        Self::new(
            problem,
            Acceptance::Annealing {
                start_temperature: config.sa_start_temperature,
                decay: config.sa_temperature_decay,
            },
        )
    }

    /// Runs `iterations` iterations from `start`.
    pub fn run(&self, start: Individual, iterations: usize) -> Result<SearchResult> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.problem.config().master_seed());
        self.run_with_rng(start, iterations, &mut rng)
    }

    /// Runs with a caller-provided random source.
    pub fn run_with_rng<R: Rng + ?Sized>(
        &self,
        start: Individual,
        iterations: usize,
        rng: &mut R,
    ) -> Result<SearchResult> {
        if let Err(violation) = crate::validation::validate(&start, self.problem.profile()) {
            return Err(Error::InfeasibleStart(violation.to_string()));
        }

        let fitness = self.problem.fitness(&start);
        let mut current = Evaluated::new(start, fitness);
        let mut best = current.clone();
        let mut temperature = match self.acceptance {
            Acceptance::Annealing {
                start_temperature, ..
            } => Some(start_temperature),
            Acceptance::Improving => None,
        };
        let mut history = Vec::with_capacity(iterations);
        let mut improvements = Vec::new();
        let mut skipped = 0;

        info!(
            iterations,
            start = current.total(),
            acceptance = ?self.acceptance,
            "starting local search"
        );

        for iteration in 0..iterations {
            match self.neighbor(&current.individual, rng) {
                Some(neighbor) => {
                    let delta = neighbor.total() - current.total();
                    let accept = match (self.acceptance, temperature) {
                        (Acceptance::Annealing { .. }, Some(t)) => {
                            delta > 0.0 || rng.random::<f64>() < (-delta.abs() / t).exp()
                        }
                        _ => delta > 0.0,
                    };
                    if accept {
                        if delta > 0.0 {
                            improvements.push(delta);
                        }
                        current = neighbor;
                        if current.total() > best.total() {
                            best = current.clone();
                        }
                    }
                }
                None => {
                    skipped += 1;
                    warn!(
                        iteration,
                        attempts = self.problem.config().max_neighbor_attempts,
                        "no feasible neighbor, iteration skipped"
                    );
                }
            }

            if let (Acceptance::Annealing { decay, .. }, Some(t)) = (self.acceptance, temperature.as_mut()) {
                *t *= decay;
            }

            let stats = GenerationStats::new(iteration, &current.fitness);
            debug!(iteration, current = stats.total, "iteration");
            if iteration % LOG_EVERY == 0 {
                info!(iteration, current = stats.total, best = best.total(), temperature, "search progress");
            }
            history.push(stats);
        }

        let suggested_temperature = match self.acceptance {
            Acceptance::Improving if !improvements.is_empty() => {
                let mean = improvements.iter().sum::<f64>() / improvements.len() as f64;
                Some(mean / -TARGET_ACCEPTANCE.ln())
            }
            _ => None,
        };

        info!(
            best = best.total(),
            skipped,
            suggested_temperature,
            "local search finished"
        );
        Ok(SearchResult {
            current,
            best,
            history,
            skipped,
            final_temperature: temperature,
            suggested_temperature,
        })
    }

    /// Mutated feasible clone of `base`, within the neighbor budget.
    fn neighbor<R: Rng + ?Sized>(&self, base: &Individual, rng: &mut R) -> Option<Evaluated> {
        for _ in 0..self.problem.config().max_neighbor_attempts {
            let mut candidate = base.clone_with_id(Individual::fresh_id(rng));
            mutate(&mut candidate, self.problem, rng);
            if self.problem.is_valid(&candidate) {
                let fitness = self.problem.fitness(&candidate);
                return Some(Evaluated::new(candidate, fitness));
            }
        }
        None
    }
}
