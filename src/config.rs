//! Run configuration.
//!
//! All tunables of a run live in [`EngineConfig`]. It deserializes from a
//! JSON file where every field is optional (missing fields take their
//! defaults) and is checked with [`EngineConfig::validate`] before use.
//!
//! # Example
//!
//! ```
//! use traffic_alloc::config::EngineConfig;
//!
//! let config = EngineConfig::default()
//!     .with_population_size(20)
//!     .with_num_generations(5)
//!     .with_seed(7);
//! assert!(config.validate().is_ok());
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fitness::FitnessWeights;

/// Tunables for the genetic algorithm, local search, annealing and sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of generations.
    pub num_generations: usize,
    /// Individuals per generation.
    pub population_size: usize,
    /// Evolution stops once the best total fitness reaches this value.
    pub target_fitness: f64,
    /// Individuals carried over unmutated into the next generation.
    pub elitism_size: usize,

    /// Probability of a recombining (single-child) crossover.
    pub crossover_probability: f64,
    /// Probability that a child is mutated at all.
    pub mutation_probability: f64,
    /// Share of the experiment pool mutated per mutation call.
    pub mutation_scope: f64,

    /// Upper bound (hours) of a move mutation.
    pub move_by_hours: u32,
    /// Upper bound (hours) of a shorten mutation.
    pub shorten_by_hours: u32,
    /// Upper bound (hours) of an extend mutation.
    pub extend_by_hours: u32,

    /// Fraction assigned to a segment introduced by add/flip mutations.
    pub min_traffic_adjustment: f64,
    /// Largest fraction change of the adjust-traffic mutations.
    pub max_traffic_adjustment: f64,

    /// Weights of the three fitness components.
    pub weights: FitnessWeights,

    /// Initial simulated annealing temperature.
    pub sa_start_temperature: f64,
    /// Multiplicative cooling factor applied every iteration.
    pub sa_temperature_decay: f64,

    /// Master seed. `None` draws one from the OS.
    pub seed: Option<u64>,

    /// Select/crossover/mutate rounds per child slot before giving up.
    pub max_child_attempts: usize,
    /// Mutate-until-feasible rounds per local search iteration.
    pub max_neighbor_attempts: usize,
    /// Mutation attempts allowed per requested mutation.
    pub mutation_attempt_factor: usize,
    /// Schedule resampling rounds per experiment during population sampling.
    pub max_sampling_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_generations: 100,
            population_size: 50,
            target_fitness: 0.95,
            elitism_size: 2,
            crossover_probability: 0.7,
            mutation_probability: 0.8,
            mutation_scope: 0.1,
            move_by_hours: 24,
            shorten_by_hours: 12,
            extend_by_hours: 12,
            min_traffic_adjustment: 0.01,
            max_traffic_adjustment: 0.05,
            weights: FitnessWeights::default(),
            sa_start_temperature: 0.05,
            sa_temperature_decay: 0.995,
            seed: None,
            max_child_attempts: 1000,
            max_neighbor_attempts: 1000,
            mutation_attempt_factor: 20,
            max_sampling_attempts: 10_000,
        }
    }
}

impl EngineConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the generation budget.
    pub fn with_num_generations(mut self, generations: usize) -> Self {
        self.num_generations = generations;
        self
    }

    /// Sets the population size.
    pub fn with_population_size(mut self, size: usize) -> Self {
        self.population_size = size;
        self
    }

    /// Sets the target fitness.
    pub fn with_target_fitness(mut self, target: f64) -> Self {
        self.target_fitness = target;
        self
    }

    /// Sets the elitism size.
    pub fn with_elitism_size(mut self, size: usize) -> Self {
        self.elitism_size = size;
        self
    }

    /// Sets the crossover probability.
    pub fn with_crossover_probability(mut self, p: f64) -> Self {
        self.crossover_probability = p;
        self
    }

    /// Sets the mutation probability and scope.
    pub fn with_mutation(mut self, probability: f64, scope: f64) -> Self {
        self.mutation_probability = probability;
        self.mutation_scope = scope;
        self
    }

    /// Sets the fitness weights.
    pub fn with_weights(mut self, weights: FitnessWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Sets the annealing schedule.
    pub fn with_annealing(mut self, start_temperature: f64, decay: f64) -> Self {
        self.sa_start_temperature = start_temperature;
        self.sa_temperature_decay = decay;
        self
    }

    /// Sets the master seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Master seed, drawing a fresh one when none is configured.
    pub fn master_seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        let probabilities = [
            ("crossover_probability", self.crossover_probability),
            ("mutation_probability", self.mutation_probability),
        ];
        for (name, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::InvalidConfig(format!("{name} must be in [0, 1], got {p}")));
            }
        }
        if self.mutation_scope < 0.0 {
            return Err(Error::InvalidConfig("mutation_scope must not be negative".into()));
        }
        if self.population_size < 2 {
            return Err(Error::InvalidConfig(format!(
                "population_size must be at least 2, got {}",
                self.population_size
            )));
        }
        if self.elitism_size >= self.population_size {
            return Err(Error::InvalidConfig(format!(
                "elitism_size ({}) must be smaller than population_size ({})",
                self.elitism_size, self.population_size
            )));
        }
        if self.move_by_hours == 0 || self.shorten_by_hours == 0 || self.extend_by_hours == 0 {
            return Err(Error::InvalidConfig("mutation hour bounds must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.min_traffic_adjustment)
            || self.max_traffic_adjustment < self.min_traffic_adjustment
        {
            return Err(Error::InvalidConfig(
                "traffic adjustments must satisfy 0 <= min <= max".into(),
            ));
        }
        self.weights.validate()?;
        if self.sa_start_temperature <= 0.0 {
            return Err(Error::InvalidConfig("sa_start_temperature must be positive".into()));
        }
        if self.sa_temperature_decay <= 0.0 || self.sa_temperature_decay > 1.0 {
            return Err(Error::InvalidConfig("sa_temperature_decay must be in (0, 1]".into()));
        }
        if self.max_child_attempts == 0
            || self.max_neighbor_attempts == 0
            || self.mutation_attempt_factor == 0
            || self.max_sampling_attempts == 0
        {
            return Err(Error::InvalidConfig("attempt budgets must be positive".into()));
        }
        Ok(())
    }
}
