//! Generational genetic algorithm.
//!
//! Each generation fills `population_size - elitism_size` child slots in
//! parallel. A slot repeatedly selects two distinct parents, recombines
//! them, mutates the children and keeps the feasible ones, until it has
//! at least one. The best children fill the non-elite part of the next
//! generation; the rest is carried over from the fittest individuals of
//! the current one.
//!
//! # Reference
//! Goldberg (1989), "Genetic Algorithms in Search, Optimization and Machine Learning", Ch. 3

use std::collections::HashSet;

use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::crossover::crossover;
use super::mutation::mutate;
use super::problem::SchedulingProblem;
use super::selection::{best_index, select_elite, select_parents, Evaluated};
use super::slot_rng;
use crate::error::{Error, Result};
use crate::fitness::GenerationStats;
use crate::models::{Individual, Lineage};

/// Outcome of a genetic algorithm run.
#[derive(Debug, Clone)]
pub struct GaResult {
    /// Final population.
    pub population: Vec<Evaluated>,
    /// Fittest individual of the final population.
    pub best: Evaluated,
    /// Best-of-generation statistics, one row per generation.
    pub history: Vec<GenerationStats>,
    /// Generations evolved.
    pub generations: usize,
    /// Mutations applied over the run.
    pub mutations: u64,
    /// Crossover children produced over the run.
    pub crossovers: u64,
}

/// Runs the genetic algorithm over a [`SchedulingProblem`].
pub struct GaRunner<'a> {
    problem: &'a SchedulingProblem,
}

impl<'a> GaRunner<'a> {
    pub fn new(problem: &'a SchedulingProblem) -> Self {
        Self { problem }
    }

    /// Evolves `initial` until the generation budget or the target fitness.
    pub fn run(&self, initial: Vec<Individual>) -> Result<GaResult> {
        self.run_with(initial, |_| {})
    }

    /// Like [`GaRunner::run`], calling `on_generation` with every
    /// generation's statistics as they are recorded.
    pub fn run_with<F>(&self, initial: Vec<Individual>, mut on_generation: F) -> Result<GaResult>
    where
        F: FnMut(&GenerationStats),
    {
        let config = self.problem.config();
        let seed = config.master_seed();

        let offered = initial.len();
        let mut population: Vec<Evaluated> = initial
            .into_par_iter()
            .filter(|ind| self.problem.is_valid(ind))
            .map(|ind| self.evaluate(ind))
            .collect();
        if population.len() < offered {
            warn!(
                discarded = offered - population.len(),
                "infeasible individuals dropped from the initial population"
            );
        }
        if population.len() < 2 {
            return Err(Error::PopulationTooSmall {
                size: population.len(),
                required: 2,
            });
        }

        info!(
            population = population.len(),
            generations = config.num_generations,
            target = config.target_fitness,
            seed,
            "starting genetic algorithm"
        );

        let lineage = Lineage::default();
        let mut history = Vec::new();
        let mut generation = 0;
        loop {
            let best = &population[best_index(&population).unwrap_or(0)];
            let stats = GenerationStats::new(generation, &best.fitness);
            let average =
                population.iter().map(Evaluated::total).sum::<f64>() / population.len() as f64;
            info!(generation, best = stats.total, average, "generation evaluated");
            on_generation(&stats);
            history.push(stats);

            if best.total() >= config.target_fitness {
                info!(generation, best = best.total(), "target fitness reached");
                break;
            }
            if generation >= config.num_generations {
                break;
            }
            population = self.next_generation(&population, seed, generation, &lineage);
            generation += 1;
        }

        let best = population[best_index(&population).unwrap_or(0)].clone();
        info!(
            generations = generation,
            best = best.total(),
            mutations = lineage.mutations(),
            crossovers = lineage.crossovers(),
            "genetic algorithm finished"
        );
        Ok(GaResult {
            population,
            best,
            history,
            generations: generation,
            mutations: lineage.mutations(),
            crossovers: lineage.crossovers(),
        })
    }

    fn evaluate(&self, individual: Individual) -> Evaluated {
        let fitness = self.problem.fitness(&individual);
        Evaluated::new(individual, fitness)
    }

    fn next_generation(
        &self,
        population: &[Evaluated],
        seed: u64,
        generation: usize,
        lineage: &Lineage,
    ) -> Vec<Evaluated> {
        let config = self.problem.config();
        let target = config.population_size;
        let slots = target.saturating_sub(config.elitism_size);

        let produced: Vec<Vec<Evaluated>> = (0..slots)
            .into_par_iter()
            .map(|slot| {
                let mut rng = slot_rng(seed, generation, slot);
                self.produce_children(population, lineage, &mut rng)
            })
            .collect();

        let exhausted = produced.iter().filter(|c| c.is_empty()).count();
        if exhausted > 0 {
            warn!(
                generation,
                exhausted,
                attempts = config.max_child_attempts,
                "child slots without a feasible child, filled from current generation"
            );
        }
        let children: Vec<Evaluated> = produced.into_iter().flatten().collect();
        debug!(generation, children = children.len(), "children produced");

        let mut next = Vec::with_capacity(target);
        let mut seen = HashSet::new();
        for i in select_elite(&children, slots) {
            seen.insert(children[i].individual.id());
            next.push(children[i].clone());
        }
        for i in select_elite(population, population.len()) {
            if next.len() >= target {
                break;
            }
            if seen.insert(population[i].individual.id()) {
                next.push(population[i].clone());
            }
        }
        next
    }

    /// Select, recombine, mutate and filter until a feasible child exists
    /// or the attempt budget runs out.
    fn produce_children<R: Rng + ?Sized>(
        &self,
        population: &[Evaluated],
        lineage: &Lineage,
        rng: &mut R,
    ) -> Vec<Evaluated> {
        for _ in 0..self.problem.config().max_child_attempts {
            let Ok((a, b)) = select_parents(population, rng) else {
                return Vec::new();
            };
            let children = crossover(
                &population[a].individual,
                &population[b].individual,
                self.problem,
                lineage,
                rng,
            );

            let mut accepted = Vec::new();
            for mut child in children {
                lineage.record_mutations(mutate(&mut child, self.problem, rng));
                if self.problem.is_valid(&child) {
                    accepted.push(self.evaluate(child));
                }
            }
            if !accepted.is_empty() {
                return accepted;
            }
        }
        Vec::new()
    }
}
