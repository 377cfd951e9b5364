//! Parent and survivor selection.

use std::collections::HashSet;

use rand::Rng;

use crate::error::{Error, Result};
use crate::fitness::Fitness;
use crate::models::Individual;

/// Redraws of the second parent before falling back to a uniform pick.
const MAX_PARENT_REDRAWS: usize = 100;

/// An individual with its fitness.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated {
    pub individual: Individual,
    pub fitness: Fitness,
}

impl Evaluated {
    pub fn new(individual: Individual, fitness: Fitness) -> Self {
        Self {
            individual,
            fitness,
        }
    }

    /// Weighted total fitness.
    #[inline]
    pub fn total(&self) -> f64 {
        self.fitness.total()
    }
}

/// Fitness-proportionate (roulette wheel) selection.
///
/// Draws a value in `[0, Σ fitness)` and walks the population subtracting
/// each fitness until the value goes negative. Falls back to the last
/// individual when rounding exhausts the walk. Returns `None` for an empty
/// population.
pub fn select_proportionate<R: Rng + ?Sized>(population: &[Evaluated], rng: &mut R) -> Option<usize> {
    if population.is_empty() {
        return None;
    }
    let sum: f64 = population.iter().map(Evaluated::total).sum();
    let mut value = rng.random::<f64>() * sum;
    for (i, e) in population.iter().enumerate() {
        value -= e.total();
        if value < 0.0 {
            return Some(i);
        }
    }
    Some(population.len() - 1)
}

/// Selects two parents with distinct identities.
pub fn select_parents<R: Rng + ?Sized>(
    population: &[Evaluated],
    rng: &mut R,
) -> Result<(usize, usize)> {
    let distinct: HashSet<_> = population.iter().map(|e| e.individual.id()).collect();
    if distinct.len() < 2 {
        return Err(Error::PopulationTooSmall {
            size: distinct.len(),
            required: 2,
        });
    }

    let first = select_proportionate(population, rng).unwrap_or(0);
    let first_id = population[first].individual.id();
    for _ in 0..MAX_PARENT_REDRAWS {
        if let Some(second) = select_proportionate(population, rng) {
            if population[second].individual.id() != first_id {
                return Ok((first, second));
            }
        }
    }

    let others: Vec<usize> = (0..population.len())
        .filter(|&i| population[i].individual.id() != first_id)
        .collect();
    let second = others[rng.random_range(0..others.len())];
    Ok((first, second))
}

/// Indices of the `n` fittest individuals, best first, skipping repeated
/// identities.
pub fn select_elite(population: &[Evaluated], n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..population.len()).collect();
    order.sort_by(|&a, &b| population[b].total().total_cmp(&population[a].total()));

    let mut seen = HashSet::new();
    order
        .into_iter()
        .filter(|&i| seen.insert(population[i].individual.id()))
        .take(n)
        .collect()
}

/// Index of the fittest individual.
pub fn best_index(population: &[Evaluated]) -> Option<usize> {
    (0..population.len()).max_by(|&a, &b| population[a].total().total_cmp(&population[b].total()))
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    use super::*;
    use crate::fitness::FitnessWeights;

    fn evaluated(seed: u64, total: f64) -> Evaluated {
        let individual = Individual::empty(&mut SmallRng::seed_from_u64(seed));
        Evaluated::new(
            individual,
            Fitness {
                duration: total,
                segment: 0.0,
                start: 0.0,
                weights: FitnessWeights::new(1.0, 0.0, 0.0),
            },
        )
    }

    #[test]
    fn test_proportionate_prefers_fitter() {
        let pop = vec![evaluated(1, 0.1), evaluated(2, 0.9)];
        let mut rng = SmallRng::seed_from_u64(42);
        let hits = (0..5000)
            .filter(|_| select_proportionate(&pop, &mut rng) == Some(1))
            .count();
        let share = hits as f64 / 5000.0;
        assert!((share - 0.9).abs() < 0.03, "share {share}");
    }

    #[test]
    fn test_proportionate_zero_sum_falls_back_to_last() {
        let pop = vec![evaluated(1, 0.0), evaluated(2, 0.0), evaluated(3, 0.0)];
        let mut rng = SmallRng::seed_from_u64(42);
        assert_eq!(select_proportionate(&pop, &mut rng), Some(2));
        assert_eq!(select_proportionate(&[], &mut rng), None);
    }

    #[test]
    fn test_parents_are_distinct() {
        let pop = vec![evaluated(1, 0.99), evaluated(2, 0.01), evaluated(3, 0.0)];
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..200 {
            let (a, b) = select_parents(&pop, &mut rng).unwrap();
            assert_ne!(pop[a].individual.id(), pop[b].individual.id());
        }
    }

    #[test]
    fn test_parents_fall_back_to_uniform() {
        // The second individual can never win the wheel.
        let pop = vec![evaluated(1, 1.0), evaluated(2, 0.0)];
        let mut rng = SmallRng::seed_from_u64(42);
        let (a, b) = select_parents(&pop, &mut rng).unwrap();
        assert_eq!((a, b), (0, 1));
    }

    #[test]
    fn test_parents_need_two_identities() {
        let one = evaluated(1, 0.5);
        let pop = vec![one.clone(), one];
        let err = select_parents(&pop, &mut SmallRng::seed_from_u64(42)).unwrap_err();
        assert!(matches!(err, Error::PopulationTooSmall { size: 1, required: 2 }));
    }

    #[test]
    fn test_elite_ranks_and_dedups() {
        let a = evaluated(1, 0.3);
        let mut pop = vec![a.clone(), evaluated(2, 0.8), evaluated(3, 0.5), a];
        pop[3].individual = pop[3].individual.clone_with_id(pop[0].individual.id());

        let elite = select_elite(&pop, 3);
        assert_eq!(elite, vec![1, 2, 0]);
        assert_eq!(select_elite(&pop, 10).len(), 3);
        assert_eq!(best_index(&pop), Some(1));

        pop[0].individual = pop[0].individual.clone_with_id(Uuid::nil());
        assert_eq!(select_elite(&pop, 10).len(), 4);
    }
}
