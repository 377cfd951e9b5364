//! Crossover operator.
//!
//! With the configured probability two parents produce one child that
//! takes, per experiment, the schedule of the parent whose schedule
//! scores better for that experiment alone. Otherwise both parents are
//! cloned under fresh identities. Every child counts toward the run's
//! crossover total.

use rand::seq::SliceRandom;
use rand::Rng;

use super::problem::SchedulingProblem;
use crate::models::{ExperimentId, Individual, Lineage};

/// Recombines two parents into one or two children.
///
/// Experiments are visited in a shuffled order; on equal per-experiment
/// fitness `parent1` wins. Experiments known to only one parent are
/// copied from that parent, so children always cover the union of both
/// parents' experiments.
pub fn crossover<R: Rng + ?Sized>(
    parent1: &Individual,
    parent2: &Individual,
    problem: &SchedulingProblem,
    lineage: &Lineage,
    rng: &mut R,
) -> Vec<Individual> {
    if !rng.random_bool(problem.config().crossover_probability) {
        let children = vec![
            parent1.clone_with_id(Individual::fresh_id(rng)),
            parent2.clone_with_id(Individual::fresh_id(rng)),
        ];
        lineage.record_crossovers(children.len() as u64);
        return children;
    }

    let props = problem.properties();
    let mut child = Individual::empty(rng);

    let mut ids: Vec<ExperimentId> = parent1.ids().chain(parent2.ids()).collect();
    ids.sort_unstable();
    ids.dedup();
    ids.shuffle(rng);

    for id in ids {
        let chosen = match (parent1.get(id), parent2.get(id)) {
            (Some(a), Some(b)) => match (&a.schedule, &b.schedule) {
                (Some(sa), Some(sb)) => {
                    let fa = props.evaluate_experiment(&a.experiment, sa).total();
                    let fb = props.evaluate_experiment(&b.experiment, sb).total();
                    if fa >= fb {
                        a
                    } else {
                        b
                    }
                }
                (None, Some(_)) => b,
                _ => a,
            },
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => continue,
        };
        child.insert(chosen.experiment.clone(), chosen.schedule.clone());
    }

    child.set_lineage(
        parent1.mutation_count() + parent2.mutation_count(),
        parent1.crossover_count() + parent2.crossover_count() + 1,
    );
    lineage.record_crossovers(1);
    vec![child]
}
