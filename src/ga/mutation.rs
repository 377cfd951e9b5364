//! Mutation operator and traffic recalibration.
//!
//! A mutation call is entered with the configured probability and then
//! applies `round(|experiments| · scope)` structural changes to randomly
//! picked experiments. Every attempt, applied or not, is followed by a
//! recalibration of the touched schedule's fractions so that the new
//! shape has a chance of meeting its demand curve.
//!
//! Guards:
//! - restarted experiments are never moved
//! - restarted business experiments never change segments
//! - business experiments never flip segments over a partial range
//!
//! A guarded attempt is skipped and does not count toward the target.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use rand::prelude::IndexedRandom;
use rand::Rng;
use tracing::warn;

use super::operators::{weighted_choice, MutationKind, MUTATION_WEIGHTS};
use super::problem::SchedulingProblem;
use crate::models::{Experiment, ExperimentId, Individual, Schedule, Slot, TrafficProfile};
use crate::sampling::sample_ratio;

/// Result of one mutation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    /// Blocked by a guard or nothing to act on.
    Skipped,
}

/// Mutates `individual` in place. Returns the number of applied mutations.
pub fn mutate<R: Rng + ?Sized>(
    individual: &mut Individual,
    problem: &SchedulingProblem,
    rng: &mut R,
) -> u64 {
    let config = problem.config();
    if rng.random::<f64>() > config.mutation_probability {
        return 0;
    }

    let pool: Vec<ExperimentId> = individual.ids().collect();
    let target = (pool.len() as f64 * config.mutation_scope).round() as usize;
    let budget = target.saturating_mul(config.mutation_attempt_factor);

    let mut applied = 0usize;
    let mut attempts = 0usize;
    while applied < target {
        if attempts >= budget {
            warn!(
                individual = %individual.id(),
                applied,
                target,
                "mutation attempt budget exhausted"
            );
            break;
        }
        attempts += 1;

        let Some(&id) = pool.choose(rng) else { break };
        let Some(kind) = weighted_choice(&MUTATION_WEIGHTS, rng) else { break };
        if apply_mutation(individual, id, kind, problem, rng) == MutationOutcome::Applied {
            applied += 1;
        }
        recalibrate_experiment(individual, id, problem.profile(), rng);
    }

    individual.record_mutations(applied as u64);
    applied as u64
}

/// Applies one mutation of `kind` to experiment `id`, without recalibration.
pub fn apply_mutation<R: Rng + ?Sized>(
    individual: &mut Individual,
    id: ExperimentId,
    kind: MutationKind,
    problem: &SchedulingProblem,
    rng: &mut R,
) -> MutationOutcome {
    let Some(experiment) = individual.experiment(id).cloned() else {
        return MutationOutcome::Skipped;
    };
    if is_blocked(&experiment, kind) {
        return MutationOutcome::Skipped;
    }
    let Some(schedule) = individual.schedule_mut(id) else {
        return MutationOutcome::Skipped;
    };
    let duration = schedule.assignments.len();
    if duration == 0 {
        return MutationOutcome::Skipped;
    }
    let config = problem.config();
    let floor = config.min_traffic_adjustment;
    let whole = 0..=duration - 1;

    match kind {
        MutationKind::Move => {
            let hours = rng.random_range(1..=config.move_by_hours) as i64;
            let delta = if rng.random_bool(0.5) { -hours } else { hours };
            schedule.move_by(delta);
        }
        MutationKind::Shorten => {
            schedule.shorten_by(rng.random_range(1..=config.shorten_by_hours));
        }
        MutationKind::Extend => {
            schedule.extend_by(rng.random_range(1..=config.extend_by_hours));
        }
        MutationKind::Flip | MutationKind::FlipRange => {
            let range = if kind.is_ranged() {
                random_span(duration, rng)
            } else {
                whole
            };
            let at = if kind.is_ranged() {
                *range.start()
            } else {
                rng.random_range(0..duration)
            };
            let Some(old) = segment_at(schedule, at, rng) else {
                return MutationOutcome::Skipped;
            };
            let Some(new) = other_segment(problem.segments(), &old, rng) else {
                return MutationOutcome::Skipped;
            };
            schedule.flip_segment(&old, &new, range, floor);
        }
        MutationKind::Add | MutationKind::AddRange => {
            let range = if kind.is_ranged() {
                random_span(duration, rng)
            } else {
                whole
            };
            let Some(segment) = problem.segments().choose(rng) else {
                return MutationOutcome::Skipped;
            };
            schedule.add_segment(segment, range, floor);
        }
        MutationKind::Remove | MutationKind::RemoveRange => {
            let range = if kind.is_ranged() {
                random_span(duration, rng)
            } else {
                whole
            };
            let used: Vec<String> = schedule.assignments[range.clone()]
                .iter()
                .flat_map(|a| a.traffic.keys().cloned())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let Some(segment) = used.choose(rng) else {
                return MutationOutcome::Skipped;
            };
            schedule.remove_segment(segment, range);
        }
        MutationKind::AdjustTraffic | MutationKind::AdjustTrafficRange => {
            let range = if kind.is_ranged() {
                random_span(duration, rng)
            } else {
                whole
            };
            let Some(segment) = segment_at(schedule, *range.start(), rng) else {
                return MutationOutcome::Skipped;
            };
            let (lo, hi) = (config.min_traffic_adjustment, config.max_traffic_adjustment);
            let magnitude = if hi > lo { rng.random_range(lo..=hi) } else { lo };
            let delta = if rng.random_bool(0.5) { -magnitude } else { magnitude };
            schedule.adjust_fraction(&segment, range, delta);
        }
    }
    MutationOutcome::Applied
}

fn is_blocked(experiment: &Experiment, kind: MutationKind) -> bool {
    (experiment.restarted && kind == MutationKind::Move)
        || (experiment.restarted && experiment.is_business() && kind.changes_segments())
        || (experiment.is_business() && kind == MutationKind::FlipRange)
}

/// Inclusive relative range `[start, end]` inside `0..duration`.
fn random_span<R: Rng + ?Sized>(duration: usize, rng: &mut R) -> RangeInclusive<usize> {
    let start = rng.random_range(0..duration);
    let end = start + rng.random_range(0..duration - start);
    start..=end
}

fn segment_at<R: Rng + ?Sized>(schedule: &Schedule, index: usize, rng: &mut R) -> Option<String> {
    let keys: Vec<&String> = schedule.at(index)?.traffic.keys().collect();
    keys.choose(rng).map(|s| (*s).clone())
}

fn other_segment<R: Rng + ?Sized>(segments: &[String], old: &str, rng: &mut R) -> Option<String> {
    let candidates: Vec<&String> = segments.iter().filter(|s| s.as_str() != old).collect();
    candidates.choose(rng).map(|s| (*s).clone())
}

fn recalibrate_experiment<R: Rng + ?Sized>(
    individual: &mut Individual,
    id: ExperimentId,
    profile: &TrafficProfile,
    rng: &mut R,
) {
    let Some(experiment) = individual.experiment(id).cloned() else {
        return;
    };
    if let Some(schedule) = individual.schedule_mut(id) {
        recalibrate(schedule, &experiment, profile, rng);
    }
}

/// Recomputes every fraction of `schedule` from a sampled segment mix so
/// that consumed traffic matches the demand curve.
///
/// The mix is resampled whenever an hour's segment set differs from the
/// previous hour's. Fractions are rounded up to the next 0.001; a segment
/// with a positive share never drops below 0.001. Segments the profile
/// offers no traffic for are left untouched.
pub fn recalibrate<R: Rng + ?Sized>(
    schedule: &mut Schedule,
    experiment: &Experiment,
    profile: &TrafficProfile,
    rng: &mut R,
) {
    let duration = schedule.duration();
    let mut previous: Option<Vec<String>> = None;
    let mut ratio: BTreeMap<String, f64> = BTreeMap::new();

    for (i, assignment) in schedule.assignments.iter_mut().enumerate() {
        let segments: Vec<String> = assignment.traffic.keys().cloned().collect();
        if previous.as_ref() != Some(&segments) {
            ratio = sample_ratio(&segments, rng);
            previous = Some(segments);
        }

        let demand = experiment.demand_at(i as Slot, duration) as f64;
        for (segment, &share) in &ratio {
            let available = match profile.available(assignment.hour, segment) {
                Some(a) if a > 0 => a as f64,
                _ => continue,
            };
            let mut fraction = (share * demand / available * 1000.0).ceil() / 1000.0;
            if share > 0.0 {
                fraction = fraction.max(0.001);
            }
            assignment.traffic.insert(segment.clone(), fraction.min(1.0));
        }
    }
}
