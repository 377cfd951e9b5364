//! Random experiment sets, schedules and initial populations.
//!
//! Populations are built one individual at a time: experiments are added
//! in a shuffled order, and each one's schedule is resampled until the
//! partial individual stays feasible. Every ten failed samples the earliest
//! start moves one day later.
//!
//! The module also derives inputs for runs: segmented profiles from
//! aggregate hourly traffic, and larger experiment sets grown from a
//! smaller one.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rand::prelude::IndexedRandom;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::ga::operators::weighted_choice;
use crate::ga::{recalibrate, select_elite, Evaluated, SchedulingProblem};
use crate::models::{
    Assignment, DemandCurve, Experiment, ExperimentId, ExperimentKind, Individual, Schedule, Slot,
    TrafficProfile,
};

/// Draw weights of the experiment kinds.
pub const EXPERIMENT_KIND_WEIGHTS: [(ExperimentKind, u32); 2] =
    [(ExperimentKind::Regression, 1), (ExperimentKind::Business, 1)];

/// Failed samples before the earliest start moves on by a day.
const FAILURES_PER_DAY: usize = 10;

const HOURS_PER_DAY: u32 = 24;

/// Salt separating population sampling seeds from generation seeds.
const SAMPLING_ROUND: usize = usize::MAX;

/// Random integer split of 100 % over `segments`.
///
/// Each segment but the last takes a uniform share of what is left; the
/// last takes the remainder.
pub fn sample_ratio<R: Rng + ?Sized>(segments: &[String], rng: &mut R) -> BTreeMap<String, f64> {
    let mut ratio = BTreeMap::new();
    let Some((last, rest)) = segments.split_last() else {
        return ratio;
    };
    let mut remaining = 100u32;
    for segment in rest {
        let share = rng.random_range(0..=remaining);
        ratio.insert(segment.clone(), share as f64 / 100.0);
        remaining -= share;
    }
    ratio.insert(last.clone(), remaining as f64 / 100.0);
    ratio
}

/// One or two distinct random segments.
pub fn sample_segments<R: Rng + ?Sized>(segments: &[String], rng: &mut R) -> Vec<String> {
    let count = (1 + rng.random_range(0..2)).min(segments.len());
    segments.choose_multiple(rng, count).cloned().collect()
}

/// No preference with probability 1/2, otherwise one or two segments.
pub fn sample_preferred_segments<R: Rng + ?Sized>(segments: &[String], rng: &mut R) -> Vec<String> {
    if rng.random_bool(0.5) {
        Vec::new()
    } else {
        sample_segments(segments, rng)
    }
}

/// Synthetic experiment with the given id and minimum duration.
///
/// Required traffic is uniform in `[2·10⁷, 3·10⁷)`, priority in `1..=10`.
/// One in three experiments ramps up from 10⁻⁴ of its total.
pub fn sample_experiment<R: Rng + ?Sized>(
    id: ExperimentId,
    min_duration: u32,
    segments: &[String],
    services: &[String],
    rng: &mut R,
) -> Experiment {
    let total: u64 = rng.random_range(20_000_000..30_000_000);
    let kind = weighted_choice(&EXPERIMENT_KIND_WEIGHTS, rng).unwrap_or(ExperimentKind::Regression);
    let service = services
        .choose(rng)
        .cloned()
        .unwrap_or_else(|| "service1".to_string());
    let demand = if rng.random_range(0..3) == 0 {
        DemandCurve::Gradual {
            start_traffic: 0.0001 * total as f64,
        }
    } else {
        DemandCurve::Constant
    };

    Experiment::new(id, kind, service, min_duration, total)
        .with_priority(rng.random_range(1..=10))
        .with_preferred_segments(sample_preferred_segments(segments, rng))
        .with_demand(demand)
}

/// `count` synthetic experiments with ids `1..=count` and minimum
/// durations between 5 and 15 days.
pub fn sample_experiments<R: Rng + ?Sized>(
    count: usize,
    segments: &[String],
    services: &[String],
    rng: &mut R,
) -> Vec<Experiment> {
    (1..=count as ExperimentId)
        .map(|id| {
            let min_duration = 120 + rng.random_range(0..240);
            sample_experiment(id, min_duration, segments, services, rng)
        })
        .collect()
}

/// Grows `experiments` to `size` entries.
///
/// The input is sorted by id and cycled through; each added experiment
/// copies its template under the next free id with a fresh priority in
/// `1..=10`. Sets already at or above `size` come back sorted and
/// otherwise unchanged, so every prefix of the result is a valid set.
pub fn scale_experiments<R: Rng + ?Sized>(
    experiments: &[Experiment],
    size: usize,
    rng: &mut R,
) -> Result<Vec<Experiment>> {
    if experiments.is_empty() {
        return Err(Error::EmptyExperimentSet);
    }
    let mut templates = experiments.to_vec();
    templates.sort_by_key(|e| e.id);
    for template in &mut templates {
        template.restarted = false;
    }

    let mut next_id = templates.last().map_or(1, |e| e.id + 1);
    let mut scaled = templates.clone();
    while scaled.len() < size {
        let template = &templates[scaled.len() % templates.len()];
        let mut copy = template.clone();
        copy.id = next_id;
        copy.priority = rng.random_range(1..=10);
        scaled.push(copy);
        next_id += 1;
    }
    info!(from = templates.len(), to = scaled.len(), "experiment set scaled");
    Ok(scaled)
}

/// Splits aggregate hourly requests over segments.
///
/// The control group's share of each hour is removed first; each segment
/// then takes its share of the rest, rounded to whole requests.
pub fn profile_from_aggregate(
    requests_per_hour: &[u64],
    shares: &[(String, f64)],
    control_share: f64,
) -> Result<TrafficProfile> {
    if !(0.0..=1.0).contains(&control_share) {
        return Err(Error::InvalidConfig(format!(
            "control group share {control_share} outside [0, 1]"
        )));
    }
    if shares.is_empty() {
        return Err(Error::InvalidConfig("no segment shares".to_string()));
    }
    let mut seen = HashSet::new();
    for (segment, share) in shares {
        if !(0.0..=1.0).contains(share) {
            return Err(Error::InvalidConfig(format!(
                "share {share} of segment `{segment}` outside [0, 1]"
            )));
        }
        if !seen.insert(segment.as_str()) {
            return Err(Error::InvalidConfig(format!("segment `{segment}` listed twice")));
        }
    }

    let hours = requests_per_hour
        .iter()
        .map(|&total| {
            let control = (total as f64 * control_share).round() as u64;
            let requests = total.saturating_sub(control) as f64;
            shares
                .iter()
                .map(|(segment, share)| (segment.clone(), (requests * share).round() as u64))
                .collect()
        })
        .collect();
    debug!(
        hours = requests_per_hour.len(),
        segments = shares.len(),
        "profile built from aggregate"
    );
    Ok(TrafficProfile::new(hours))
}

/// Random schedule for `experiment` starting within `2·n` days of `base_slot`.
///
/// The duration exceeds the minimum by less than `n/2` days, where `n` is
/// the number of experiments. Fractions follow one sampled mix of one or
/// two segments, scaled to the demand curve.
pub fn sample_schedule<R: Rng + ?Sized>(
    experiment: &Experiment,
    segments: &[String],
    base_slot: Slot,
    num_experiments: usize,
    profile: &TrafficProfile,
    rng: &mut R,
) -> Schedule {
    let n = num_experiments.max(1) as u32;
    let start = base_slot + rng.random_range(0..HOURS_PER_DAY * n * 2);
    let slack = (HOURS_PER_DAY * n / 2).max(1);
    let duration = (experiment.min_duration + rng.random_range(0..slack)).max(1);

    let chosen = sample_segments(segments, rng);
    let assignments = (0..duration)
        .map(|i| {
            chosen
                .iter()
                .fold(Assignment::new(start + i), |a, s| a.with_segment(s.clone(), 0.0))
        })
        .collect();
    let mut schedule = Schedule::new(start, assignments);
    recalibrate(&mut schedule, experiment, profile, rng);
    schedule
}

/// Adds `experiment` to `individual` with sampled schedules until the
/// individual is feasible.
///
/// `first` is tried before any sampled schedule.
pub(crate) fn place_experiment<R: Rng + ?Sized>(
    individual: &mut Individual,
    experiment: &Arc<Experiment>,
    first: Option<Schedule>,
    problem: &SchedulingProblem,
    base_slot: Slot,
    num_experiments: usize,
    rng: &mut R,
) -> Result<()> {
    if let Some(schedule) = first {
        individual.insert(experiment.clone(), Some(schedule));
        if problem.is_valid(individual) {
            return Ok(());
        }
    }

    let attempts = problem.config().max_sampling_attempts;
    let mut base = base_slot;
    for attempt in 1..=attempts {
        let schedule = sample_schedule(
            experiment,
            problem.segments(),
            base,
            num_experiments,
            problem.profile(),
            rng,
        );
        individual.insert(experiment.clone(), Some(schedule));
        if problem.is_valid(individual) {
            return Ok(());
        }
        if attempt % FAILURES_PER_DAY == 0 {
            base += HOURS_PER_DAY;
        }
    }
    individual.remove(experiment.id);
    Err(Error::SamplingExhausted {
        experiment: experiment.id,
        attempts,
    })
}

/// `size` feasible individuals over `experiments`, built in parallel.
pub fn create_population(
    problem: &SchedulingProblem,
    experiments: &[Arc<Experiment>],
    size: usize,
    seed: u64,
) -> Result<Vec<Individual>> {
    if experiments.is_empty() {
        return Err(Error::EmptyExperimentSet);
    }
    info!(size, experiments = experiments.len(), "sampling initial population");

    (0..size)
        .into_par_iter()
        .map(|item| {
            let mut rng = crate::ga::slot_rng(seed, SAMPLING_ROUND, item);
            let mut individual = Individual::empty(&mut rng);
            let mut order = experiments.to_vec();
            order.shuffle(&mut rng);
            for experiment in &order {
                place_experiment(
                    &mut individual,
                    experiment,
                    None,
                    problem,
                    0,
                    experiments.len(),
                    &mut rng,
                )?;
            }
            debug!(item, "individual sampled");
            Ok(individual)
        })
        .collect()
}

/// Samples `size` individuals and returns the fittest.
pub fn random_sampling(
    problem: &SchedulingProblem,
    experiments: &[Arc<Experiment>],
    size: usize,
    seed: u64,
) -> Result<Evaluated> {
    let population: Vec<Evaluated> = create_population(problem, experiments, size, seed)?
        .into_iter()
        .map(|ind| {
            let fitness = problem.fitness(&ind);
            Evaluated::new(ind, fitness)
        })
        .collect();
    let best = select_elite(&population, 1)
        .first()
        .copied()
        .ok_or(Error::PopulationTooSmall {
            size: 0,
            required: 1,
        })?;
    info!(size, best = population[best].total(), "random sampling finished");
    Ok(population[best].clone())
}
