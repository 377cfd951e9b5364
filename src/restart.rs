//! Restart planning.
//!
//! A restart resumes optimization from a partially executed schedule. The
//! planner charges every experiment with what it consumed before the
//! cutoff, drops the satisfied ones, and re-indexes the traffic profile so
//! that the cutoff becomes hour 0. The resulting seed individual is then
//! spread into a population by [`population_for_restart`].

use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::ga::SchedulingProblem;
use crate::models::{DemandCurve, Experiment, ExperimentId, Individual, Schedule, Slot, TrafficProfile};
use crate::sampling::place_experiment;

/// Added to every kept fraction so rounding cannot undercut a running allocation.
pub const REBASE_BUFFER: f64 = 0.0001;

/// Salt separating restart population seeds from other seeds.
const RESTART_ROUND: usize = usize::MAX - 1;

/// Reduced problem derived from a prior run.
#[derive(Debug, Clone)]
pub struct RestartPlan {
    /// Residual and new experiments. Carried experiments keep their prior
    /// schedule in the prior run's hours; new ones are unscheduled.
    pub seed: Individual,
    /// Profile re-indexed so that `cutoff` is hour 0.
    pub profile: TrafficProfile,
    /// Hour of the prior run where the restart happens.
    pub cutoff: Slot,
}

impl RestartPlan {
    /// Run context over the residual problem.
    pub fn problem(&self, config: crate::config::EngineConfig) -> Result<SchedulingProblem> {
        SchedulingProblem::for_individual(Arc::new(self.profile.clone()), &self.seed, config)
    }
}

/// Residual requirements of one experiment after `cutoff`.
///
/// Returns `None` when the experiment already met both its traffic and
/// its duration before the cutoff. `Err` carries a segment the profile
/// does not know.
fn residual(
    experiment: &Experiment,
    schedule: &Schedule,
    profile: &TrafficProfile,
    cutoff: Slot,
) -> Result<Option<Experiment>> {
    let mut consumed: u64 = 0;
    let mut hours: u32 = 0;
    for assignment in schedule.before(cutoff) {
        let per_segment = assignment.consumed_by_segment(profile).map_err(|segment| {
            Error::Restart(format!(
                "experiment {} uses segment {segment} at hour {}, not in the profile",
                experiment.id, assignment.hour
            ))
        })?;
        consumed += per_segment.iter().map(|(_, c)| c).sum::<u64>();
        hours += 1;
    }

    debug!(
        experiment = experiment.id,
        consumed,
        hours,
        required = experiment.required_total_traffic,
        "consumption before cutoff"
    );

    if consumed >= experiment.required_total_traffic && hours >= experiment.min_duration {
        return Ok(None);
    }

    let running = schedule.start_slot < cutoff;
    let mut rest = experiment.clone();
    rest.min_duration = experiment.min_duration.saturating_sub(hours);
    rest.required_total_traffic = experiment.required_total_traffic.saturating_sub(consumed);
    rest.restarted = running;
    if running && matches!(experiment.demand, DemandCurve::Gradual { .. }) {
        let at_cutoff = experiment.demand_at(cutoff - schedule.start_slot, schedule.duration());
        rest.demand = DemandCurve::Gradual {
            start_traffic: at_cutoff as f64,
        };
    }
    debug!(
        experiment = rest.id,
        min_duration = rest.min_duration,
        required = rest.required_total_traffic,
        restarted = rest.restarted,
        "residual experiment"
    );
    Ok(Some(rest))
}

/// Derives the residual problem of `prior` at `cutoff`.
///
/// Experiments in `discarded`, experiments whose schedule ends by the
/// cutoff and experiments that are already satisfied are dropped. Every
/// other experiment is carried with its consumption subtracted; it is
/// marked restarted when it had started before the cutoff. `new_experiments`
/// are added unscheduled. The seed individual's identity is drawn from `rng`.
pub fn prepare_restart<R: Rng + ?Sized>(
    prior: &Individual,
    profile: &TrafficProfile,
    new_experiments: &[Experiment],
    discarded: &[ExperimentId],
    cutoff: Slot,
    rng: &mut R,
) -> Result<RestartPlan> {
    if cutoff == 0 {
        return Err(Error::Restart("cutoff must be a positive hour".to_string()));
    }
    if cutoff as usize >= profile.horizon() {
        return Err(Error::Restart(format!(
            "cutoff {cutoff} is beyond the {}-hour profile",
            profile.horizon()
        )));
    }

    let discarded: HashSet<ExperimentId> = discarded.iter().copied().collect();
    let mut seed = Individual::empty(rng);

    for experiment in new_experiments {
        seed.insert(Arc::new(experiment.clone()), None);
    }

    let mut dropped = 0usize;
    for planned in prior.iter() {
        let experiment = &planned.experiment;
        if discarded.contains(&experiment.id) {
            dropped += 1;
            continue;
        }
        let Some(schedule) = planned.schedule.as_ref() else {
            seed.insert(experiment.clone(), None);
            continue;
        };
        if schedule.end_slot() <= cutoff {
            dropped += 1;
            continue;
        }
        match residual(experiment, schedule, profile, cutoff)? {
            Some(rest) => seed.insert(Arc::new(rest), Some(schedule.clone())),
            None => dropped += 1,
        }
    }

    if seed.is_empty() {
        return Err(Error::Restart(format!(
            "nothing left to schedule after hour {cutoff}"
        )));
    }

    info!(
        cutoff,
        carried = seed.scheduled().count(),
        new = new_experiments.len(),
        dropped,
        "restart prepared"
    );
    Ok(RestartPlan {
        seed,
        profile: profile.shifted(cutoff),
        cutoff,
    })
}

/// `size` feasible individuals over the residual problem of `plan`.
///
/// Restarted business experiments keep their remaining assignments,
/// re-indexed to the shifted profile. The first individual keeps the
/// remaining assignments of every carried experiment. Everything else is
/// sampled anew. A kept schedule that is not feasible in its individual is
/// replaced by a sampled one.
pub fn population_for_restart(
    problem: &SchedulingProblem,
    plan: &RestartPlan,
    size: usize,
    seed: u64,
) -> Result<Vec<Individual>> {
    let experiments: Vec<Arc<Experiment>> = plan.seed.experiments().cloned().collect();
    if experiments.is_empty() {
        return Err(Error::EmptyExperimentSet);
    }

    (0..size)
        .into_par_iter()
        .map(|item| {
            let mut rng = crate::ga::slot_rng(seed, RESTART_ROUND, item);
            let mut individual = Individual::empty(&mut rng);
            let mut order = experiments.clone();
            order.shuffle(&mut rng);

            for experiment in &order {
                let keep = item == 0 || (experiment.restarted && experiment.is_business());
                let first = plan
                    .seed
                    .schedule(experiment.id)
                    .filter(|_| keep)
                    .and_then(|s| s.rebased(plan.cutoff, REBASE_BUFFER));
                place_experiment(
                    &mut individual,
                    experiment,
                    first,
                    problem,
                    0,
                    experiments.len(),
                    &mut rng,
                )?;
            }
            debug!(item, "restart individual created");
            Ok(individual)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    use super::*;
    use crate::config::EngineConfig;
    use crate::models::ExperimentKind;

    fn profile() -> TrafficProfile {
        TrafficProfile::uniform(400, &[("A", 1000), ("B", 1000)])
    }

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(42)
    }

    fn prior(experiments: Vec<(Experiment, Schedule)>) -> Individual {
        let mut ind = Individual::new(Uuid::nil());
        for (e, s) in experiments {
            ind.insert(Arc::new(e), Some(s));
        }
        ind
    }

    #[test]
    fn test_residual_requirements() {
        // 500 requests per hour, 10 hours before the cutoff.
        let e = Experiment::new(1, ExperimentKind::Regression, "svc", 20, 10_000);
        let ind = prior(vec![(e, Schedule::uniform(0, 20, &[("A", 0.5)]))]);

        let plan = prepare_restart(&ind, &profile(), &[], &[], 10, &mut rng()).unwrap();
        let rest = plan.seed.experiment(1).unwrap();
        assert_eq!(rest.min_duration, 10);
        assert_eq!(rest.required_total_traffic, 5_000);
        assert!(rest.restarted);
        assert_eq!(plan.profile.horizon(), 390);
        assert_eq!(plan.seed.schedule(1).unwrap().start_slot, 0);
    }

    #[test]
    fn test_seed_identity_follows_rng() {
        let e = Experiment::new(1, ExperimentKind::Regression, "svc", 20, 10_000);
        let ind = prior(vec![(e, Schedule::uniform(0, 20, &[("A", 0.5)]))]);

        let a = prepare_restart(&ind, &profile(), &[], &[], 10, &mut rng()).unwrap();
        let b = prepare_restart(&ind, &profile(), &[], &[], 10, &mut rng()).unwrap();
        assert_eq!(a.seed.id(), b.seed.id());
        assert_ne!(a.seed.id(), ind.id());

        let other =
            prepare_restart(&ind, &profile(), &[], &[], 10, &mut SmallRng::seed_from_u64(7))
                .unwrap();
        assert_ne!(a.seed.id(), other.seed.id());
    }

    #[test]
    fn test_gradual_ramp_continues() {
        let e = Experiment::new(1, ExperimentKind::Regression, "svc", 24, 24_000)
            .with_demand(DemandCurve::Gradual { start_traffic: 100.0 });
        let ind = prior(vec![(e, Schedule::uniform(0, 24, &[("A", 1.0)]))]);

        let plan = prepare_restart(&ind, &profile(), &[], &[], 6, &mut rng()).unwrap();
        let rest = plan.seed.experiment(1).unwrap();
        assert_eq!(rest.demand, DemandCurve::Gradual { start_traffic: 550.0 });
    }

    #[test]
    fn test_pending_experiment_is_not_restarted() {
        let e = Experiment::new(2, ExperimentKind::Business, "svc", 24, 24_000)
            .with_demand(DemandCurve::Gradual { start_traffic: 100.0 });
        let ind = prior(vec![(e, Schedule::uniform(50, 24, &[("A", 1.0)]))]);

        let plan = prepare_restart(&ind, &profile(), &[], &[], 10, &mut rng()).unwrap();
        let rest = plan.seed.experiment(2).unwrap();
        assert!(!rest.restarted);
        assert_eq!(rest.min_duration, 24);
        assert_eq!(rest.required_total_traffic, 24_000);
        assert_eq!(rest.demand, DemandCurve::Gradual { start_traffic: 100.0 });
    }

    #[test]
    fn test_dropped_experiments() {
        let finished = Experiment::new(1, ExperimentKind::Regression, "svc", 5, 1_000);
        let satisfied = Experiment::new(2, ExperimentKind::Regression, "svc", 5, 1_000);
        let discarded = Experiment::new(3, ExperimentKind::Regression, "svc", 50, 50_000);
        let kept = Experiment::new(4, ExperimentKind::Regression, "other", 50, 50_000);
        let ind = prior(vec![
            (finished, Schedule::uniform(0, 5, &[("A", 0.5)])),
            (satisfied, Schedule::uniform(0, 30, &[("B", 0.5)])),
            (discarded, Schedule::uniform(0, 50, &[("A", 0.1)])),
            (kept, Schedule::uniform(0, 60, &[("A", 0.1)])),
        ]);
        let fresh = Experiment::new(9, ExperimentKind::Business, "svc", 24, 1_000);

        let plan = prepare_restart(&ind, &profile(), &[fresh], &[3], 10, &mut rng()).unwrap();
        let ids: Vec<_> = plan.seed.ids().collect();
        assert_eq!(ids, vec![4, 9]);
        assert!(plan.seed.schedule(9).is_none());
        assert_eq!(plan.seed.experiment(4).unwrap().required_total_traffic, 49_000);
    }

    #[test]
    fn test_no_restart_possible() {
        let e = Experiment::new(1, ExperimentKind::Regression, "svc", 5, 1_000);
        let ind = prior(vec![(e, Schedule::uniform(0, 5, &[("A", 0.5)]))]);

        assert!(matches!(
            prepare_restart(&ind, &profile(), &[], &[], 0, &mut rng()),
            Err(Error::Restart(_))
        ));
        assert!(matches!(
            prepare_restart(&ind, &profile(), &[], &[], 10, &mut rng()),
            Err(Error::Restart(_))
        ));
        assert!(matches!(
            prepare_restart(&ind, &profile(), &[], &[], 400, &mut rng()),
            Err(Error::Restart(_))
        ));
    }

    #[test]
    fn test_unknown_segment_is_rejected() {
        let e = Experiment::new(1, ExperimentKind::Regression, "svc", 20, 10_000);
        let ind = prior(vec![(e, Schedule::uniform(0, 20, &[("Z", 0.5)]))]);
        assert!(matches!(
            prepare_restart(&ind, &profile(), &[], &[], 10, &mut rng()),
            Err(Error::Restart(_))
        ));
    }

    #[test]
    fn test_restart_population_keeps_running_business() {
        let business = Experiment::new(1, ExperimentKind::Business, "svc", 30, 15_000);
        let regression = Experiment::new(2, ExperimentKind::Regression, "search", 30, 15_000);
        let ind = prior(vec![
            (business, Schedule::uniform(0, 30, &[("A", 0.5)])),
            (regression, Schedule::uniform(5, 30, &[("B", 0.5)])),
        ]);
        let fresh = Experiment::new(3, ExperimentKind::Regression, "checkout", 24, 12_000);

        let plan = prepare_restart(&ind, &profile(), &[fresh], &[], 10, &mut rng()).unwrap();
        let problem = plan.problem(EngineConfig::default()).unwrap();
        let population = population_for_restart(&problem, &plan, 4, 42).unwrap();

        assert_eq!(population.len(), 4);
        for (item, individual) in population.iter().enumerate() {
            assert!(problem.is_valid(individual), "individual {item} infeasible");
            assert_eq!(individual.len(), 3);
            let kept = individual.schedule(1).unwrap();
            assert_eq!(kept.start_slot, 0);
            assert_eq!(kept.duration(), 20);
            assert_eq!(kept.segments().into_iter().collect::<Vec<_>>(), vec!["A"]);
            assert!((kept.assignments[0].fraction("A") - 0.5001).abs() < 1e-9);
        }
        let first = population[0].schedule(2).unwrap();
        assert_eq!(first.start_slot, 0);
        assert_eq!(first.duration(), 25);
    }
}
