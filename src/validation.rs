//! Feasibility checks for candidate solutions.
//!
//! An individual is feasible when all of the following hold:
//! 1. No over-allocation: per service, segment and hour, the fractions of
//!    all experiments on that service sum to at most 1.0
//! 2. Business experiments use the same segment set at every hour
//! 3. Every schedule lasts at least the minimum duration and meets its
//!    demand curve at every hour
//! 4. No schedule is interrupted (hour gap or an hour without traffic)
//!
//! Checking stops at the first violation. The violation is reported for
//! diagnostics only; callers that need a yes/no answer use [`is_valid`].

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::models::{ExperimentId, Individual, Slot, TrafficProfile};

/// Tolerance on the per-segment fraction sum.
pub const ALLOCATION_EPSILON: f64 = 1e-9;

/// Result of a feasibility check.
pub type FeasibilityResult = Result<(), Violation>;

/// The first constraint a candidate failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// An experiment has no schedule.
    Unscheduled { experiment: ExperimentId },
    /// Hours are not contiguous or an hour carries no traffic.
    Interrupted { experiment: ExperimentId, hour: Slot },
    /// A service's experiments take more than the whole segment.
    OverAllocation {
        service: String,
        segment: String,
        hour: Slot,
        total: f64,
    },
    /// A business experiment changed its segment set.
    UnstableSegments { experiment: ExperimentId, hour: Slot },
    /// Schedule shorter than the minimum duration.
    TooShort {
        experiment: ExperimentId,
        duration: u32,
        min_duration: u32,
    },
    /// Consumed traffic below the demand curve.
    InsufficientTraffic {
        experiment: ExperimentId,
        hour: Slot,
        consumed: u64,
        demand: u64,
    },
    /// The profile has no traffic for a scheduled hour/segment.
    MissingTraffic {
        experiment: ExperimentId,
        hour: Slot,
        segment: String,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Unscheduled { experiment } => {
                write!(f, "experiment {experiment} is not scheduled")
            }
            Violation::Interrupted { experiment, hour } => {
                write!(f, "experiment {experiment} is interrupted at hour {hour}")
            }
            Violation::OverAllocation {
                service,
                segment,
                hour,
                total,
            } => write!(
                f,
                "service '{service}' allocates {total:.4} of segment '{segment}' at hour {hour}"
            ),
            Violation::UnstableSegments { experiment, hour } => write!(
                f,
                "business experiment {experiment} changes segments at hour {hour}"
            ),
            Violation::TooShort {
                experiment,
                duration,
                min_duration,
            } => write!(
                f,
                "experiment {experiment} runs {duration}h, needs at least {min_duration}h"
            ),
            Violation::InsufficientTraffic {
                experiment,
                hour,
                consumed,
                demand,
            } => write!(
                f,
                "experiment {experiment} gets {consumed} requests at hour {hour}, needs {demand}"
            ),
            Violation::MissingTraffic {
                experiment,
                hour,
                segment,
            } => write!(
                f,
                "experiment {experiment} uses segment '{segment}' at hour {hour} outside the profile"
            ),
        }
    }
}

/// Runs every check, stopping at the first violation.
pub fn validate(individual: &Individual, profile: &TrafficProfile) -> FeasibilityResult {
    check_scheduled(individual)?;
    check_interruptions(individual)?;
    check_allocation(individual)?;
    check_business_segments(individual)?;
    check_min_traffic(individual, profile)?;
    Ok(())
}

/// Whether `individual` is feasible on `profile`.
pub fn is_valid(individual: &Individual, profile: &TrafficProfile) -> bool {
    match validate(individual, profile) {
        Ok(()) => true,
        Err(violation) => {
            trace!(individual = %individual.id(), %violation, "candidate rejected");
            false
        }
    }
}

fn check_scheduled(individual: &Individual) -> FeasibilityResult {
    match individual.unscheduled().next() {
        Some(e) => Err(Violation::Unscheduled { experiment: e.id }),
        None => Ok(()),
    }
}

/// Check 4: contiguous hours, each carrying traffic.
pub fn check_interruptions(individual: &Individual) -> FeasibilityResult {
    for (experiment, schedule) in individual.scheduled() {
        if let Some(hour) = schedule.first_interruption() {
            return Err(Violation::Interrupted {
                experiment: experiment.id,
                hour,
            });
        }
    }
    Ok(())
}

/// Check 1: per service, segment and hour, fractions sum to at most 1.
pub fn check_allocation(individual: &Individual) -> FeasibilityResult {
    let mut totals: HashMap<(&str, &str, Slot), f64> = HashMap::new();
    for (experiment, schedule) in individual.scheduled() {
        for a in &schedule.assignments {
            for (segment, &fraction) in &a.traffic {
                let total = totals
                    .entry((experiment.target_service.as_str(), segment.as_str(), a.hour))
                    .or_insert(0.0);
                *total += fraction;
                if *total > 1.0 + ALLOCATION_EPSILON {
                    return Err(Violation::OverAllocation {
                        service: experiment.target_service.clone(),
                        segment: segment.clone(),
                        hour: a.hour,
                        total: *total,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Check 2: business experiments keep one segment set.
pub fn check_business_segments(individual: &Individual) -> FeasibilityResult {
    for (experiment, schedule) in individual.scheduled() {
        if !experiment.is_business() {
            continue;
        }
        let Some(first) = schedule.assignments.first() else {
            continue;
        };
        let expected = first.active_segments();
        if let Some(a) = schedule
            .assignments
            .iter()
            .skip(1)
            .find(|a| a.active_segments() != expected)
        {
            return Err(Violation::UnstableSegments {
                experiment: experiment.id,
                hour: a.hour,
            });
        }
    }
    Ok(())
}

/// Check 3: minimum duration and per-hour demand.
pub fn check_min_traffic(individual: &Individual, profile: &TrafficProfile) -> FeasibilityResult {
    for (experiment, schedule) in individual.scheduled() {
        let duration = schedule.duration();
        if duration < experiment.min_duration {
            return Err(Violation::TooShort {
                experiment: experiment.id,
                duration,
                min_duration: experiment.min_duration,
            });
        }
        for (i, a) in schedule.assignments.iter().enumerate() {
            let per_segment = a.consumed_by_segment(profile).map_err(|segment| {
                Violation::MissingTraffic {
                    experiment: experiment.id,
                    hour: a.hour,
                    segment: segment.to_string(),
                }
            })?;
            let consumed: u64 = per_segment.iter().map(|(_, c)| c).sum();
            let demand = experiment.demand_at(i as Slot, duration);
            if consumed < demand {
                return Err(Violation::InsufficientTraffic {
                    experiment: experiment.id,
                    hour: a.hour,
                    consumed,
                    demand,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;
    use crate::models::{Assignment, Experiment, ExperimentKind, Schedule};

    fn profile() -> TrafficProfile {
        TrafficProfile::uniform(49, &[("A", 1000), ("B", 1000)])
    }

    fn individual(entries: Vec<(Experiment, Schedule)>) -> Individual {
        let mut ind = Individual::empty(&mut SmallRng::seed_from_u64(42));
        for (e, s) in entries {
            ind.insert(Arc::new(e), Some(s));
        }
        ind
    }

    fn small(id: u32, kind: ExperimentKind) -> Experiment {
        Experiment::new(id, kind, "svc", 2, 200)
    }

    #[test]
    fn test_scenario_a_exact_fit_is_valid() {
        let e = Experiment::new(1, ExperimentKind::Regression, "svc", 24, 24_000);
        let ind = individual(vec![(e, Schedule::uniform(0, 24, &[("A", 1.0)]))]);
        assert_eq!(validate(&ind, &profile()), Ok(()));
        assert!(is_valid(&ind, &profile()));
    }

    #[test]
    fn test_scenario_b_over_allocation() {
        let ind = individual(vec![
            (small(1, ExperimentKind::Regression), Schedule::uniform(0, 2, &[("A", 0.6)])),
            (small(2, ExperimentKind::Regression), Schedule::uniform(0, 2, &[("A", 0.6)])),
        ]);
        assert!(matches!(
            validate(&ind, &profile()),
            Err(Violation::OverAllocation { hour: 0, .. })
        ));
        assert!(!is_valid(&ind, &profile()));
    }

    #[test]
    fn test_other_service_does_not_share_segment() {
        let mut other = small(2, ExperimentKind::Regression);
        other.target_service = "other".into();
        let ind = individual(vec![
            (small(1, ExperimentKind::Regression), Schedule::uniform(0, 2, &[("A", 0.6)])),
            (other, Schedule::uniform(0, 2, &[("A", 0.6)])),
        ]);
        assert!(is_valid(&ind, &profile()));
    }

    #[test]
    fn test_scenario_c_business_segment_swap() {
        let s = Schedule::new(
            0,
            vec![
                Assignment::new(0).with_segment("A", 0.2),
                Assignment::new(1).with_segment("B", 0.2),
            ],
        );
        let ind = individual(vec![(small(1, ExperimentKind::Business), s.clone())]);
        assert!(matches!(
            validate(&ind, &profile()),
            Err(Violation::UnstableSegments { hour: 1, .. })
        ));

        // The same swap is fine for a regression experiment.
        let ind = individual(vec![(small(1, ExperimentKind::Regression), s)]);
        assert!(is_valid(&ind, &profile()));
    }

    #[test]
    fn test_business_ignores_zero_fraction_entries() {
        let s = Schedule::new(
            0,
            vec![
                Assignment::new(0).with_segment("A", 0.2),
                Assignment::new(1).with_segment("A", 0.2).with_segment("B", 0.0),
            ],
        );
        let ind = individual(vec![(small(1, ExperimentKind::Business), s)]);
        assert!(is_valid(&ind, &profile()));
    }

    #[test]
    fn test_too_short() {
        let ind = individual(vec![(
            small(1, ExperimentKind::Regression),
            Schedule::uniform(0, 1, &[("A", 0.5)]),
        )]);
        assert!(matches!(
            validate(&ind, &profile()),
            Err(Violation::TooShort { duration: 1, min_duration: 2, .. })
        ));
    }

    #[test]
    fn test_insufficient_traffic() {
        // Needs 100 per hour, gets 99.
        let ind = individual(vec![(
            small(1, ExperimentKind::Regression),
            Schedule::uniform(0, 2, &[("A", 0.099)]),
        )]);
        assert!(matches!(
            validate(&ind, &profile()),
            Err(Violation::InsufficientTraffic { consumed: 99, demand: 100, .. })
        ));
    }

    #[test]
    fn test_scenario_d_gap_is_invalid() {
        let s = Schedule::new(
            5,
            vec![
                Assignment::new(5).with_segment("A", 0.5),
                Assignment::new(7).with_segment("A", 0.5),
            ],
        );
        assert!(s.is_interrupted());
        let ind = individual(vec![(small(1, ExperimentKind::Regression), s)]);
        assert!(matches!(
            validate(&ind, &profile()),
            Err(Violation::Interrupted { hour: 6, .. })
        ));
    }

    #[test]
    fn test_missing_profile_hour() {
        let ind = individual(vec![(
            small(1, ExperimentKind::Regression),
            Schedule::uniform(48, 2, &[("A", 0.5)]),
        )]);
        assert!(matches!(
            validate(&ind, &profile()),
            Err(Violation::MissingTraffic { hour: 49, .. })
        ));
    }

    #[test]
    fn test_unscheduled_is_invalid() {
        let mut ind = Individual::empty(&mut SmallRng::seed_from_u64(42));
        ind.insert(Arc::new(small(9, ExperimentKind::Regression)), None);
        assert_eq!(
            validate(&ind, &profile()),
            Err(Violation::Unscheduled { experiment: 9 })
        );
    }

    #[test]
    fn test_each_check_fails_in_isolation() {
        let p = profile();
        let ok = || Schedule::uniform(0, 2, &[("A", 0.5)]);

        let over = individual(vec![
            (small(1, ExperimentKind::Regression), ok()),
            (small(2, ExperimentKind::Regression), ok()),
            (small(3, ExperimentKind::Regression), Schedule::uniform(0, 2, &[("A", 0.1)])),
        ]);
        assert!(check_interruptions(&over).is_ok());
        assert!(check_business_segments(&over).is_ok());
        assert!(check_min_traffic(&over, &p).is_ok());
        assert!(check_allocation(&over).is_err());

        let unstable = individual(vec![(
            small(1, ExperimentKind::Business),
            Schedule::new(
                0,
                vec![
                    Assignment::new(0).with_segment("A", 0.5),
                    Assignment::new(1).with_segment("A", 0.5).with_segment("B", 0.1),
                ],
            ),
        )]);
        assert!(check_interruptions(&unstable).is_ok());
        assert!(check_allocation(&unstable).is_ok());
        assert!(check_min_traffic(&unstable, &p).is_ok());
        assert!(check_business_segments(&unstable).is_err());

        let starved = individual(vec![(
            small(1, ExperimentKind::Regression),
            Schedule::uniform(0, 2, &[("A", 0.05)]),
        )]);
        assert!(check_interruptions(&starved).is_ok());
        assert!(check_allocation(&starved).is_ok());
        assert!(check_business_segments(&starved).is_ok());
        assert!(check_min_traffic(&starved, &p).is_err());

        // Three hours with the middle one idle: long enough, every
        // traffic-carrying hour above demand.
        let mut idle = Schedule::uniform(0, 3, &[("A", 0.5)]);
        idle.assignments[1].traffic.insert("A".into(), 0.0);
        let interrupted = individual(vec![(
            Experiment::new(1, ExperimentKind::Regression, "svc", 2, 0),
            idle,
        )]);
        assert!(check_allocation(&interrupted).is_ok());
        assert!(check_business_segments(&interrupted).is_ok());
        assert!(check_min_traffic(&interrupted, &p).is_ok());
        assert!(check_interruptions(&interrupted).is_err());

        for ind in [&over, &unstable, &starved, &interrupted] {
            assert!(!is_valid(ind, &p));
        }
    }
}
