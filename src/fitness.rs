//! Fitness model.
//!
//! Scores an individual on three components, each in `[0, 1]` for
//! feasible inputs:
//!
//! | Component | Definition |
//! |-----------|-----------|
//! | Duration | Σ priority · min_duration / duration ÷ Σ priority |
//! | Segment | Σ priority · preferred coverage ÷ Σ priority of experiments with preferences |
//! | Start | Σ priority / (1 + start_slot) ÷ Σ priority |
//!
//! The weighted sum of the components is a comparison key only.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Experiment, ExperimentId, Individual, Schedule, TrafficProfile};

/// Weights of the fitness components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitnessWeights {
    pub duration: f64,
    pub segment: f64,
    pub start: f64,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            duration: 0.4,
            segment: 0.3,
            start: 0.3,
        }
    }
}

impl FitnessWeights {
    pub fn new(duration: f64, segment: f64, start: f64) -> Self {
        Self {
            duration,
            segment,
            start,
        }
    }

    /// Rejects negative or non-finite weights.
    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("duration", self.duration),
            ("segment", self.segment),
            ("start", self.start),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} weight must be a non-negative number, got {w}"
                )));
            }
        }
        Ok(())
    }
}

/// Run context shared by every fitness evaluation.
///
/// Computed once from the experiment set at optimization start, and
/// again after a restart.
#[derive(Debug, Clone)]
pub struct PopulationProperties {
    pub profile: Arc<TrafficProfile>,
    pub min_durations: HashMap<ExperimentId, u32>,
    /// Σ priority over experiments that declare preferred segments.
    pub max_segment_coverage: f64,
    pub priority_sum: f64,
    pub weights: FitnessWeights,
}

impl PopulationProperties {
    pub fn new<'a>(
        profile: Arc<TrafficProfile>,
        experiments: impl IntoIterator<Item = &'a Experiment>,
        weights: FitnessWeights,
    ) -> Self {
        let mut min_durations = HashMap::new();
        let mut max_segment_coverage = 0.0;
        let mut priority_sum = 0.0;
        for e in experiments {
            min_durations.insert(e.id, e.min_duration);
            priority_sum += e.priority as f64;
            if e.has_preferred_segments() {
                max_segment_coverage += e.priority as f64;
            }
        }
        Self {
            profile,
            min_durations,
            max_segment_coverage,
            priority_sum,
            weights,
        }
    }

    fn min_duration(&self, experiment: &Experiment) -> u32 {
        self.min_durations
            .get(&experiment.id)
            .copied()
            .unwrap_or(experiment.min_duration)
    }

    /// Scores a whole individual. Unscheduled experiments contribute nothing.
    pub fn evaluate(&self, individual: &Individual) -> Fitness {
        let mut duration = 0.0;
        let mut coverage = 0.0;
        let mut start = 0.0;

        for (experiment, schedule) in individual.scheduled() {
            let priority = experiment.priority as f64;
            let actual = schedule.duration();
            if actual > 0 {
                duration += priority * self.min_duration(experiment) as f64 / actual as f64;
            }
            start += priority / (1.0 + schedule.start_slot as f64);
            if experiment.has_preferred_segments() {
                coverage += priority
                    * schedule.preferred_coverage(&experiment.preferred_segments, &self.profile);
            }
        }

        let (duration, start) = if self.priority_sum > 0.0 {
            (duration / self.priority_sum, start / self.priority_sum)
        } else {
            (0.0, 0.0)
        };
        let segment = if self.max_segment_coverage > 0.0 {
            coverage / self.max_segment_coverage
        } else {
            1.0
        };

        Fitness {
            duration,
            segment,
            start,
            weights: self.weights,
        }
    }

    /// Scores a single experiment's schedule.
    pub fn evaluate_experiment(&self, experiment: &Experiment, schedule: &Schedule) -> Fitness {
        let actual = schedule.duration();
        let duration = if actual > 0 {
            self.min_duration(experiment) as f64 / actual as f64
        } else {
            0.0
        };
        let segment = if experiment.has_preferred_segments() {
            schedule.preferred_coverage(&experiment.preferred_segments, &self.profile)
        } else {
            1.0
        };
        Fitness {
            duration,
            segment,
            start: 1.0 / (1.0 + schedule.start_slot as f64),
            weights: self.weights,
        }
    }
}

/// Fitness components plus the weights that combine them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Fitness {
    pub duration: f64,
    pub segment: f64,
    pub start: f64,
    pub weights: FitnessWeights,
}

impl Fitness {
    /// Weighted sum of the components.
    #[inline]
    pub fn total(&self) -> f64 {
        self.duration * self.weights.duration
            + self.segment * self.weights.segment
            + self.start * self.weights.start
    }
}

/// One row of the per-generation (or per-iteration) statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub generation: usize,
    pub duration: f64,
    pub segment: f64,
    pub start: f64,
    pub total: f64,
}

impl GenerationStats {
    /// Column names matching [`GenerationStats::to_csv_row`].
    pub const CSV_HEADER: &'static str = "Generation,DurationScore,SegmentScore,StartScore,Total";

    pub fn new(generation: usize, fitness: &Fitness) -> Self {
        Self {
            generation,
            duration: fitness.duration,
            segment: fitness.segment,
            start: fitness.start,
            total: fitness.total(),
        }
    }

    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.generation, self.duration, self.segment, self.start, self.total
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExperimentKind;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn profile() -> Arc<TrafficProfile> {
        Arc::new(TrafficProfile::uniform(49, &[("A", 1000), ("B", 1000)]))
    }

    fn individual(entries: Vec<(Experiment, Schedule)>) -> Individual {
        let mut ind = Individual::empty(&mut SmallRng::seed_from_u64(42));
        for (e, s) in entries {
            ind.insert(Arc::new(e), Some(s));
        }
        ind
    }

    #[test]
    fn test_duration_score_at_minimum_is_one() {
        let e = Experiment::new(1, ExperimentKind::Regression, "svc", 24, 24_000);
        let props = PopulationProperties::new(profile(), [&e], FitnessWeights::default());
        let ind = individual(vec![(e, Schedule::uniform(0, 24, &[("A", 1.0)]))]);

        let f = props.evaluate(&ind);
        assert!((f.duration - 1.0).abs() < 1e-12);
        assert!((f.start - 1.0).abs() < 1e-12);
        // No preferences declared anywhere.
        assert_eq!(f.segment, 1.0);
        assert!((f.total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_scores_are_priority_weighted() {
        let e1 = Experiment::new(1, ExperimentKind::Regression, "svc", 10, 100).with_priority(3);
        let e2 = Experiment::new(2, ExperimentKind::Regression, "svc", 10, 100).with_priority(1);
        let props = PopulationProperties::new(profile(), [&e1, &e2], FitnessWeights::default());
        let ind = individual(vec![
            (e1, Schedule::uniform(0, 10, &[("A", 0.1)])),
            (e2, Schedule::uniform(3, 20, &[("A", 0.1)])),
        ]);

        let f = props.evaluate(&ind);
        assert!((f.duration - (3.0 * 1.0 + 1.0 * 0.5) / 4.0).abs() < 1e-12);
        assert!((f.start - (3.0 + 1.0 / 4.0) / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_segment_score_uses_preferred_priorities() {
        let e1 = Experiment::new(1, ExperimentKind::Regression, "svc", 4, 100)
            .with_priority(2)
            .with_preferred_segments(["A"]);
        let e2 = Experiment::new(2, ExperimentKind::Regression, "svc", 4, 100)
            .with_priority(2)
            .with_preferred_segments(["A"]);
        let e3 = Experiment::new(3, ExperimentKind::Regression, "svc", 4, 100).with_priority(5);
        let props =
            PopulationProperties::new(profile(), [&e1, &e2, &e3], FitnessWeights::default());
        assert_eq!(props.max_segment_coverage, 4.0);

        let ind = individual(vec![
            (e1, Schedule::uniform(0, 4, &[("A", 0.5)])),
            (e2, Schedule::uniform(0, 4, &[("B", 0.5)])),
            (e3, Schedule::uniform(0, 4, &[("A", 0.4)])),
        ]);
        let f = props.evaluate(&ind);
        assert!((f.segment - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_priority_sum_scores_zero() {
        let props = PopulationProperties::new(profile(), [], FitnessWeights::default());
        let ind = Individual::empty(&mut SmallRng::seed_from_u64(42));
        let f = props.evaluate(&ind);
        assert_eq!(f.duration, 0.0);
        assert_eq!(f.start, 0.0);
        assert_eq!(f.segment, 1.0);
    }

    #[test]
    fn test_experiment_fitness() {
        let e = Experiment::new(1, ExperimentKind::Regression, "svc", 12, 100)
            .with_preferred_segments(["B"]);
        let props = PopulationProperties::new(profile(), [&e], FitnessWeights::default());
        let f = props.evaluate_experiment(&e, &Schedule::uniform(1, 24, &[("B", 0.2)]));
        assert!((f.duration - 0.5).abs() < 1e-12);
        assert!((f.segment - 1.0).abs() < 1e-12);
        assert!((f.start - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_weights_validate() {
        assert!(FitnessWeights::default().validate().is_ok());
        assert!(FitnessWeights::new(-0.1, 0.5, 0.5).validate().is_err());
        assert!(FitnessWeights::new(f64::NAN, 0.5, 0.5).validate().is_err());
    }

    #[test]
    fn test_stats_row() {
        let f = Fitness {
            duration: 1.0,
            segment: 0.5,
            start: 0.25,
            weights: FitnessWeights::new(1.0, 1.0, 1.0),
        };
        let row = GenerationStats::new(3, &f).to_csv_row();
        assert_eq!(row, "3,1,0.5,0.25,1.75");
        assert_eq!(GenerationStats::CSV_HEADER.split(',').count(), 5);
    }
}
