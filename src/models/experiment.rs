//! Experiment descriptors.
//!
//! An experiment needs a minimum number of consecutive hours and a total
//! number of requests, spread over the hours according to its demand
//! curve. Experiments are immutable once a run starts; residual versions
//! are derived by the restart planner.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::{ExperimentId, Slot};

/// Experiment category.
///
/// Business experiments must keep the same segment set for their whole
/// schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExperimentKind {
    /// Technical regression test.
    Regression,
    /// Business experiment with a stable audience.
    Business,
}

/// Per-hour traffic demand shape.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "curve", rename_all = "snake_case")]
pub enum DemandCurve {
    /// Same demand every hour.
    #[default]
    Constant,
    /// Linear ramp starting at `start_traffic` requests per hour.
    Gradual {
        /// Demand at hour 0.
        start_traffic: f64,
    },
}

/// An experiment to be scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    /// Stable unique identifier.
    pub id: ExperimentId,
    /// Category.
    #[serde(rename = "type")]
    pub kind: ExperimentKind,
    /// Service the experiment runs on. Experiments sharing a service
    /// share each segment's traffic.
    pub target_service: String,
    /// Minimum number of hours.
    pub min_duration: u32,
    /// Total requests needed over the whole run.
    pub required_total_traffic: u64,
    /// Positive weight in the fitness sums.
    pub priority: u32,
    /// Segments the experiment would rather run on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_segments: Vec<String>,
    /// Demand shape.
    #[serde(default)]
    pub demand: DemandCurve,
    /// Set on experiments carried over from a partially executed run.
    #[serde(skip)]
    pub restarted: bool,
}

impl Experiment {
    /// Creates a constant-demand experiment with priority 1.
    pub fn new(
        id: ExperimentId,
        kind: ExperimentKind,
        target_service: impl Into<String>,
        min_duration: u32,
        required_total_traffic: u64,
    ) -> Self {
        Self {
            id,
            kind,
            target_service: target_service.into(),
            min_duration,
            required_total_traffic,
            priority: 1,
            preferred_segments: Vec::new(),
            demand: DemandCurve::Constant,
            restarted: false,
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the preferred segments.
    pub fn with_preferred_segments<S: Into<String>>(
        mut self,
        segments: impl IntoIterator<Item = S>,
    ) -> Self {
        self.preferred_segments = segments.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the demand curve.
    pub fn with_demand(mut self, demand: DemandCurve) -> Self {
        self.demand = demand;
        self
    }

    /// Marks the experiment as carried over from a previous run.
    pub fn restarted(mut self) -> Self {
        self.restarted = true;
        self
    }

    #[inline]
    pub fn is_business(&self) -> bool {
        self.kind == ExperimentKind::Business
    }

    #[inline]
    pub fn has_preferred_segments(&self) -> bool {
        !self.preferred_segments.is_empty()
    }

    /// Whether `segment` is one of the preferred segments.
    pub fn prefers(&self, segment: &str) -> bool {
        self.preferred_segments.iter().any(|s| s == segment)
    }

    /// Requests needed at relative `hour` of a schedule lasting `duration` hours.
    ///
    /// Constant curves spread the total evenly. Gradual curves ramp
    /// linearly from the start traffic so that the integral over
    /// `[0, duration]` equals the required total. Hours outside
    /// `[0, duration)` need nothing.
    pub fn demand_at(&self, hour: Slot, duration: u32) -> u64 {
        if duration == 0 || hour >= duration {
            return 0;
        }
        let total = self.required_total_traffic as f64;
        let d = duration as f64;
        let value = match self.demand {
            DemandCurve::Constant => total / d,
            DemandCurve::Gradual { start_traffic } => {
                2.0 * (total - start_traffic * d) * hour as f64 / (d * d) + start_traffic
            }
        };
        value.round().max(0.0) as u64
    }
}

impl PartialEq for Experiment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.target_service == other.target_service
            && self.min_duration == other.min_duration
            && self.required_total_traffic == other.required_total_traffic
            && self.priority == other.priority
            && self.demand == other.demand
    }
}

impl Eq for Experiment {}

impl Hash for Experiment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.kind.hash(state);
        self.target_service.hash(state);
        self.min_duration.hash(state);
        self.required_total_traffic.hash(state);
        self.priority.hash(state);
        if let DemandCurve::Gradual { start_traffic } = self.demand {
            // -0.0 == 0.0, so both must hash alike.
            let start_traffic = if start_traffic == 0.0 { 0.0 } else { start_traffic };
            start_traffic.to_bits().hash(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_demand_is_uniform() {
        let e = Experiment::new(1, ExperimentKind::Regression, "svc", 24, 24_000);
        let values: Vec<u64> = (0..24).map(|h| e.demand_at(h, 24)).collect();
        assert!(values.iter().all(|&v| v == 1000));

        // Non-divisible totals stay within one request of each other.
        let e = Experiment::new(2, ExperimentKind::Regression, "svc", 7, 1000);
        let values: Vec<u64> = (0..7).map(|h| e.demand_at(h, 7)).collect();
        let min = *values.iter().min().unwrap();
        let max = *values.iter().max().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn test_demand_outside_duration_is_zero() {
        let e = Experiment::new(1, ExperimentKind::Regression, "svc", 24, 24_000);
        assert_eq!(e.demand_at(24, 24), 0);
        assert_eq!(e.demand_at(0, 0), 0);
    }

    #[test]
    fn test_gradual_demand_integral() {
        let e = Experiment::new(1, ExperimentKind::Business, "svc", 24, 24_000)
            .with_demand(DemandCurve::Gradual { start_traffic: 990.0 });
        let sum: u64 = (0..24).map(|h| e.demand_at(h, 24)).sum();
        assert!((sum as i64 - 24_000).abs() <= 24, "sum = {sum}");

        // The ramp rises when the start traffic is below the average.
        assert!(e.demand_at(23, 24) > e.demand_at(0, 24));
        assert_eq!(e.demand_at(0, 24), 990);
    }

    #[test]
    fn test_gradual_demand_clamps_negative() {
        let e = Experiment::new(1, ExperimentKind::Regression, "svc", 10, 100)
            .with_demand(DemandCurve::Gradual { start_traffic: 50.0 });
        // The ramp falls below zero before the end.
        assert_eq!(e.demand_at(9, 10), 0);
    }

    #[test]
    fn test_equality_ignores_restart_flag_and_preferences() {
        let a = Experiment::new(1, ExperimentKind::Business, "svc", 10, 100);
        let b = a.clone().restarted().with_preferred_segments(["A"]);
        assert_eq!(a, b);

        let c = a.clone().with_priority(3);
        assert_ne!(a, c);

        let d = a.clone().with_demand(DemandCurve::Gradual { start_traffic: 1.0 });
        assert_ne!(a, d);
    }

    #[test]
    fn test_signed_zero_start_traffic_hashes_alike() {
        use std::collections::hash_map::DefaultHasher;

        fn hash_of(e: &Experiment) -> u64 {
            let mut h = DefaultHasher::new();
            e.hash(&mut h);
            h.finish()
        }

        let base = Experiment::new(1, ExperimentKind::Regression, "svc", 10, 100);
        let pos = base.clone().with_demand(DemandCurve::Gradual { start_traffic: 0.0 });
        let neg = base.with_demand(DemandCurve::Gradual { start_traffic: -0.0 });
        assert_eq!(pos, neg);
        assert_eq!(hash_of(&pos), hash_of(&neg));

        let set: std::collections::HashSet<_> = [pos, neg].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_serde_shape() {
        let e = Experiment::new(4, ExperimentKind::Business, "checkout", 48, 5000)
            .with_priority(2)
            .with_demand(DemandCurve::Gradual { start_traffic: 12.5 })
            .restarted();
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "Business");
        assert_eq!(json["demand"]["curve"], "gradual");
        assert_eq!(json["demand"]["start_traffic"], 12.5);
        assert!(json.get("restarted").is_none());

        let back: Experiment = serde_json::from_value(json).unwrap();
        assert_eq!(back, e);
        assert!(!back.restarted);
    }

    #[test]
    fn test_deserialize_defaults_to_constant() {
        let json = r#"{"id":1,"type":"Regression","target_service":"s",
                       "min_duration":2,"required_total_traffic":10,"priority":1}"#;
        let e: Experiment = serde_json::from_str(json).unwrap();
        assert_eq!(e.demand, DemandCurve::Constant);
        assert!(e.preferred_segments.is_empty());
    }
}
