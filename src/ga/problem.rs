//! Read-only run context.
//!
//! Bundles the traffic profile, the global segment list, the fitness
//! context and the configuration. Shared by reference between all
//! operators and workers of a run.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::fitness::{Fitness, PopulationProperties};
use crate::models::{Experiment, Individual, TrafficProfile};
use crate::validation;

/// Everything operators need besides the individual they act on.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use traffic_alloc::config::EngineConfig;
/// use traffic_alloc::ga::SchedulingProblem;
/// use traffic_alloc::models::{Experiment, ExperimentKind, TrafficProfile};
///
/// let profile = Arc::new(TrafficProfile::uniform(48, &[("A", 1000), ("B", 1000)]));
/// let experiments = vec![Experiment::new(1, ExperimentKind::Regression, "svc", 24, 24_000)];
/// let problem = SchedulingProblem::new(profile, &experiments, EngineConfig::default()).unwrap();
/// assert_eq!(problem.segments(), ["A", "B"]);
/// ```
#[derive(Debug, Clone)]
pub struct SchedulingProblem {
    profile: Arc<TrafficProfile>,
    segments: Vec<String>,
    props: PopulationProperties,
    config: EngineConfig,
}

impl SchedulingProblem {
    /// Builds the context for a run over `experiments`.
    pub fn new<'a>(
        profile: Arc<TrafficProfile>,
        experiments: impl IntoIterator<Item = &'a Experiment>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let experiments: Vec<&Experiment> = experiments.into_iter().collect();
        if experiments.is_empty() {
            return Err(Error::EmptyExperimentSet);
        }
        let segments = profile.segments();
        let props = PopulationProperties::new(profile.clone(), experiments, config.weights);
        Ok(Self {
            profile,
            segments,
            props,
            config,
        })
    }

    /// Builds the context from the experiments of an individual.
    pub fn for_individual(
        profile: Arc<TrafficProfile>,
        individual: &Individual,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::new(profile, individual.experiments().map(|e| e.as_ref()), config)
    }

    #[inline]
    pub fn profile(&self) -> &TrafficProfile {
        &self.profile
    }

    /// Shared handle to the profile.
    pub fn profile_arc(&self) -> Arc<TrafficProfile> {
        self.profile.clone()
    }

    /// Sorted segment names of the profile.
    #[inline]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    #[inline]
    pub fn properties(&self) -> &PopulationProperties {
        &self.props
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn fitness(&self, individual: &Individual) -> Fitness {
        self.props.evaluate(individual)
    }

    pub fn is_valid(&self, individual: &Individual) -> bool {
        validation::is_valid(individual, &self.profile)
    }
}
