//! Candidate global solutions.
//!
//! An [`Individual`] holds one optional schedule per experiment, keyed by
//! experiment id. Experiments are shared through `Arc` and never mutated;
//! schedules are owned, so cloning an individual deep-copies every
//! schedule and two clones can be mutated independently.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Experiment, ExperimentId, Schedule};

/// One experiment and its schedule inside an individual.
#[derive(Debug, Clone, PartialEq)]
pub struct Planned {
    pub experiment: Arc<Experiment>,
    /// `None` until the experiment has been scheduled.
    pub schedule: Option<Schedule>,
}

/// A candidate schedule for every experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "IndividualRecord", from = "IndividualRecord")]
pub struct Individual {
    id: Uuid,
    entries: BTreeMap<ExperimentId, Planned>,
    mutation_count: u64,
    crossover_count: u64,
}

impl Individual {
    /// Creates an empty individual with the given identity.
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            entries: BTreeMap::new(),
            mutation_count: 0,
            crossover_count: 0,
        }
    }

    /// Draws an identity from `rng`, so seeded runs get stable ids.
    pub fn fresh_id<R: Rng + ?Sized>(rng: &mut R) -> Uuid {
        uuid::Builder::from_random_bytes(rng.random()).into_uuid()
    }

    /// Empty individual with an identity drawn from `rng`.
    pub fn empty<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::new(Self::fresh_id(rng))
    }

    /// Deep copy under a new identity. Lineage counters are kept.
    pub fn clone_with_id(&self, id: Uuid) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    #[inline]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[inline]
    pub fn mutation_count(&self) -> u64 {
        self.mutation_count
    }

    #[inline]
    pub fn crossover_count(&self) -> u64 {
        self.crossover_count
    }

    /// Overwrites both lineage counters.
    pub fn set_lineage(&mut self, mutations: u64, crossovers: u64) {
        self.mutation_count = mutations;
        self.crossover_count = crossovers;
    }

    /// Adds `n` applied mutations to the lineage.
    pub fn record_mutations(&mut self, n: u64) {
        self.mutation_count += n;
    }

    /// Inserts or replaces an experiment's entry.
    pub fn insert(&mut self, experiment: Arc<Experiment>, schedule: Option<Schedule>) {
        self.entries.insert(
            experiment.id,
            Planned {
                experiment,
                schedule,
            },
        );
    }

    /// Removes an experiment.
    pub fn remove(&mut self, id: ExperimentId) -> Option<Planned> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: ExperimentId) -> Option<&Planned> {
        self.entries.get(&id)
    }

    pub fn experiment(&self, id: ExperimentId) -> Option<&Arc<Experiment>> {
        self.entries.get(&id).map(|p| &p.experiment)
    }

    pub fn schedule(&self, id: ExperimentId) -> Option<&Schedule> {
        self.entries.get(&id).and_then(|p| p.schedule.as_ref())
    }

    pub fn schedule_mut(&mut self, id: ExperimentId) -> Option<&mut Schedule> {
        self.entries.get_mut(&id).and_then(|p| p.schedule.as_mut())
    }

    /// Sets the schedule of an existing experiment.
    pub fn set_schedule(&mut self, id: ExperimentId, schedule: Option<Schedule>) {
        if let Some(p) = self.entries.get_mut(&id) {
            p.schedule = schedule;
        }
    }

    pub fn contains(&self, id: ExperimentId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in experiment-id order.
    pub fn iter(&self) -> impl Iterator<Item = &Planned> {
        self.entries.values()
    }

    /// Experiment ids in order.
    pub fn ids(&self) -> impl Iterator<Item = ExperimentId> + '_ {
        self.entries.keys().copied()
    }

    /// Scheduled `(experiment, schedule)` pairs.
    pub fn scheduled(&self) -> impl Iterator<Item = (&Arc<Experiment>, &Schedule)> {
        self.entries
            .values()
            .filter_map(|p| p.schedule.as_ref().map(|s| (&p.experiment, s)))
    }

    /// Experiments that have no schedule yet.
    pub fn unscheduled(&self) -> impl Iterator<Item = &Arc<Experiment>> {
        self.entries
            .values()
            .filter(|p| p.schedule.is_none())
            .map(|p| &p.experiment)
    }

    /// Whether every experiment has a schedule.
    pub fn is_complete(&self) -> bool {
        self.entries.values().all(|p| p.schedule.is_some())
    }

    /// Experiments in id order.
    pub fn experiments(&self) -> impl Iterator<Item = &Arc<Experiment>> {
        self.entries.values().map(|p| &p.experiment)
    }

    /// Last hour used by any schedule, plus one.
    pub fn horizon(&self) -> u32 {
        self.scheduled().map(|(_, s)| s.end_slot()).max().unwrap_or(0)
    }
}

/// Flat serialized form of an [`Individual`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndividualRecord {
    pub id: Uuid,
    pub schedules: Vec<ScheduledRecord>,
    #[serde(default)]
    pub mutation_count: u64,
    #[serde(default)]
    pub crossover_count: u64,
}

/// Experiment and optional schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledRecord {
    pub experiment: Experiment,
    pub schedule: Option<Schedule>,
}

impl From<Individual> for IndividualRecord {
    fn from(individual: Individual) -> Self {
        Self {
            id: individual.id,
            schedules: individual
                .entries
                .into_values()
                .map(|p| ScheduledRecord {
                    experiment: Arc::unwrap_or_clone(p.experiment),
                    schedule: p.schedule,
                })
                .collect(),
            mutation_count: individual.mutation_count,
            crossover_count: individual.crossover_count,
        }
    }
}

impl From<IndividualRecord> for Individual {
    fn from(record: IndividualRecord) -> Self {
        let mut individual = Individual::new(record.id);
        for entry in record.schedules {
            individual.insert(Arc::new(entry.experiment), entry.schedule);
        }
        individual.set_lineage(record.mutation_count, record.crossover_count);
        individual
    }
}

/// Run-wide lineage totals, shared across workers.
#[derive(Debug, Default)]
pub struct Lineage {
    mutations: AtomicU64,
    crossovers: AtomicU64,
}

impl Lineage {
    pub fn record_mutations(&self, n: u64) {
        self.mutations.fetch_add(n, Ordering::Relaxed);
    }

    /// Adds `n` crossover children to the run total.
    pub fn record_crossovers(&self, n: u64) {
        self.crossovers.fetch_add(n, Ordering::Relaxed);
    }

    pub fn mutations(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    pub fn crossovers(&self) -> u64 {
        self.crossovers.load(Ordering::Relaxed)
    }
}
