//! Traffic allocation domain models.
//!
//! Provides the data types for the allocation problem and its solutions.
//!
//! # Overview
//!
//! | Type | Role |
//! |------|------|
//! | [`TrafficProfile`] | Available requests per hour per segment (input) |
//! | [`Experiment`] | What is scheduled: duration, traffic, priority, demand curve |
//! | [`Schedule`] | Start slot and per-hour segment fractions for one experiment |
//! | [`Individual`] | One schedule per experiment: a candidate solution |

mod experiment;
mod individual;
mod schedule;
mod traffic;

pub use experiment::{DemandCurve, Experiment, ExperimentKind};
pub use individual::{Individual, IndividualRecord, Lineage, Planned, ScheduledRecord};
pub use schedule::{Assignment, Schedule};
pub use traffic::TrafficProfile;

/// Absolute or relative hour of the scheduling horizon.
pub type Slot = u32;

/// Experiment identifier.
pub type ExperimentId = u32;
