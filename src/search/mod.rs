//! Local search and simulated annealing.
//!
//! Alternatives to the genetic algorithm that follow a single lineage and
//! reuse the mutation operator as neighbor generator.

mod local;

pub use local::{Acceptance, LocalSearch, SearchResult};
