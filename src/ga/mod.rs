//! GA-based traffic allocation.
//!
//! Evolves populations of [`Individual`](crate::models::Individual)s with
//! schedule-level operators: every experiment keeps its own schedule, and
//! operators act on whole schedules rather than on a flat encoding.
//!
//! # Submodules
//!
//! - [`operators`]: mutation kinds, their draw weights and the weighted draw
//! - [`mutation`]: structural schedule mutations and traffic recalibration
//! - [`crossover`]: per-experiment best-schedule recombination
//! - [`selection`]: roulette-wheel parents, elitist survivors
//! - [`runner`]: the generational loop
//!
//! # Reference
//! - Goldberg (1989), "Genetic Algorithms in Search, Optimization and Machine Learning"
//! - Michalewicz (1996), "Genetic Algorithms + Data Structures = Evolution Programs", Ch. 7

pub mod crossover;
pub mod mutation;
pub mod operators;
mod problem;
pub mod runner;
pub mod selection;

pub use crossover::crossover;
pub use mutation::{apply_mutation, mutate, recalibrate, MutationOutcome};
pub use operators::{weighted_choice, MutationKind, MUTATION_WEIGHTS};
pub use problem::SchedulingProblem;
pub use runner::{GaResult, GaRunner};
pub use selection::{select_elite, select_parents, select_proportionate, Evaluated};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Independent generator for one unit of parallel work.
pub(crate) fn slot_rng(base_seed: u64, round: usize, slot: usize) -> ChaCha8Rng {
    let s = base_seed
        ^ (round as u64).rotate_left(32)
        ^ (slot as u64).rotate_left(17)
        ^ 0x9E37_79B1_85EB_CA87u64;
    ChaCha8Rng::seed_from_u64(s)
}
