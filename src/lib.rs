//! Traffic allocation for online experiments.
//!
//! Schedules experiments onto hourly, segmented traffic: every experiment
//! gets a contiguous run of hours and, for each hour, the fraction of each
//! segment's requests it receives. Schedules are searched heuristically
//! with a genetic algorithm, local search or simulated annealing, and a
//! partially executed schedule can be restarted as a smaller problem.
//!
//! # Modules
//!
//! - **`models`**: `TrafficProfile`, `Experiment`, `Assignment`, `Schedule`, `Individual`
//! - **`validation`**: feasibility of a candidate individual
//! - **`fitness`**: weighted duration, preferred-segment and start scores
//! - **`ga`**: mutation, crossover, selection and the generational loop
//! - **`search`**: local search and simulated annealing
//! - **`restart`**: residual problems from partially executed schedules
//! - **`sampling`**: random experiment sets, schedules and populations; profiles
//!   from aggregate traffic and scaled experiment sets
//! - **`io`**: CSV and JSON file formats
//! - **`config`**: run parameters
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use traffic_alloc::config::EngineConfig;
//! use traffic_alloc::ga::{GaRunner, SchedulingProblem};
//! use traffic_alloc::{io, sampling};
//!
//! # fn main() -> traffic_alloc::error::Result<()> {
//! let profile = Arc::new(io::load_profile("profile.csv")?);
//! let experiments = io::load_experiments("experiments.json")?;
//! let config = EngineConfig::default().with_seed(7);
//! let problem = SchedulingProblem::new(profile, &experiments, config)?;
//!
//! let shared: Vec<_> = experiments.into_iter().map(Arc::new).collect();
//! let initial = sampling::create_population(&problem, &shared, 50, 7)?;
//! let result = GaRunner::new(&problem).run(initial)?;
//! println!("best fitness {}", result.best.total());
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - Goldberg (1989), "Genetic Algorithms in Search, Optimization and Machine Learning"
//! - Kirkpatrick et al. (1983), "Optimization by Simulated Annealing"

pub mod config;
pub mod error;
pub mod fitness;
pub mod ga;
pub mod io;
pub mod models;
pub mod restart;
pub mod sampling;
pub mod search;
pub mod validation;
