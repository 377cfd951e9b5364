//! Mutation kinds and weighted random draws.
//!
//! Mutation kinds are drawn from a fixed `(kind, weight)` table with
//! [`weighted_choice`]; the same routine draws experiment kinds when
//! sampling synthetic experiment sets.
//!
//! # Usage
//!
//! ```
//! use rand::SeedableRng;
//! use rand::rngs::SmallRng;
//! use traffic_alloc::ga::operators::{weighted_choice, MutationKind, MUTATION_WEIGHTS};
//!
//! let mut rng = SmallRng::seed_from_u64(42);
//! let kind = weighted_choice(&MUTATION_WEIGHTS, &mut rng).unwrap();
//! assert!(kind != MutationKind::AdjustTraffic);
//! ```

use rand::Rng;

/// Structural change applied to one experiment's schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// Shift the whole schedule forward or backward.
    Move,
    /// Drop trailing hours.
    Shorten,
    /// Append hours copying the last one.
    Extend,
    /// Replace a used segment everywhere.
    Flip,
    /// Replace a used segment within an hour range.
    FlipRange,
    /// Add a segment everywhere.
    Add,
    /// Add a segment within an hour range.
    AddRange,
    /// Remove a segment everywhere.
    Remove,
    /// Remove a segment within an hour range.
    RemoveRange,
    /// Nudge one segment's fraction everywhere.
    AdjustTraffic,
    /// Nudge one segment's fraction within an hour range.
    AdjustTrafficRange,
}

/// Draw weights of the mutation kinds. The adjust-traffic kinds are
/// reserved and never drawn.
pub const MUTATION_WEIGHTS: [(MutationKind, u32); 11] = [
    (MutationKind::Move, 40),
    (MutationKind::Shorten, 10),
    (MutationKind::Extend, 5),
    (MutationKind::Flip, 10),
    (MutationKind::FlipRange, 5),
    (MutationKind::Add, 10),
    (MutationKind::AddRange, 5),
    (MutationKind::Remove, 10),
    (MutationKind::RemoveRange, 5),
    (MutationKind::AdjustTraffic, 0),
    (MutationKind::AdjustTrafficRange, 0),
];

impl MutationKind {
    /// Whether the kind changes which segments a schedule uses.
    pub fn changes_segments(self) -> bool {
        matches!(
            self,
            MutationKind::Flip
                | MutationKind::FlipRange
                | MutationKind::Add
                | MutationKind::AddRange
                | MutationKind::Remove
                | MutationKind::RemoveRange
        )
    }

    /// Whether the kind acts on an hour range instead of the whole schedule.
    pub fn is_ranged(self) -> bool {
        matches!(
            self,
            MutationKind::FlipRange
                | MutationKind::AddRange
                | MutationKind::RemoveRange
                | MutationKind::AdjustTrafficRange
        )
    }
}

/// Draws a value with probability proportional to its weight.
///
/// Zero-weight entries are never drawn. Returns `None` when no entry has
/// a positive weight.
pub fn weighted_choice<T: Copy, R: Rng + ?Sized>(table: &[(T, u32)], rng: &mut R) -> Option<T> {
    let total: u64 = table.iter().map(|(_, w)| *w as u64).sum();
    if total == 0 {
        return None;
    }
    let mut value = rng.random_range(0..total);
    for (item, weight) in table {
        let weight = *weight as u64;
        if value < weight {
            return Some(*item);
        }
        value -= weight;
    }
    table.iter().rev().find(|(_, w)| *w > 0).map(|(item, _)| *item)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_zero_weights_never_drawn() {
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..2000 {
            let kind = weighted_choice(&MUTATION_WEIGHTS, &mut rng).unwrap();
            assert!(!matches!(
                kind,
                MutationKind::AdjustTraffic | MutationKind::AdjustTrafficRange
            ));
        }
    }

    #[test]
    fn test_draws_follow_weights() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut counts: HashMap<MutationKind, usize> = HashMap::new();
        for _ in 0..10_000 {
            *counts
                .entry(weighted_choice(&MUTATION_WEIGHTS, &mut rng).unwrap())
                .or_default() += 1;
        }
        // Move has 40 % of the weight, Extend 5 %.
        let moves = counts[&MutationKind::Move] as f64 / 10_000.0;
        let extends = counts[&MutationKind::Extend] as f64 / 10_000.0;
        assert!((moves - 0.4).abs() < 0.03, "move share {moves}");
        assert!((extends - 0.05).abs() < 0.02, "extend share {extends}");
    }

    #[test]
    fn test_all_zero_table() {
        let mut rng = SmallRng::seed_from_u64(42);
        assert_eq!(weighted_choice(&[('a', 0), ('b', 0)], &mut rng), None);
        assert_eq!(weighted_choice::<char, _>(&[], &mut rng), None);
    }

    #[test]
    fn test_kind_classes() {
        assert!(MutationKind::Flip.changes_segments());
        assert!(MutationKind::RemoveRange.changes_segments());
        assert!(!MutationKind::Move.changes_segments());
        assert!(!MutationKind::AdjustTraffic.changes_segments());
        assert!(MutationKind::AddRange.is_ranged());
        assert!(!MutationKind::Add.is_ranged());
    }
}
