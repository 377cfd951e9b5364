//! Hourly traffic profile.
//!
//! Available requests per hour per segment. Hours are dense from 0 and
//! every hour carries the same segment set. The profile is read-only for
//! the duration of a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Slot;
use crate::error::{Error, Result};

/// Available requests per (hour, segment).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficProfile {
    /// `hours[h]` maps segment name to available requests at hour `h`.
    hours: Vec<BTreeMap<String, u64>>,
}

impl TrafficProfile {
    /// Creates a profile from dense hourly rows.
    pub fn new(hours: Vec<BTreeMap<String, u64>>) -> Self {
        Self { hours }
    }

    /// Builds a profile from `(hour, row)` pairs, rejecting gaps.
    pub fn from_rows(rows: impl IntoIterator<Item = (Slot, BTreeMap<String, u64>)>) -> Result<Self> {
        let mut rows: Vec<_> = rows.into_iter().collect();
        rows.sort_by_key(|(hour, _)| *hour);

        let mut hours = Vec::with_capacity(rows.len());
        for (expected, (hour, row)) in rows.into_iter().enumerate() {
            let expected = expected as Slot;
            if hour != expected {
                return Err(Error::SparseProfile { expected, found: hour });
            }
            hours.push(row);
        }
        Ok(Self { hours })
    }

    /// Creates a profile with the same traffic for every hour.
    pub fn uniform<S: Into<String> + Clone>(num_hours: usize, segments: &[(S, u64)]) -> Self {
        let row: BTreeMap<String, u64> = segments
            .iter()
            .map(|(name, requests)| (name.clone().into(), *requests))
            .collect();
        Self {
            hours: vec![row; num_hours],
        }
    }

    /// Number of hours covered.
    #[inline]
    pub fn horizon(&self) -> usize {
        self.hours.len()
    }

    /// Whether the profile covers no hours.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hours.is_empty()
    }

    /// Available requests for a segment at an hour.
    pub fn available(&self, hour: Slot, segment: &str) -> Option<u64> {
        self.hours
            .get(hour as usize)
            .and_then(|row| row.get(segment))
            .copied()
    }

    /// Row of an hour.
    pub fn hour(&self, hour: Slot) -> Option<&BTreeMap<String, u64>> {
        self.hours.get(hour as usize)
    }

    /// Requests consumed by routing `fraction` of a segment at an hour,
    /// rounded to the nearest request.
    pub fn consumed(&self, hour: Slot, segment: &str, fraction: f64) -> Option<u64> {
        self.available(hour, segment)
            .map(|available| (available as f64 * fraction).round().max(0.0) as u64)
    }

    /// Sorted segment names across all hours.
    pub fn segments(&self) -> Vec<String> {
        let mut segments: Vec<String> = self
            .hours
            .iter()
            .flat_map(|row| row.keys().cloned())
            .collect();
        segments.sort();
        segments.dedup();
        segments
    }

    /// Profile re-indexed so that `new_start` becomes hour 0.
    pub fn shifted(&self, new_start: Slot) -> Self {
        Self {
            hours: self.hours.iter().skip(new_start as usize).cloned().collect(),
        }
    }

    /// Iterates `(hour, row)` pairs in hour order.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &BTreeMap<String, u64>)> {
        self.hours.iter().enumerate().map(|(h, row)| (h as Slot, row))
    }
}
