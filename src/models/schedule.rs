//! Schedule (solution) model.
//!
//! A schedule is the hour-by-hour segment allocation of one experiment:
//! a start slot and one [`Assignment`] per consecutive hour. Each
//! assignment maps segment names to the fraction of that segment's
//! available traffic routed to the experiment.
//!
//! The structural edits used by mutation (move, shorten, extend, segment
//! flip/add/remove) live here so that they keep assignment hours in step
//! with the start slot.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use super::{Slot, TrafficProfile};

/// Segment fractions for one hour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Absolute hour.
    pub hour: Slot,
    /// Segment name to fraction in `[0, 1]` of its available traffic.
    pub traffic: BTreeMap<String, f64>,
}

impl Assignment {
    /// Creates an assignment with no segments.
    pub fn new(hour: Slot) -> Self {
        Self {
            hour,
            traffic: BTreeMap::new(),
        }
    }

    /// Adds a segment fraction.
    pub fn with_segment(mut self, segment: impl Into<String>, fraction: f64) -> Self {
        self.traffic.insert(segment.into(), fraction);
        self
    }

    /// Fraction of a segment, 0 when absent.
    #[inline]
    pub fn fraction(&self, segment: &str) -> f64 {
        self.traffic.get(segment).copied().unwrap_or(0.0)
    }

    /// Segments with a positive fraction.
    pub fn active_segments(&self) -> BTreeSet<&str> {
        self.traffic
            .iter()
            .filter(|(_, &f)| f > 0.0)
            .map(|(s, _)| s.as_str())
            .collect()
    }

    /// Whether no segment carries traffic.
    pub fn is_idle(&self) -> bool {
        self.traffic.values().all(|&f| f <= 0.0)
    }

    /// Requests consumed per segment at this hour.
    ///
    /// Returns the first segment the profile does not know about as `Err`.
    pub fn consumed_by_segment<'a>(
        &'a self,
        profile: &TrafficProfile,
    ) -> Result<Vec<(&'a str, u64)>, &'a str> {
        self.traffic
            .iter()
            .map(|(segment, &fraction)| {
                profile
                    .consumed(self.hour, segment, fraction)
                    .map(|c| (segment.as_str(), c))
                    .ok_or(segment.as_str())
            })
            .collect()
    }

    /// Segment consuming strictly more requests than every other segment.
    pub fn dominant_segment(&self, profile: &TrafficProfile) -> Option<&str> {
        let mut best: Option<(&str, u64)> = None;
        let mut tied = false;
        for (segment, &fraction) in &self.traffic {
            if fraction <= 0.0 {
                continue;
            }
            let consumed = profile.consumed(self.hour, segment, fraction).unwrap_or(0);
            match best {
                Some((_, b)) if consumed < b => {}
                Some((_, b)) if consumed == b => tied = true,
                _ => {
                    best = Some((segment.as_str(), consumed));
                    tied = false;
                }
            }
        }
        if tied {
            None
        } else {
            best.map(|(s, _)| s)
        }
    }

    /// Moves `old`'s fraction onto `new`.
    ///
    /// When `new` is already present the fractions are merged. A missing
    /// `old` contributes `floor`.
    pub fn flip_segment(&mut self, old: &str, new: &str, floor: f64) {
        let moved = self.traffic.remove(old).unwrap_or(floor);
        *self.traffic.entry(new.to_string()).or_insert(0.0) += moved;
        if let Some(f) = self.traffic.get_mut(new) {
            *f = f.min(1.0);
        }
    }

    /// Sets `segment` to `floor` when absent or at zero.
    pub fn add_segment(&mut self, segment: &str, floor: f64) -> bool {
        match self.traffic.get_mut(segment) {
            Some(f) if *f > 0.0 => false,
            Some(f) => {
                *f = floor;
                true
            }
            None => {
                self.traffic.insert(segment.to_string(), floor);
                true
            }
        }
    }

    /// Removes `segment` unless it is the only one left.
    pub fn remove_segment(&mut self, segment: &str) -> bool {
        if self.traffic.len() > 1 {
            self.traffic.remove(segment).is_some()
        } else {
            false
        }
    }
}

/// Start slot plus one assignment per consecutive hour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// First absolute hour.
    pub start_slot: Slot,
    /// One assignment per hour, in order.
    pub assignments: Vec<Assignment>,
}

impl Schedule {
    /// Creates a schedule from explicit assignments.
    pub fn new(start_slot: Slot, assignments: Vec<Assignment>) -> Self {
        Self {
            start_slot,
            assignments,
        }
    }

    /// Creates a schedule with the same segment fractions every hour.
    pub fn uniform<S: Into<String> + Clone>(
        start_slot: Slot,
        duration: u32,
        fractions: &[(S, f64)],
    ) -> Self {
        let assignments = (0..duration)
            .map(|i| {
                fractions
                    .iter()
                    .fold(Assignment::new(start_slot + i), |a, (s, f)| {
                        a.with_segment(s.clone(), *f)
                    })
            })
            .collect();
        Self::new(start_slot, assignments)
    }

    /// Number of hours.
    #[inline]
    pub fn duration(&self) -> u32 {
        self.assignments.len() as u32
    }

    /// First hour after the schedule.
    #[inline]
    pub fn end_slot(&self) -> Slot {
        self.start_slot + self.duration()
    }

    /// Assignment at relative index.
    pub fn at(&self, index: usize) -> Option<&Assignment> {
        self.assignments.get(index)
    }

    /// Whether hours break contiguity from the start slot or an hour
    /// carries no traffic at all.
    pub fn is_interrupted(&self) -> bool {
        self.first_interruption().is_some()
    }

    /// Absolute hour of the first gap or idle hour.
    pub fn first_interruption(&self) -> Option<Slot> {
        for (i, a) in self.assignments.iter().enumerate() {
            let expected = self.start_slot + i as Slot;
            if a.hour != expected {
                return Some(expected);
            }
            if a.is_idle() {
                return Some(a.hour);
            }
        }
        None
    }

    /// Every segment used at any hour.
    pub fn segments(&self) -> BTreeSet<&str> {
        self.assignments
            .iter()
            .flat_map(|a| a.traffic.keys().map(String::as_str))
            .collect()
    }

    /// Shifts the schedule by `delta` hours. Backward shifts stop at hour 0.
    pub fn move_by(&mut self, delta: i64) -> bool {
        let shift = if delta < 0 {
            -(delta.unsigned_abs().min(self.start_slot as u64) as i64)
        } else {
            delta
        };
        if shift == 0 {
            return false;
        }
        self.start_slot = (self.start_slot as i64 + shift) as Slot;
        for a in &mut self.assignments {
            a.hour = (a.hour as i64 + shift) as Slot;
        }
        true
    }

    /// Drops the last `hours` assignments. Does nothing if that would
    /// empty the schedule.
    pub fn shorten_by(&mut self, hours: u32) -> bool {
        if hours == 0 || hours >= self.duration() {
            return false;
        }
        let keep = self.assignments.len() - hours as usize;
        self.assignments.truncate(keep);
        true
    }

    /// Appends `hours` copies of the last assignment, hours advanced.
    pub fn extend_by(&mut self, hours: u32) -> bool {
        let Some(last) = self.assignments.last().cloned() else {
            return false;
        };
        for i in 1..=hours {
            let mut next = last.clone();
            next.hour = last.hour + i;
            self.assignments.push(next);
        }
        hours > 0
    }

    /// Flips `old` to `new` at every relative index in `range`.
    pub fn flip_segment(&mut self, old: &str, new: &str, range: RangeInclusive<usize>, floor: f64) -> bool {
        let mut changed = false;
        for a in self.slice_mut(range) {
            a.flip_segment(old, new, floor);
            changed = true;
        }
        changed
    }

    /// Adds `segment` at `floor` at every relative index in `range`.
    pub fn add_segment(&mut self, segment: &str, range: RangeInclusive<usize>, floor: f64) -> bool {
        let mut changed = false;
        for a in self.slice_mut(range) {
            changed |= a.add_segment(segment, floor);
        }
        changed
    }

    /// Removes `segment` at every relative index in `range` that keeps
    /// another segment.
    pub fn remove_segment(&mut self, segment: &str, range: RangeInclusive<usize>) -> bool {
        let mut changed = false;
        for a in self.slice_mut(range) {
            changed |= a.remove_segment(segment);
        }
        changed
    }

    /// Adds `delta` to `segment`'s fraction where present, clamped to `[0, 1]`.
    pub fn adjust_fraction(&mut self, segment: &str, range: RangeInclusive<usize>, delta: f64) -> bool {
        let mut changed = false;
        for a in self.slice_mut(range) {
            if let Some(f) = a.traffic.get_mut(segment) {
                *f = (*f + delta).clamp(0.0, 1.0);
                changed = true;
            }
        }
        changed
    }

    fn slice_mut(&mut self, range: RangeInclusive<usize>) -> &mut [Assignment] {
        let len = self.assignments.len();
        if len == 0 || *range.start() >= len {
            return &mut [];
        }
        let end = (*range.end()).min(len - 1);
        if *range.start() > end {
            return &mut [];
        }
        &mut self.assignments[*range.start()..=end]
    }

    /// Share of hours whose dominant segment is one of `preferred`.
    pub fn preferred_coverage(&self, preferred: &[String], profile: &TrafficProfile) -> f64 {
        if self.assignments.is_empty() {
            return 0.0;
        }
        let hits = self
            .assignments
            .iter()
            .filter_map(|a| a.dominant_segment(profile))
            .filter(|d| preferred.iter().any(|p| p == d))
            .count();
        hits as f64 / self.assignments.len() as f64
    }

    /// Assignments strictly before `cutoff`.
    pub fn before(&self, cutoff: Slot) -> impl Iterator<Item = &Assignment> {
        self.assignments.iter().filter(move |a| a.hour < cutoff)
    }

    /// Remaining part of the schedule re-indexed so that `cutoff` becomes
    /// hour 0, with `buffer` added to every fraction.
    pub fn rebased(&self, cutoff: Slot, buffer: f64) -> Option<Self> {
        let assignments: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|a| a.hour >= cutoff)
            .map(|a| Assignment {
                hour: a.hour - cutoff,
                traffic: a
                    .traffic
                    .iter()
                    .map(|(s, f)| (s.clone(), (f + buffer).min(1.0)))
                    .collect(),
            })
            .collect();
        let start_slot = assignments.first()?.hour;
        Some(Self::new(start_slot, assignments))
    }
}
