/* Copyright © 2018 Gianmarco Garrisi

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>. */

//! Statistics interface consumed by the kernel.
//!
//! The kernel publishes two kinds of observations: time-weighted samples
//! (number in queue, number busy, utilization) and tallies (time spent in a
//! queue, time spent in a resource state). It does not aggregate anything
//! itself; it hands every observation to a [`StatsSink`]. [`MemoryStats`]
//! is a small incremental recorder suitable for tests and examples;
//! [`NullStats`] discards everything.

use std::collections::HashMap;

/// Receiver for the observations the kernel emits.
///
/// `time_weighted_observe(name, value, time)` reports that the quantity
/// `name` took the value `value` starting at `time`; the previous value is
/// implicitly weighted by the elapsed interval. `tally_observe` reports a
/// single sample. `reset` discards accumulated history at `time`; the
/// kernel calls it from warm-up and replication initialization.
pub trait StatsSink {
    fn time_weighted_observe(&mut self, name: &str, value: f64, time: f64);
    fn tally_observe(&mut self, name: &str, value: f64);
    fn reset(&mut self, time: f64);
}

/// Sink that drops every observation.
#[derive(Debug, Default)]
pub struct NullStats;

impl StatsSink for NullStats {
    fn time_weighted_observe(&mut self, _name: &str, _value: f64, _time: f64) {}
    fn tally_observe(&mut self, _name: &str, _value: f64) {}
    fn reset(&mut self, _time: f64) {}
}

#[derive(Debug, Clone, Copy)]
struct Weighted {
    area: f64,
    last_value: f64,
    last_time: f64,
    start_time: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

/// Incremental in-memory recorder.
///
/// Keeps one running integral per time-weighted name and one running sum
/// per tally name. Averages are closed on demand: the time-weighted average
/// of `name` over `[start, until]` weights the last observed value up to
/// `until`.
#[derive(Debug, Default)]
pub struct MemoryStats {
    weighted: HashMap<String, Weighted>,
    tallies: HashMap<String, Tally>,
}

impl MemoryStats {
    pub fn new() -> MemoryStats {
        MemoryStats::default()
    }

    /// Time-weighted average of `name` from its first observation to
    /// `until`. `None` if the name was never observed.
    pub fn time_weighted_average(&self, name: &str, until: f64) -> Option<f64> {
        let w = self.weighted.get(name)?;
        let span = until - w.start_time;
        if span <= 0.0 {
            return Some(w.last_value);
        }
        Some((w.area + w.last_value * (until - w.last_time)) / span)
    }

    /// Last value observed for a time-weighted quantity.
    pub fn last_value(&self, name: &str) -> Option<f64> {
        self.weighted.get(name).map(|w| w.last_value)
    }

    /// Mean of all tallied samples of `name`.
    pub fn tally_mean(&self, name: &str) -> Option<f64> {
        let t = self.tallies.get(name)?;
        if t.count == 0 {
            return None;
        }
        Some(t.sum / t.count as f64)
    }

    /// Number of tallied samples of `name`.
    pub fn tally_count(&self, name: &str) -> u64 {
        self.tallies.get(name).map_or(0, |t| t.count)
    }

    pub fn tally_min(&self, name: &str) -> Option<f64> {
        let t = self.tallies.get(name)?;
        (t.count > 0).then_some(t.min)
    }

    pub fn tally_max(&self, name: &str) -> Option<f64> {
        let t = self.tallies.get(name)?;
        (t.count > 0).then_some(t.max)
    }
}

impl StatsSink for MemoryStats {
    fn time_weighted_observe(&mut self, name: &str, value: f64, time: f64) {
        match self.weighted.get_mut(name) {
            Some(w) => {
                w.area += w.last_value * (time - w.last_time);
                w.last_value = value;
                w.last_time = time;
            }
            None => {
                self.weighted.insert(
                    name.to_owned(),
                    Weighted { area: 0.0, last_value: value, last_time: time, start_time: time },
                );
            }
        }
    }

    fn tally_observe(&mut self, name: &str, value: f64) {
        let t = self.tallies.entry(name.to_owned()).or_default();
        if t.count == 0 {
            t.min = value;
            t.max = value;
        } else {
            t.min = t.min.min(value);
            t.max = t.max.max(value);
        }
        t.count += 1;
        t.sum += value;
    }

    fn reset(&mut self, time: f64) {
        self.tallies.clear();
        // keep current values as the re-entered level at the reset instant
        for w in self.weighted.values_mut() {
            w.area = 0.0;
            w.last_time = time;
            w.start_time = time;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_weighted_average_weights_intervals() {
        let mut s = MemoryStats::new();
        s.time_weighted_observe("q", 0.0, 0.0);
        s.time_weighted_observe("q", 2.0, 1.0);
        s.time_weighted_observe("q", 1.0, 3.0);
        // [0,1): 0, [1,3): 2, [3,5]: 1 -> (0 + 4 + 2) / 5
        assert_eq!(s.time_weighted_average("q", 5.0), Some(1.2));
    }

    #[test]
    fn tally_tracks_count_mean_extremes() {
        let mut s = MemoryStats::new();
        for v in [2.0, 4.0, 0.0] {
            s.tally_observe("w", v);
        }
        assert_eq!(s.tally_count("w"), 3);
        assert_eq!(s.tally_mean("w"), Some(2.0));
        assert_eq!(s.tally_min("w"), Some(0.0));
        assert_eq!(s.tally_max("w"), Some(4.0));
    }

    #[test]
    fn reset_reenters_current_level() {
        let mut s = MemoryStats::new();
        s.time_weighted_observe("b", 1.0, 0.0);
        s.tally_observe("w", 9.0);
        s.reset(10.0);
        assert_eq!(s.tally_count("w"), 0);
        // value 1.0 carried across the reset, so the post-reset average is 1.0
        assert_eq!(s.time_weighted_average("b", 12.0), Some(1.0));
    }

    #[test]
    fn average_before_first_interval_is_last_value() {
        let mut s = MemoryStats::new();
        s.time_weighted_observe("b", 3.0, 2.0);
        assert_eq!(s.time_weighted_average("b", 2.0), Some(3.0));
        assert_eq!(s.time_weighted_average("missing", 2.0), None);
    }
}
