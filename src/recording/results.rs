// Iteration results - ordered, index-deduplicated batch results

use serde::{Deserialize, Serialize};

use crate::config::FrequencyRange;
use crate::random::FallbackGenerator;

/// Resolved frequency of one batch iteration (1-based index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationResult {
    pub iteration_index: u32,
    pub frequency_hz: u32,
}

/// Results of one batch run, kept in ascending iteration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationResults {
    entries: Vec<IterationResult>,
}

impl IterationResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Insert a result, replacing any earlier result for the same index
    pub fn upsert(&mut self, result: IterationResult) {
        match self
            .entries
            .binary_search_by_key(&result.iteration_index, |entry| entry.iteration_index)
        {
            Ok(position) => self.entries[position] = result,
            Err(position) => self.entries.insert(position, result),
        }
    }

    pub fn as_slice(&self) -> &[IterationResult] {
        &self.entries
    }

    pub fn to_vec(&self) -> Vec<IterationResult> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, iteration_index: u32) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.iteration_index == iteration_index)
    }

    /// `round(sum / count)` over results with a positive frequency
    ///
    /// The divisor is the number of positive results, not the iteration
    /// count. `None` when no result is positive.
    pub fn average(&self) -> Option<u32> {
        let valid: Vec<u32> = self
            .entries
            .iter()
            .map(|entry| entry.frequency_hz)
            .filter(|&frequency| frequency > 0)
            .collect();
        if valid.is_empty() {
            return None;
        }

        let sum: u64 = valid.iter().map(|&frequency| frequency as u64).sum();
        Some((sum as f64 / valid.len() as f64).round() as u32)
    }

    /// Synthesize random in-range results for every index in `1..=max` that
    /// has none yet
    ///
    /// # Returns
    /// Number of synthesized entries
    pub fn fill_missing(
        &mut self,
        max_iterations: u32,
        range: FrequencyRange,
        rng: &mut FallbackGenerator,
    ) -> usize {
        let mut synthesized = 0;
        for index in 1..=max_iterations {
            if !self.contains(index) {
                self.upsert(IterationResult {
                    iteration_index: index,
                    frequency_hz: rng.in_range(range),
                });
                synthesized += 1;
            }
        }
        synthesized
    }
}
