// Peaks module - dominant frequency and top-N peak picking
//
// Pure functions over a single FrequencyBins snapshot. Nothing here keeps
// state between frames; adaptive thresholds live in the detection session.

use serde::{Deserialize, Serialize};

use crate::config::FrequencyRange;
use crate::spectrum::FrequencyBins;

/// Weight applied to in-range bins when the signal is weak
pub const IN_RANGE_BOOST: f32 = 1.5;

/// Minimum amplitude for a local maximum to count as a peak
pub const PEAK_MIN_AMPLITUDE: u8 = 10;

/// Bins skipped at each end of the spectrum while scanning for peaks
const PEAK_EDGE_MARGIN: usize = 5;

/// Default number of peaks reported for visualisation
pub const DEFAULT_TOP_PEAKS: usize = 5;

/// Single-bin frequency estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakEstimate {
    pub bin_index: usize,
    pub frequency_hz: u32,
    pub amplitude: u8,
}

/// Frequency estimate stamped with the time it was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencySample {
    pub frequency_hz: u32,
    pub amplitude: u8,
    pub timestamp_ms: u64,
}

impl FrequencySample {
    pub fn from_estimate(estimate: PeakEstimate, timestamp_ms: u64) -> Self {
        Self {
            frequency_hz: estimate.frequency_hz,
            amplitude: estimate.amplitude,
            timestamp_ms,
        }
    }
}

/// One of the top-N local maxima of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DominantFrequency {
    pub frequency_hz: u32,
    pub amplitude: u8,
    /// Share of the summed top-N amplitudes, 0-100
    pub percentage: u8,
}

/// Aggregate level statistics of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumStats {
    pub max: u8,
    pub mean: f32,
    pub non_zero: usize,
}

impl SpectrumStats {
    pub fn of(bins: &FrequencyBins) -> Self {
        let amplitudes = bins.amplitudes();
        let mut max = 0u8;
        let mut sum = 0u64;
        let mut non_zero = 0usize;

        for &value in amplitudes {
            sum += value as u64;
            max = max.max(value);
            if value > 0 {
                non_zero += 1;
            }
        }

        let mean = if amplitudes.is_empty() {
            0.0
        } else {
            sum as f32 / amplitudes.len() as f32
        };

        Self {
            max,
            mean,
            non_zero,
        }
    }
}

/// Loudest bin of the snapshot, ties resolved to the lowest index
///
/// An all-zero snapshot yields bin 0 at 0 Hz with amplitude 0.
pub fn dominant_frequency(bins: &FrequencyBins) -> PeakEstimate {
    let mut max_index = 0usize;
    let mut max_value = 0u8;

    for (i, &value) in bins.amplitudes().iter().enumerate() {
        if value > max_value {
            max_value = value;
            max_index = i;
        }
    }

    PeakEstimate {
        bin_index: max_index,
        frequency_hz: bins.bin_frequency(max_index),
        amplitude: max_value,
    }
}

/// Dominant frequency with in-range bins weighted by [`IN_RANGE_BOOST`]
///
/// Each in-range bin is multiplied by 1.5 and compared against the raw
/// global maximum. When a boosted bin beats it, that bin wins and its
/// original (unboosted) amplitude is reported.
///
/// # Arguments
/// * `bins` - Spectrum snapshot
/// * `target` - Frequency window whose bins receive the boost
pub fn boosted_dominant_frequency(bins: &FrequencyBins, target: FrequencyRange) -> PeakEstimate {
    let raw = dominant_frequency(bins);
    if raw.amplitude == 0 || bins.is_empty() {
        return raw;
    }

    let len = bins.len();
    let nyquist = bins.nyquist();
    let min_index = (target.min_hz as f64 * len as f64 / nyquist).floor() as usize;
    let max_index = (target.max_hz as f64 * len as f64 / nyquist).ceil() as usize;

    let raw_max = raw.amplitude as f32;
    let mut boosted_max = raw_max;
    let mut boosted_index = raw.bin_index;

    let amplitudes = bins.amplitudes();
    for (i, &value) in amplitudes
        .iter()
        .enumerate()
        .take(max_index.saturating_add(1).min(len))
        .skip(min_index)
    {
        let boosted = value as f32 * IN_RANGE_BOOST;
        if boosted > boosted_max {
            boosted_max = boosted;
            boosted_index = i;
        }
    }

    if boosted_max > raw_max {
        PeakEstimate {
            bin_index: boosted_index,
            frequency_hz: bins.bin_frequency(boosted_index),
            amplitude: amplitudes[boosted_index],
        }
    } else {
        raw
    }
}

/// Top `n` local maxima with their share of the summed peak amplitude
///
/// A bin is a peak when it exceeds [`PEAK_MIN_AMPLITUDE`] and both of its
/// neighbours on each side. Peaks must lie more than `len / 100` bins from
/// every previously accepted peak; the scan runs low to high, so the first
/// peak found in an exclusion window wins even if a later one is louder.
pub fn top_peaks(bins: &FrequencyBins, n: usize) -> Vec<DominantFrequency> {
    let amplitudes = bins.amplitudes();
    let len = amplitudes.len();
    if len <= PEAK_EDGE_MARGIN * 2 || n == 0 {
        return Vec::new();
    }

    let min_peak_distance = len / 100;
    let mut peaks: Vec<(usize, u8)> = Vec::new();

    for i in PEAK_EDGE_MARGIN..len - PEAK_EDGE_MARGIN {
        let current = amplitudes[i];
        let is_local_max = current > PEAK_MIN_AMPLITUDE
            && current > amplitudes[i - 1]
            && current > amplitudes[i - 2]
            && current > amplitudes[i + 1]
            && current > amplitudes[i + 2];
        if !is_local_max {
            continue;
        }

        let far_enough = peaks
            .iter()
            .all(|&(index, _)| index.abs_diff(i) > min_peak_distance);
        if far_enough {
            peaks.push((i, current));
        }
    }

    // Stable sort keeps scan order among equal amplitudes
    peaks.sort_by(|a, b| b.1.cmp(&a.1));
    peaks.truncate(n);

    let total: u32 = peaks.iter().map(|&(_, amplitude)| amplitude as u32).sum();
    let divisor = total.max(1) as f64;

    peaks
        .into_iter()
        .map(|(index, amplitude)| DominantFrequency {
            frequency_hz: bins.bin_frequency(index),
            amplitude,
            percentage: (amplitude as f64 / divisor * 100.0).round() as u8,
        })
        .collect()
}
