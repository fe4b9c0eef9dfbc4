// Summary - human-readable digest of a detection history

use std::collections::BTreeMap;

use crate::session::DetectedFrequencyEvent;

/// Number of frequencies listed in a summary
pub const SUMMARY_TOP_N: usize = 5;

/// Rendered when the history holds no events
pub const EMPTY_SUMMARY: &str = "No significant frequencies detected yet.";

/// Total detected seconds per frequency, longest first
///
/// Events with the same frequency are merged. Equal totals keep ascending
/// frequency order.
pub fn total_durations(events: &[DetectedFrequencyEvent]) -> Vec<(u32, f64)> {
    let mut grouped: BTreeMap<u32, f64> = BTreeMap::new();
    for event in events {
        *grouped.entry(event.frequency_hz).or_insert(0.0) += event.duration_seconds;
    }

    let mut totals: Vec<(u32, f64)> = grouped.into_iter().collect();
    totals.sort_by(|a, b| b.1.total_cmp(&a.1));
    totals
}

/// One line per frequency: `"{f} Hz - Detected for {s} seconds"`
pub fn summarize_detections(events: &[DetectedFrequencyEvent]) -> String {
    let totals = total_durations(events);
    if totals.is_empty() {
        return EMPTY_SUMMARY.to_string();
    }

    totals
        .into_iter()
        .take(SUMMARY_TOP_N)
        .map(|(frequency_hz, seconds)| {
            format!(
                "{} Hz - Detected for {} seconds",
                frequency_hz,
                seconds.round() as u64
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
