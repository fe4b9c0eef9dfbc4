// Analysis module - pure functions over spectrum snapshots
//
// This module holds everything that turns frequency bins into numbers the
// sessions and the UI can use. None of it owns state or touches the device.
//
// Pipeline:
// - peaks: dominant bin, in-range boost, top-N local maxima
// - range: remap raw detections into the configured window
// - classifier: reference tone table, tolerance matching, annotation
// - summary: history digest for display

pub mod classifier;
pub mod peaks;
pub mod range;
pub mod summary;

pub use classifier::{
    annotate, closest_reference, is_angelic, nearest_reference, AngelicReference,
    ReferenceAnnotation, ANGELIC_REFERENCES, FREQUENCY_TOLERANCE_HZ,
};
pub use peaks::{
    boosted_dominant_frequency, dominant_frequency, top_peaks, DominantFrequency,
    FrequencySample, PeakEstimate, SpectrumStats, DEFAULT_TOP_PEAKS,
};
pub use range::{indicator_position, remap_into_range};
pub use summary::summarize_detections;
