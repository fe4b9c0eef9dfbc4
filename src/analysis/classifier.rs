// Classifier - maps detected frequencies onto the reference tone table
//
// The table is a process-wide constant. A detection "matches" a reference
// when it lies within FREQUENCY_TOLERANCE_HZ of it, inclusive.

use serde::Serialize;

/// Match window around each reference tone, inclusive
pub const FREQUENCY_TOLERANCE_HZ: u32 = 5;

/// One reference tone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AngelicReference {
    pub frequency_hz: u32,
    pub description: &'static str,
}

/// The five reference tones, ascending
pub static ANGELIC_REFERENCES: [AngelicReference; 5] = [
    AngelicReference {
        frequency_hz: 432,
        description: "Earth's Sacred Frequency - Grounding & Community Healing",
    },
    AngelicReference {
        frequency_hz: 528,
        description: "Miracle Tone - Transformation & Consciousness Awakening",
    },
    AngelicReference {
        frequency_hz: 639,
        description: "Harmonious Connection - Spatial Wisdom & Relationships",
    },
    AngelicReference {
        frequency_hz: 741,
        description: "Intuitive Awakening - Sacred Knowledge & Problem-Solving",
    },
    AngelicReference {
        frequency_hz: 963,
        description: "Divine Consciousness - Infinite Collaboration & Spiritual Connection",
    },
];

/// True when `frequency_hz` is within tolerance of any reference
pub fn is_angelic(frequency_hz: u32) -> bool {
    ANGELIC_REFERENCES
        .iter()
        .any(|reference| reference.frequency_hz.abs_diff(frequency_hz) <= FREQUENCY_TOLERANCE_HZ)
}

/// Nearest reference regardless of distance (first entry wins ties)
pub fn nearest_reference(frequency_hz: u32) -> &'static AngelicReference {
    let mut nearest = &ANGELIC_REFERENCES[0];
    let mut min_diff = u32::MAX;

    for reference in ANGELIC_REFERENCES.iter() {
        let diff = reference.frequency_hz.abs_diff(frequency_hz);
        if diff < min_diff {
            min_diff = diff;
            nearest = reference;
        }
    }

    nearest
}

/// Nearest reference, reported only when it is within tolerance
pub fn closest_reference(frequency_hz: u32) -> Option<&'static AngelicReference> {
    let nearest = nearest_reference(frequency_hz);
    if nearest.frequency_hz.abs_diff(frequency_hz) <= FREQUENCY_TOLERANCE_HZ {
        Some(nearest)
    } else {
        None
    }
}

/// Diagnostic annotation attached to each batch iteration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceAnnotation {
    pub frequency_hz: u32,
    pub is_angelic: bool,
    pub nearest: AngelicReference,
    pub difference_hz: u32,
    /// `100 - difference / reference * 100`
    pub match_percentage: f64,
}

/// Annotate a frequency with its nearest reference and match percentage
///
/// Purely explanatory: never alters the frequency being annotated.
pub fn annotate(frequency_hz: u32) -> ReferenceAnnotation {
    let nearest = *nearest_reference(frequency_hz);
    let difference_hz = nearest.frequency_hz.abs_diff(frequency_hz);
    let match_percentage = 100.0 - (difference_hz as f64 / nearest.frequency_hz as f64 * 100.0);

    ReferenceAnnotation {
        frequency_hz,
        is_angelic: is_angelic(frequency_hz),
        nearest,
        difference_hz,
        match_percentage,
    }
}
