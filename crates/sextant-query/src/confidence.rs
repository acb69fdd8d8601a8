use sextant_core::constants::STATIC_CONFIDENCE_FACTOR;
use sextant_core::types::CompletenessInfo;

/// A named curve combining static-analysis confidence with an observed one.
#[derive(Debug, Clone, Copy)]
pub struct BlendPolicy {
    pub name: &'static str,
    pub blend: fn(f64, f64) -> f64,
}

pub const MAX_WITH_AGREEMENT_BOOST: BlendPolicy = BlendPolicy {
    name: "max-with-agreement-boost",
    blend: max_with_agreement_boost,
};

const AGREEMENT_THRESHOLD: f64 = 0.5;
const AGREEMENT_BOOST: f64 = 0.03;

fn max_with_agreement_boost(static_score: f64, observed: f64) -> f64 {
    let s = sanitize(static_score);
    let o = sanitize(observed);
    let boost = if s > AGREEMENT_THRESHOLD && o > AGREEMENT_THRESHOLD {
        AGREEMENT_BOOST
    } else {
        0.0
    };
    (s.max(o) + boost).min(1.0)
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Blend with the default policy.
pub fn blend_confidence(static_score: f64, observed: f64) -> f64 {
    (MAX_WITH_AGREEMENT_BOOST.blend)(static_score, observed)
}

/// Confidence when only static analysis is available.
pub fn static_confidence(completeness: &CompletenessInfo) -> f64 {
    sanitize(completeness.score * STATIC_CONFIDENCE_FACTOR)
}
