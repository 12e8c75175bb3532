//! Survival decay.
//!
//! Pure policy: given a compression ratio, a session distance, and an
//! aggressiveness level, compute the weight threshold a marker must meet to
//! survive. Pinned markers (weight `1.00`) always survive.

use crate::manifest::{CompressionLevel, KeepitMarker};

/// Threshold ceiling; pinned weight `1.00` always clears it.
const MAX_THRESHOLD: f64 = 0.99;

/// Infer an aggressiveness level from the compression ratio when the caller
/// did not pass one explicitly.
pub fn select_aggressiveness(ratio: f64, explicit: Option<CompressionLevel>) -> CompressionLevel {
    if let Some(level) = explicit {
        return level;
    }
    if ratio <= 5.0 {
        CompressionLevel::Light
    } else if ratio <= 15.0 {
        CompressionLevel::Moderate
    } else {
        CompressionLevel::Aggressive
    }
}

fn base_threshold(level: CompressionLevel) -> f64 {
    match level {
        CompressionLevel::Light => 0.1,
        CompressionLevel::Moderate => 0.3,
        CompressionLevel::Aggressive => 0.5,
    }
}

/// Survival threshold for a non-pinned marker.
///
/// `threshold = base + (min(ratio,100)/100) × (min(distance,10)/10)`,
/// capped at `0.99`.
pub fn calculate_survival_threshold(
    ratio: f64,
    distance: u32,
    aggressiveness: Option<CompressionLevel>,
) -> f64 {
    let level = select_aggressiveness(ratio, aggressiveness);
    let ratio_factor = ratio.clamp(0.0, 100.0) / 100.0;
    let distance_factor = f64::from(distance.min(10)) / 10.0;
    (base_threshold(level) + ratio_factor * distance_factor).min(MAX_THRESHOLD)
}

/// Whether a marker of `weight` survives a compression.
pub fn should_keepit_survive(
    weight: f64,
    distance: u32,
    ratio: f64,
    aggressiveness: Option<CompressionLevel>,
) -> bool {
    if weight >= 1.0 {
        return true;
    }
    weight >= calculate_survival_threshold(ratio, distance, aggressiveness)
}

/// One marker's decay decision.
#[derive(Debug, Clone, PartialEq)]
pub struct SurvivalDecision {
    pub marker_id: String,
    pub weight: f64,
    pub threshold: f64,
    pub pinned: bool,
    pub survives: bool,
}

/// Decay outcome for a marker list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecayPreview {
    pub surviving: usize,
    pub summarized: usize,
    pub decisions: Vec<SurvivalDecision>,
}

/// Apply the decay policy to a marker list. Deterministic: depends only on
/// each marker's weight and the `(ratio, distance, aggressiveness)` inputs.
pub fn preview_decay(
    markers: &[KeepitMarker],
    ratio: f64,
    distance: u32,
    aggressiveness: Option<CompressionLevel>,
) -> DecayPreview {
    let threshold = calculate_survival_threshold(ratio, distance, aggressiveness);
    let mut preview = DecayPreview::default();

    for marker in markers {
        let pinned = marker.is_pinned();
        let survives = pinned || marker.weight >= threshold;
        if survives {
            preview.surviving += 1;
        } else {
            preview.summarized += 1;
        }
        preview.decisions.push(SurvivalDecision {
            marker_id: marker.marker_id.clone(),
            weight: marker.weight,
            threshold,
            pinned,
            survives,
        });
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use rstest::rstest;

    fn marker(id: &str, weight: f64) -> KeepitMarker {
        KeepitMarker {
            marker_id: id.to_string(),
            message_uuid: "m1".to_string(),
            weight,
            content: "content".to_string(),
            position: 0,
            context_before: String::new(),
            context_after: String::new(),
            created_at: Utc::now(),
            survived_in: vec![],
            summarized_in: vec![],
            weight_history: None,
        }
    }

    #[rstest]
    #[case(3.0, CompressionLevel::Light)]
    #[case(5.0, CompressionLevel::Light)]
    #[case(5.1, CompressionLevel::Moderate)]
    #[case(15.0, CompressionLevel::Moderate)]
    #[case(15.1, CompressionLevel::Aggressive)]
    #[case(80.0, CompressionLevel::Aggressive)]
    fn aggressiveness_inference(#[case] ratio: f64, #[case] expected: CompressionLevel) {
        assert_eq!(select_aggressiveness(ratio, None), expected);
    }

    #[test]
    fn explicit_level_wins_over_inference() {
        assert_eq!(
            select_aggressiveness(80.0, Some(CompressionLevel::Light)),
            CompressionLevel::Light
        );
    }

    #[test]
    fn threshold_matches_formula() {
        // aggressive base 0.5, ratio 20 → 0.2, distance 0 → 0
        let t = calculate_survival_threshold(20.0, 0, Some(CompressionLevel::Aggressive));
        assert!((t - 0.5).abs() < 1e-9);

        // moderate base 0.3, ratio 10 → 0.1, distance 5 → 0.5 ⇒ 0.35
        let t = calculate_survival_threshold(10.0, 5, Some(CompressionLevel::Moderate));
        assert!((t - 0.35).abs() < 1e-9);

        // saturates: ratio and distance clamp at 100 / 10
        let t = calculate_survival_threshold(500.0, 50, Some(CompressionLevel::Aggressive));
        assert!((t - 0.99).abs() < 1e-9); // 0.5 + 1.0 capped
    }

    #[test]
    fn pinned_always_survives() {
        for distance in [0u32, 3, 10, 100] {
            for ratio in [0.0, 2.0, 50.0, 500.0] {
                for level in [None, Some(CompressionLevel::Aggressive)] {
                    assert!(should_keepit_survive(1.0, distance, ratio, level));
                }
            }
        }
    }

    #[test]
    fn preview_counts_and_decisions() {
        let markers = vec![marker("pin", 1.0), marker("high", 0.8), marker("low", 0.2)];
        // aggressive: threshold = 0.5 + 0.2*0 = 0.5
        let preview = preview_decay(&markers, 20.0, 0, Some(CompressionLevel::Aggressive));
        assert_eq!(preview.surviving, 2);
        assert_eq!(preview.summarized, 1);
        assert!(preview.decisions[0].pinned);
        assert!(preview.decisions[1].survives);
        assert!(!preview.decisions[2].survives);
    }

    #[test]
    fn preview_is_deterministic() {
        let markers = vec![marker("a", 0.4), marker("b", 0.7)];
        let one = preview_decay(&markers, 12.0, 3, None);
        let two = preview_decay(&markers, 12.0, 3, None);
        assert_eq!(one, two);
    }

    proptest! {
        #[test]
        fn threshold_capped_at_099(ratio in 0.0f64..1000.0, distance in 0u32..100) {
            for level in [CompressionLevel::Light, CompressionLevel::Moderate, CompressionLevel::Aggressive] {
                let t = calculate_survival_threshold(ratio, distance, Some(level));
                prop_assert!(t <= 0.99 + 1e-12);
            }
        }

        #[test]
        fn threshold_monotonic_in_ratio_and_distance(
            r1 in 0.0f64..200.0,
            dr in 0.0f64..200.0,
            d1 in 0u32..20,
            dd in 0u32..20,
        ) {
            let level = Some(CompressionLevel::Moderate);
            let base = calculate_survival_threshold(r1, d1, level);
            prop_assert!(calculate_survival_threshold(r1 + dr, d1, level) >= base - 1e-12);
            prop_assert!(calculate_survival_threshold(r1, d1 + dd, level) >= base - 1e-12);
        }
    }
}
