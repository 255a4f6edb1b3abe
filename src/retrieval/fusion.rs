//! Weighted score fusion of the dense and lexical legs

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid weight configuration: weights must be in [0, 1] and not both zero")]
    InvalidWeights,
}

/// Weights applied to each leg's score
#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    pub dense_weight: f32,
    pub lexical_weight: f32,
}

impl FusionConfig {
    pub fn new(dense_weight: f32, lexical_weight: f32) -> Result<Self, FusionError> {
        let valid = |w: f32| (0.0..=1.0).contains(&w);
        if !valid(dense_weight) || !valid(lexical_weight) || dense_weight + lexical_weight <= 0.0 {
            return Err(FusionError::InvalidWeights);
        }

        Ok(Self {
            dense_weight,
            lexical_weight,
        })
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            dense_weight: 0.7,
            lexical_weight: 0.3,
        }
    }
}

/// Combine `(corpus_id, score)` lists from both legs
///
/// `fused = dense_weight * dense + lexical_weight * lexical`, a missing leg
/// contributing zero, so single-leg hits are kept at their weighted score.
/// Sorted by descending fused score; equal scores keep corpus order.
pub fn weighted_fusion(
    dense: &[(usize, f32)],
    lexical: &[(usize, f32)],
    config: &FusionConfig,
) -> Vec<(usize, f32)> {
    let mut scores: BTreeMap<usize, f32> = BTreeMap::new();

    for &(id, score) in dense {
        *scores.entry(id).or_insert(0.0) += config.dense_weight * score;
    }
    for &(id, score) in lexical {
        *scores.entry(id).or_insert(0.0) += config.lexical_weight * score;
    }

    // BTreeMap yields ascending ids; the stable sort keeps that order on ties
    let mut results: Vec<(usize, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}
