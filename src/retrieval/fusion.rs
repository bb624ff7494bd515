//! Weighted min-max score fusion for combining search results

use ahash::AHashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FusionError {
    #[error("Fusion weights must lie in [0, 1], got vector={vector} keyword={keyword}")]
    OutOfRange { vector: f32, keyword: f32 },

    #[error("At least one fusion weight must be positive")]
    AllZero,
}

/// Weights applied to the normalized vector and keyword scores
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub vector: f32,
    pub keyword: f32,
}

impl FusionWeights {
    pub fn new(vector: f32, keyword: f32) -> Result<Self, FusionError> {
        let in_range = |w: f32| (0.0..=1.0).contains(&w);
        if !in_range(vector) || !in_range(keyword) {
            return Err(FusionError::OutOfRange { vector, keyword });
        }
        if vector == 0.0 && keyword == 0.0 {
            return Err(FusionError::AllZero);
        }
        Ok(Self { vector, keyword })
    }
}

/// Rescale scores to [0, 1]
///
/// A list whose scores are all equal is returned unchanged.
pub fn min_max_normalize(scores: &[(String, f32)]) -> Vec<(String, f32)> {
    let (min, max) = scores
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (_, s)| {
            (lo.min(*s), hi.max(*s))
        });
    let range = max - min;

    if scores.is_empty() || range <= f32::EPSILON {
        return scores.to_vec();
    }

    scores
        .iter()
        .map(|(id, s)| (id.clone(), (s - min) / range))
        .collect()
}

/// Combine two scored lists into one ranking
///
/// Every id from either list gets
/// `weights.vector * norm_vector + weights.keyword * norm_keyword`, where a
/// missing entry contributes nothing. Sorted by descending score; ties keep
/// first-appearance order (vector list first).
pub fn hybrid_fusion(
    vector_results: &[(String, f32)],
    keyword_results: &[(String, f32)],
    weights: FusionWeights,
) -> Vec<(String, f32)> {
    let mut fused: Vec<(String, f32)> = Vec::new();
    let mut position: AHashMap<String, usize> = AHashMap::new();

    let mut accumulate = |list: Vec<(String, f32)>, weight: f32| {
        for (id, score) in list {
            match position.get(&id) {
                Some(&idx) => fused[idx].1 += weight * score,
                None => {
                    position.insert(id.clone(), fused.len());
                    fused.push((id, weight * score));
                }
            }
        }
    };

    accumulate(min_max_normalize(vector_results), weights.vector);
    accumulate(min_max_normalize(keyword_results), weights.keyword);

    // stable sort keeps tie order
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[(&str, f32)]) -> Vec<(String, f32)> {
        items.iter().map(|(id, s)| (id.to_string(), *s)).collect()
    }

    fn ids(fused: &[(String, f32)]) -> Vec<&str> {
        fused.iter().map(|(id, _)| id.as_str()).collect()
    }

    #[test]
    fn test_normalize_range() {
        let normalized = min_max_normalize(&list(&[("a", 2.0), ("b", 4.0), ("c", 3.0)]));
        assert_eq!(normalized, list(&[("a", 0.0), ("b", 1.0), ("c", 0.5)]));
    }

    #[test]
    fn test_normalize_flat_list_passes_through() {
        let flat = list(&[("a", 0.4), ("b", 0.4)]);
        assert_eq!(min_max_normalize(&flat), flat);
        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn test_single_list_member_keeps_its_contribution() {
        let weights = FusionWeights::new(0.7, 0.3).unwrap();
        let fused = hybrid_fusion(
            &list(&[("A", 0.9), ("B", 0.6)]),
            &list(&[("A", 0.5)]),
            weights,
        );

        assert_eq!(ids(&fused), vec!["A", "B"]);
        // A: 0.7 * 1.0 + 0.3 * 0.5 (flat keyword list passes through)
        assert!((fused[0].1 - 0.85).abs() < 1e-6);
        // B: vector contribution only
        assert!((fused[1].1 - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_self_fusion_preserves_ranking() {
        let original = list(&[("a", 0.91), ("b", 0.75), ("c", 0.52), ("d", 0.10)]);
        for (v, k) in [(0.5, 0.5), (0.7, 0.3), (1.0, 0.0), (0.2, 0.8)] {
            let fused = hybrid_fusion(&original, &original, FusionWeights::new(v, k).unwrap());
            assert_eq!(ids(&fused), vec!["a", "b", "c", "d"]);
        }
    }

    #[test]
    fn test_keyword_only_hit_can_outrank() {
        let weights = FusionWeights::new(0.3, 0.7).unwrap();
        let fused = hybrid_fusion(
            &list(&[("a", 0.8), ("b", 0.7), ("c", 0.6)]),
            &list(&[("c", 1.0), ("a", 0.2)]),
            weights,
        );
        assert_eq!(ids(&fused)[0], "c");
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_weight_validation() {
        assert_eq!(FusionWeights::new(0.0, 0.0), Err(FusionError::AllZero));
        assert!(matches!(
            FusionWeights::new(1.5, 0.1),
            Err(FusionError::OutOfRange { .. })
        ));
        assert!(FusionWeights::new(0.0, 1.0).is_ok());
    }
}
