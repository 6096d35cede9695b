//! Min-max normalization over an explicit comparison set
//!
//! `(x - min) / (max - min)` maps the smallest value of the set to 0 and the
//! largest to 1. A set whose values are all equal has no range; every value
//! then maps to [`DEGENERATE_FALLBACK`].

use std::collections::BTreeMap;

/// Value assigned to every member of a degenerate (all-equal) set
pub const DEGENERATE_FALLBACK: f64 = 0.0;

/// Normalize a slice of values into [0, 1], returning a new vector
///
/// Non-finite inputs are excluded from the range and map to the fallback.
pub fn min_max(values: &[f64]) -> Vec<f64> {
    let Some((min, max)) = finite_range(values.iter().copied()) else {
        return vec![DEGENERATE_FALLBACK; values.len()];
    };
    let span = max - min;

    values
        .iter()
        .map(|&v| {
            if !v.is_finite() || span <= 0.0 {
                DEGENERATE_FALLBACK
            } else {
                ((v - min) / span).clamp(0.0, 1.0)
            }
        })
        .collect()
}

/// Normalize the values of a keyed collection, preserving keys
pub fn min_max_by_key<K: Ord + Clone>(values: &BTreeMap<K, f64>) -> BTreeMap<K, f64> {
    let raw: Vec<f64> = values.values().copied().collect();
    values
        .keys()
        .cloned()
        .zip(min_max(&raw))
        .collect()
}

fn finite_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_and_extremes() {
        let normalized = min_max(&[3.0, -1.0, 7.0, 2.5]);
        assert!(normalized.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(normalized[2], 1.0);
        assert_eq!(normalized[1], 0.0);
        assert!((normalized[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_set_uses_fallback() {
        let normalized = min_max(&[0.42, 0.42, 0.42]);
        assert_eq!(normalized, vec![DEGENERATE_FALLBACK; 3]);
        assert!(normalized.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_single_and_empty_sets() {
        assert_eq!(min_max(&[5.0]), vec![DEGENERATE_FALLBACK]);
        assert!(min_max(&[]).is_empty());
    }

    #[test]
    fn test_non_finite_values_excluded() {
        let normalized = min_max(&[1.0, f64::NAN, 3.0]);
        assert_eq!(normalized, vec![0.0, DEGENERATE_FALLBACK, 1.0]);
    }

    #[test]
    fn test_keyed_normalization_preserves_keys() {
        let mut values = BTreeMap::new();
        values.insert("a", 10.0);
        values.insert("b", 20.0);
        values.insert("c", 15.0);
        let normalized = min_max_by_key(&values);
        assert_eq!(normalized["a"], 0.0);
        assert_eq!(normalized["b"], 1.0);
        assert!((normalized["c"] - 0.5).abs() < 1e-12);
    }
}
