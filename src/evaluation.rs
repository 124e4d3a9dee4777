// src/evaluation.rs - Overlap metrics between a predicted mask and ground truth

use serde::Serialize;

use crate::errors::{Result, SnakeFusionError};
use crate::region_fill::RegionMask;

/// Pixel-level agreement between a predicted region and the ground truth
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentationMetrics {
    pub iou: f64,
    pub dice: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub true_positive: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_negative: usize,
}

#[inline]
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Compare `predicted` against `ground_truth`.
///
/// Every ratio with an empty denominator is reported as 0.
pub fn evaluate(predicted: &RegionMask, ground_truth: &RegionMask) -> Result<SegmentationMetrics> {
    if predicted.dimensions() != ground_truth.dimensions() {
        return Err(SnakeFusionError::invalid(format!(
            "mask dimensions differ: predicted {:?}, ground truth {:?}",
            predicted.dimensions(),
            ground_truth.dimensions()
        )));
    }

    let (mut tp, mut fp, mut fn_, mut tn) = (0usize, 0usize, 0usize, 0usize);
    for (&p, &g) in predicted.cells().iter().zip(ground_truth.cells()) {
        match (p, g) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => tn += 1,
        }
    }

    let precision = ratio(tp as f64, (tp + fp) as f64);
    let recall = ratio(tp as f64, (tp + fn_) as f64);

    Ok(SegmentationMetrics {
        iou: ratio(tp as f64, (tp + fp + fn_) as f64),
        dice: ratio(2.0 * tp as f64, (2 * tp + fp + fn_) as f64),
        precision,
        recall,
        f1: ratio(2.0 * precision * recall, precision + recall),
        true_positive: tp,
        false_positive: fp,
        false_negative: fn_,
        true_negative: tn,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn mask_from_rows(rows: &[&str]) -> RegionMask {
        let mut mask = RegionMask::new(rows[0].len() as u32, rows.len() as u32);
        for (r, line) in rows.iter().enumerate() {
            for (c, ch) in line.chars().enumerate() {
                if ch == '#' {
                    mask.insert(r as u32, c as u32);
                }
            }
        }
        mask
    }

    #[test]
    fn identical_masks_score_one() {
        let mask = mask_from_rows(&["##..", "##..", "...."]);
        let metrics = evaluate(&mask, &mask).unwrap();
        assert_approx_eq!(metrics.iou, 1.0);
        assert_approx_eq!(metrics.dice, 1.0);
        assert_approx_eq!(metrics.f1, 1.0);
        assert_eq!(metrics.true_negative, 8);
    }

    #[test]
    fn partial_overlap() {
        let predicted = mask_from_rows(&["###.", "....", "...."]);
        let truth = mask_from_rows(&[".###", "....", "...."]);
        let metrics = evaluate(&predicted, &truth).unwrap();

        assert_eq!((metrics.true_positive, metrics.false_positive, metrics.false_negative), (2, 1, 1));
        assert_approx_eq!(metrics.iou, 0.5);
        assert_approx_eq!(metrics.dice, 4.0 / 6.0);
        assert_approx_eq!(metrics.precision, 2.0 / 3.0);
        assert_approx_eq!(metrics.recall, 2.0 / 3.0);
        assert_approx_eq!(metrics.f1, 2.0 / 3.0);
    }

    #[test]
    fn empty_masks_score_zero() {
        let empty = RegionMask::new(3, 3);
        let metrics = evaluate(&empty, &empty).unwrap();
        assert_eq!(metrics.iou, 0.0);
        assert_eq!(metrics.dice, 0.0);
        assert_eq!(metrics.f1, 0.0);
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        assert!(evaluate(&RegionMask::new(3, 3), &RegionMask::new(3, 4)).is_err());
    }
}
