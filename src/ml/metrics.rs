use crate::error::{AppError, Result};
use crate::ml::models::{ConfusionMatrix, ModelMetrics};
use tracing::error;

/// Count outcomes of thresholded predictions
pub fn confusion_matrix(y_true: &[usize], y_pred: &[usize]) -> ConfusionMatrix {
    let mut matrix = ConfusionMatrix::default();
    for (&truth, &pred) in y_true.iter().zip(y_pred) {
        match (truth == 1, pred == 1) {
            (true, true) => matrix.true_positives += 1,
            (false, true) => matrix.false_positives += 1,
            (false, false) => matrix.true_negatives += 1,
            (true, false) => matrix.false_negatives += 1,
        }
    }
    matrix
}

/// Ratio with a zero denominator mapped to 0.0
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

pub fn accuracy(matrix: &ConfusionMatrix) -> f64 {
    ratio(
        matrix.true_positives + matrix.true_negatives,
        matrix.true_positives + matrix.true_negatives + matrix.false_positives + matrix.false_negatives,
    )
}

pub fn precision(matrix: &ConfusionMatrix) -> f64 {
    ratio(matrix.true_positives, matrix.true_positives + matrix.false_positives)
}

pub fn recall(matrix: &ConfusionMatrix) -> f64 {
    ratio(matrix.true_positives, matrix.true_positives + matrix.false_negatives)
}

pub fn f1_score(matrix: &ConfusionMatrix) -> f64 {
    let (p, r) = (precision(matrix), recall(matrix));
    if p + r > 0.0 {
        2.0 * p * r / (p + r)
    } else {
        0.0
    }
}

/// Area under the ROC curve via the Mann-Whitney U statistic.
///
/// Tied scores share their average rank.
pub fn roc_auc(y_true: &[usize], scores: &[f64]) -> Result<f64> {
    let n = y_true.len();
    let positives = y_true.iter().filter(|&&y| y == 1).count();
    let negatives = n - positives;

    if n != scores.len() || positives == 0 || negatives == 0 {
        error!(
            samples = n,
            scores = scores.len(),
            positives,
            "ROC-AUC is undefined for this label set"
        );
        return Err(AppError::Training(
            "ROC-AUC requires both classes and one score per label".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; n];
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; positions start..end share the mean rank
        let shared = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = shared;
        }
        start = end;
    }

    let positive_rank_sum: f64 = y_true
        .iter()
        .zip(&ranks)
        .filter(|(y, _)| **y == 1)
        .map(|(_, r)| r)
        .sum();

    let u = positive_rank_sum - (positives * (positives + 1)) as f64 / 2.0;
    Ok(u / (positives * negatives) as f64)
}

/// Held-out metrics for positive-class probabilities at a decision threshold
pub fn evaluate(y_true: &[usize], probabilities: &[f64], threshold: f64) -> Result<ModelMetrics> {
    let y_pred: Vec<usize> = probabilities
        .iter()
        .map(|&p| (p >= threshold) as usize)
        .collect();
    let matrix = confusion_matrix(y_true, &y_pred);

    Ok(ModelMetrics {
        accuracy: accuracy(&matrix),
        precision: precision(&matrix),
        recall: recall(&matrix),
        f1_score: f1_score(&matrix),
        roc_auc: roc_auc(y_true, probabilities)?,
        confusion_matrix: matrix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_counts() {
        let matrix = confusion_matrix(&[1, 1, 0, 0, 1], &[1, 0, 1, 0, 1]);
        assert_eq!(matrix.true_positives, 2);
        assert_eq!(matrix.false_negatives, 1);
        assert_eq!(matrix.false_positives, 1);
        assert_eq!(matrix.true_negatives, 1);

        assert!((accuracy(&matrix) - 0.6).abs() < 1e-12);
        assert!((precision(&matrix) - 2.0 / 3.0).abs() < 1e-12);
        assert!((recall(&matrix) - 2.0 / 3.0).abs() < 1e-12);
        assert!((f1_score(&matrix) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_division_yields_zero() {
        let matrix = confusion_matrix(&[1, 1, 0], &[0, 0, 0]);
        assert_eq!(precision(&matrix), 0.0);
        assert_eq!(recall(&matrix), 0.0);
        assert_eq!(f1_score(&matrix), 0.0);
    }

    #[test]
    fn test_roc_auc_perfect_and_inverted() {
        let labels = [0, 0, 1, 1];
        assert_eq!(roc_auc(&labels, &[0.1, 0.2, 0.8, 0.9]).unwrap(), 1.0);
        assert_eq!(roc_auc(&labels, &[0.9, 0.8, 0.2, 0.1]).unwrap(), 0.0);
    }

    #[test]
    fn test_roc_auc_with_ties() {
        // one positive ties with one negative: 3 of 4 pairs ordered, one half
        let auc = roc_auc(&[0, 0, 1, 1], &[0.1, 0.5, 0.5, 0.9]).unwrap();
        assert!((auc - 0.875).abs() < 1e-12);

        let constant = roc_auc(&[0, 1, 0, 1], &[0.3; 4]).unwrap();
        assert!((constant - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_roc_auc_single_class_is_error() {
        assert!(roc_auc(&[1, 1, 1], &[0.2, 0.4, 0.6]).is_err());
    }

    #[test]
    fn test_evaluate_bounds() {
        let metrics = evaluate(&[0, 1, 1, 0], &[0.2, 0.7, 0.4, 0.6], 0.5).unwrap();
        for (name, value) in metrics.as_pairs() {
            assert!((0.0..=1.0).contains(&value), "{} = {}", name, value);
        }
        assert_eq!(metrics.accuracy, 0.5);
        assert_eq!(metrics.roc_auc, 0.75);
    }
}
