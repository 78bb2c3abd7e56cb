use crate::error::{AppError, Result};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// Feature selection stage
pub trait Selector: Send + Sync {
    /// Score features against the labels and choose the subset to keep
    fn fit(&mut self, x: &Array2<f64>, y: &[usize]) -> Result<()>;

    /// Keep only the chosen columns
    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Indices of the kept columns, ascending
    fn selected(&self) -> &[usize];
}

/// Keeps the top-k features ranked by ANOVA F-statistic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KBestSelector {
    /// None keeps every feature
    k: Option<usize>,
    scores: Vec<f64>,
    selected: Vec<usize>,
    n_input: usize,
    fitted: bool,
}

impl KBestSelector {
    pub fn new(k: Option<usize>) -> Self {
        Self {
            k,
            scores: Vec::new(),
            selected: Vec::new(),
            n_input: 0,
            fitted: false,
        }
    }

    /// Scores from the last fit, one per input column
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }
}

impl Selector for KBestSelector {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize]) -> Result<()> {
        if x.nrows() != y.len() {
            error!(rows = x.nrows(), labels = y.len(), "Selector input shape mismatch");
            return Err(AppError::Schema(format!(
                "selector received {} rows and {} labels",
                x.nrows(),
                y.len()
            )));
        }

        let n_features = x.ncols();
        let scores = anova_f_scores(x, y);

        let k = match self.k {
            None => n_features,
            Some(k) if k > n_features => {
                warn!(k, n_features, "k exceeds feature count; keeping all features");
                n_features
            }
            Some(k) => k,
        };

        // NaN scores (constant columns) rank lowest
        let rank_key = |s: f64| if s.is_nan() { f64::MIN } else { s };
        let mut order: Vec<usize> = (0..n_features).collect();
        order.sort_by(|&a, &b| rank_key(scores[a]).total_cmp(&rank_key(scores[b])));

        let mut selected: Vec<usize> = order[n_features - k..].to_vec();
        selected.sort_unstable();

        debug!(n_features, k, selected = ?selected, "Fitted k-best selector");

        self.scores = scores;
        self.selected = selected;
        self.n_input = n_features;
        self.fitted = true;
        Ok(())
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.fitted {
            return Err(AppError::Training(
                "selector must be fitted before transform".to_string(),
            ));
        }
        if x.ncols() != self.n_input {
            error!(
                columns = x.ncols(),
                expected = self.n_input,
                "Selector input width mismatch"
            );
            return Err(AppError::Schema(format!(
                "selector expected {} columns, got {}",
                self.n_input,
                x.ncols()
            )));
        }

        Ok(x.select(Axis(1), &self.selected))
    }

    fn selected(&self) -> &[usize] {
        &self.selected
    }
}

/// One-way ANOVA F-statistic of each column against the class labels
pub fn anova_f_scores(x: &Array2<f64>, y: &[usize]) -> Vec<f64> {
    let n_samples = x.nrows();
    let n_classes = y.iter().copied().max().map(|m| m + 1).unwrap_or(0);

    let mut class_counts = vec![0usize; n_classes];
    for &label in y {
        class_counts[label] += 1;
    }
    let present = class_counts.iter().filter(|&&c| c > 0).count();

    if present < 2 || n_samples <= present {
        return vec![f64::NAN; x.ncols()];
    }

    let df_between = (present - 1) as f64;
    let df_within = (n_samples - present) as f64;

    x.axis_iter(Axis(1))
        .map(|column| {
            let mut sums = vec![0.0; n_classes];
            for (value, &label) in column.iter().zip(y) {
                sums[label] += value;
            }
            let overall = column.sum() / n_samples as f64;
            let means: Vec<f64> = sums
                .iter()
                .zip(&class_counts)
                .map(|(s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
                .collect();

            let ss_between: f64 = means
                .iter()
                .zip(&class_counts)
                .map(|(m, &c)| c as f64 * (m - overall).powi(2))
                .sum();
            let ss_within: f64 = column
                .iter()
                .zip(y)
                .map(|(value, &label)| (value - means[label]).powi(2))
                .sum();

            let ms_between = ss_between / df_between;
            let ms_within = ss_within / df_within;

            if ms_within > 0.0 {
                ms_between / ms_within
            } else if ms_between > 0.0 {
                f64::INFINITY
            } else {
                f64::NAN
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn fixture() -> (Array2<f64>, Vec<usize>) {
        // col 0: strongly separates, col 1: noise, col 2: constant, col 3: weak
        let x = array![
            [0.0, 1.0, 5.0, 0.1],
            [0.1, 3.0, 5.0, 0.2],
            [0.2, 2.0, 5.0, 0.0],
            [1.0, 2.0, 5.0, 0.3],
            [1.1, 1.0, 5.0, 0.2],
            [0.9, 3.0, 5.0, 0.4],
        ];
        (x, vec![0, 0, 0, 1, 1, 1])
    }

    #[test]
    fn test_anova_f_ranks_separating_column_highest() {
        let (x, y) = fixture();
        let scores = anova_f_scores(&x, &y);

        assert!(scores[0] > scores[3]);
        assert!(scores[3] > scores[1]);
        assert!(scores[1].abs() < 1e-12);
        assert!(scores[2].is_nan());
    }

    #[test]
    fn test_anova_f_matches_hand_computation() {
        let x = array![[1.0], [2.0], [4.0], [5.0]];
        let y = vec![0, 0, 1, 1];
        // means 1.5 / 4.5, overall 3: SSB = 2*2.25*2 = 9, SSW = 4*0.25 = 1
        // F = (9/1) / (1/2) = 18
        let scores = anova_f_scores(&x, &y);
        assert!((scores[0] - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_select_top_k_preserves_column_order() {
        let (x, y) = fixture();
        let mut selector = KBestSelector::new(Some(2));
        selector.fit(&x, &y).unwrap();

        assert_eq!(selector.selected(), &[0, 3]);
        let reduced = selector.transform(&x).unwrap();
        assert_eq!(reduced.ncols(), 2);
        assert_eq!(reduced[[3, 0]], 1.0);
        assert_eq!(reduced[[3, 1]], 0.3);
    }

    #[test]
    fn test_select_all_and_oversized_k() {
        let (x, y) = fixture();

        let mut all = KBestSelector::new(None);
        all.fit(&x, &y).unwrap();
        assert_eq!(all.selected(), &[0, 1, 2, 3]);

        let mut oversized = KBestSelector::new(Some(10));
        oversized.fit(&x, &y).unwrap();
        assert_eq!(oversized.selected().len(), 4);
    }

    #[test]
    fn test_width_mismatch_is_schema_error() {
        let (x, y) = fixture();
        let mut selector = KBestSelector::new(Some(2));
        selector.fit(&x, &y).unwrap();

        let narrow = x.slice(ndarray::s![.., ..3]).to_owned();
        let err = selector.transform(&narrow).unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_ERROR");
    }
}
