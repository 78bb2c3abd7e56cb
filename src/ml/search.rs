use crate::config::{ParamGrid, ParamSet};
use crate::error::{AppError, Result};
use crate::ml::dataset::{stratified_kfold, TrafficDataset};
use crate::ml::metrics::roc_auc;
use crate::ml::pipeline::PipelineSettings;
use rayon::prelude::*;
use tracing::{debug, error, info};

/// Cross-validated score of one grid point
#[derive(Debug, Clone)]
pub struct CandidateScore {
    /// Hyperparameter overrides of this grid point
    pub params: ParamSet,

    /// Settings the candidate was fit with
    pub settings: PipelineSettings,

    /// Validation ROC-AUC per fold
    pub fold_scores: Vec<f64>,

    /// Mean of `fold_scores`
    pub mean_score: f64,
}

/// Result of a completed grid search
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Index into `candidates` of the winner
    pub best_index: usize,

    /// Every grid point, in enumeration order
    pub candidates: Vec<CandidateScore>,
}

impl SearchOutcome {
    pub fn best(&self) -> &CandidateScore {
        &self.candidates[self.best_index]
    }
}

/// Exhaustive k-fold grid search scored by ROC-AUC
#[derive(Debug, Clone)]
pub struct GridSearch {
    base: PipelineSettings,
    grid: ParamGrid,
    n_folds: usize,
}

impl GridSearch {
    pub fn new(base: PipelineSettings, grid: ParamGrid, n_folds: usize) -> Self {
        Self {
            base,
            grid,
            n_folds,
        }
    }

    /// Fit and score every (candidate, fold) pair in parallel.
    ///
    /// All tasks finish before any candidate is compared; the first candidate
    /// with the highest mean score wins.
    pub fn run(&self, dataset: &TrafficDataset) -> Result<SearchOutcome> {
        let combinations = self.grid.combinations()?;
        if combinations.is_empty() {
            error!("Grid search started with an empty grid");
            return Err(AppError::Configuration(
                "grid search requires at least one parameter".to_string(),
            ));
        }

        let settings = combinations
            .iter()
            .map(|params| self.base.with_overrides(params))
            .collect::<Result<Vec<_>>>()?;

        let folds: Vec<(TrafficDataset, TrafficDataset)> = stratified_kfold(dataset.labels(), self.n_folds)?
            .into_iter()
            .map(|(train, validation)| (dataset.subset(&train), dataset.subset(&validation)))
            .collect();

        let tasks: Vec<(usize, usize)> = (0..settings.len())
            .flat_map(|candidate| (0..folds.len()).map(move |fold| (candidate, fold)))
            .collect();

        info!(
            candidates = settings.len(),
            folds = folds.len(),
            tasks = tasks.len(),
            "Starting grid search"
        );

        let scores = tasks
            .par_iter()
            .map(|&(candidate, fold)| {
                let (train, validation) = &folds[fold];
                let fitted = settings[candidate]
                    .build()
                    .fit(train.records(), train.labels())?;
                let proba = fitted.predict_proba(validation.records())?;
                let score = roc_auc(validation.labels(), &proba)?;
                debug!(candidate, fold, score, "Scored fold");
                Ok(score)
            })
            .collect::<Result<Vec<f64>>>()?;

        let candidates: Vec<CandidateScore> = combinations
            .into_iter()
            .zip(settings)
            .zip(scores.chunks(folds.len()))
            .map(|((params, settings), fold_scores)| CandidateScore {
                params,
                settings,
                fold_scores: fold_scores.to_vec(),
                mean_score: fold_scores.iter().sum::<f64>() / fold_scores.len() as f64,
            })
            .collect();

        let mut best_index = 0;
        for (index, candidate) in candidates.iter().enumerate() {
            debug!(
                params = %describe(&candidate.params),
                mean_score = candidate.mean_score,
                "Grid candidate"
            );
            if candidate.mean_score > candidates[best_index].mean_score {
                best_index = index;
            }
        }

        let outcome = SearchOutcome {
            best_index,
            candidates,
        };
        info!(
            best_params = %describe(&outcome.best().params),
            best_score = outcome.best().mean_score,
            "Grid search complete"
        );

        Ok(outcome)
    }
}

fn describe(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(param, value)| format!("{}={}", param, value))
        .collect::<Vec<_>>()
        .join(", ")
}
