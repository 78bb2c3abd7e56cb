use crate::config::{
    GradientBoostingParams, Hyperparameter, ParamSet, SelectionWidth, TrainingConfig,
};
use crate::error::{AppError, Result};
use crate::ml::classifier::{Classifier, GradientBoostingClassifier};
use crate::ml::models::EngineeredFeatures;
use crate::ml::preprocess::{ColumnPreprocessor, Preprocessor};
use crate::ml::selection::{KBestSelector, Selector};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Unfitted preprocess -> select -> classify chain
#[derive(Debug, Clone)]
pub struct Pipeline<P, S, C> {
    preprocessor: P,
    selector: S,
    classifier: C,
}

impl<P, S, C> Pipeline<P, S, C>
where
    P: Preprocessor,
    S: Selector,
    C: Classifier,
{
    pub fn new(preprocessor: P, selector: S, classifier: C) -> Self {
        Self {
            preprocessor,
            selector,
            classifier,
        }
    }

    /// Fit every stage in order, each on the output of the previous one
    pub fn fit(
        mut self,
        rows: &[EngineeredFeatures],
        labels: &[usize],
    ) -> Result<FittedPipeline<P, S, C>> {
        if rows.len() != labels.len() {
            error!(rows = rows.len(), labels = labels.len(), "Pipeline input shape mismatch");
            return Err(AppError::Schema(format!(
                "pipeline received {} rows and {} labels",
                rows.len(),
                labels.len()
            )));
        }

        self.preprocessor.fit(rows)?;
        let encoded = self.preprocessor.transform(rows)?;

        self.selector.fit(&encoded, labels)?;
        let selected = self.selector.transform(&encoded)?;

        self.classifier.fit(&selected, labels)?;

        debug!(
            rows = rows.len(),
            encoded_columns = encoded.ncols(),
            selected_columns = selected.ncols(),
            "Pipeline fitted"
        );

        Ok(FittedPipeline {
            preprocessor: self.preprocessor,
            selector: self.selector,
            classifier: self.classifier,
        })
    }
}

/// Fitted pipeline; read-only after construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedPipeline<P, S, C> {
    preprocessor: P,
    selector: S,
    classifier: C,
}

impl<P, S, C> FittedPipeline<P, S, C>
where
    P: Preprocessor,
    S: Selector,
    C: Classifier,
{
    /// Design matrix after preprocessing and selection
    pub fn transform(&self, rows: &[EngineeredFeatures]) -> Result<Array2<f64>> {
        let encoded = self.preprocessor.transform(rows)?;
        self.selector.transform(&encoded)
    }

    /// Positive-class probability for each row
    pub fn predict_proba(&self, rows: &[EngineeredFeatures]) -> Result<Vec<f64>> {
        let x = self.transform(rows)?;
        let proba = self.classifier.predict_proba(&x)?;
        Ok(proba.column(1).to_vec())
    }

    /// Column names produced by the preprocessor
    pub fn feature_names(&self) -> &[String] {
        self.preprocessor.feature_names()
    }

    /// Column names that survive selection
    pub fn selected_features(&self) -> Vec<String> {
        let names = self.preprocessor.feature_names();
        self.selector
            .selected()
            .iter()
            .filter_map(|&i| names.get(i).cloned())
            .collect()
    }

    pub fn preprocessor(&self) -> &P {
        &self.preprocessor
    }

    pub fn selector(&self) -> &S {
        &self.selector
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }
}

/// The production pipeline
pub type CongestionPipeline =
    FittedPipeline<ColumnPreprocessor, KBestSelector, GradientBoostingClassifier>;

/// Settings that fully determine an unfitted production pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub drop_first_category: bool,
    pub selection: SelectionWidth,
    pub model_params: GradientBoostingParams,
}

impl PipelineSettings {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            drop_first_category: config.drop_first_category,
            selection: config.feature_selection_k,
            model_params: config.model_params.clone(),
        }
    }

    /// Copy with one grid-search candidate applied on top
    pub fn with_overrides(&self, overrides: &ParamSet) -> Result<Self> {
        let mut settings = self.clone();
        for (param, value) in overrides {
            match param {
                Hyperparameter::FeatureSelectionK => {
                    settings.selection = SelectionWidth::try_from(value)?
                }
                other => settings.model_params.set(*other, value)?,
            }
        }
        Ok(settings)
    }

    /// Hyperparameters as display strings, selector width included
    pub fn describe(&self) -> BTreeMap<String, String> {
        let mut described = self.model_params.describe();
        described.insert(
            Hyperparameter::FeatureSelectionK.to_string(),
            self.selection.to_string(),
        );
        described
    }

    pub fn build(&self) -> Pipeline<ColumnPreprocessor, KBestSelector, GradientBoostingClassifier> {
        Pipeline::new(
            ColumnPreprocessor::new(self.drop_first_category),
            KBestSelector::new(self.selection.as_option()),
            GradientBoostingClassifier::new(self.model_params.clone()),
        )
    }
}
