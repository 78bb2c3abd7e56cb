use crate::config::TrainingConfig;
use crate::error::{AppError, Result};
use crate::ml::artifact::save_model;
use crate::ml::dataset::{stratified_split, TrafficDataset};
use crate::ml::features::FeatureEngineer;
use crate::ml::metrics::evaluate;
use crate::ml::models::{ModelMetadata, ModelMetrics, TrainedModel};
use crate::ml::pipeline::PipelineSettings;
use crate::ml::search::GridSearch;
use std::path::Path;
use tracing::{error, info};

/// Held-out share of the dataset
pub const TEST_FRACTION: f64 = 0.2;

/// Seed of the train/test split
pub const SPLIT_SEED: u64 = 42;

/// Folds used by the hyperparameter search
pub const CV_FOLDS: usize = 3;

/// Name recorded in model metadata
pub const MODEL_NAME: &str = "gradient_boosting_congestion";

/// Fits, evaluates and persists congestion pipelines
#[derive(Debug)]
pub struct Trainer {
    config: TrainingConfig,
    engineer: FeatureEngineer,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            engineer: FeatureEngineer::new(),
        }
    }

    /// Load configuration (argument, `MODEL_CONFIG`, default path) and build a trainer
    pub fn from_config_path(config_path: Option<&Path>) -> Result<Self> {
        Ok(Self::new(TrainingConfig::load(config_path)?))
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train on the CSV dataset at `dataset_path`, persist the artifact at
    /// the configured `model_path` and return held-out metrics
    pub fn train(&self, dataset_path: &Path) -> Result<ModelMetrics> {
        info!("🚀 Training congestion model from {}", dataset_path.display());

        let dataset = TrafficDataset::load_csv(dataset_path, &self.engineer)?;
        let model = self.fit_dataset(&dataset)?;
        save_model(&model, &self.config.model_path)?;

        info!(
            "✅ Model training completed, artifact written to {}",
            self.config.model_path.display()
        );
        Ok(model.metadata.test_metrics)
    }

    /// Split, fit (with search when configured) and evaluate without persisting
    pub fn fit_dataset(&self, dataset: &TrafficDataset) -> Result<TrainedModel> {
        if dataset.is_empty() {
            error!("Training dataset is empty");
            return Err(AppError::DataLoad("dataset has no rows".to_string()));
        }

        let (train_idx, test_idx) = stratified_split(dataset.labels(), TEST_FRACTION, SPLIT_SEED)?;
        let train = dataset.subset(&train_idx);
        let test = dataset.subset(&test_idx);

        info!(
            rows = dataset.len(),
            positives = dataset.positives(),
            train_rows = train.len(),
            test_rows = test.len(),
            "Split dataset"
        );

        let base = PipelineSettings::from_config(&self.config);
        let (settings, cv_score) = match &self.config.grid_search_params {
            Some(grid) if !grid.is_empty() => {
                let outcome = GridSearch::new(base, grid.clone(), CV_FOLDS).run(&train)?;
                let best = outcome.best();
                (best.settings.clone(), Some(best.mean_score))
            }
            _ => (base, None),
        };

        let pipeline = settings.build().fit(train.records(), train.labels())?;

        let probabilities = pipeline.predict_proba(test.records())?;
        let metrics = evaluate(test.labels(), &probabilities, self.config.decision_threshold)?;

        for (name, value) in metrics.as_pairs() {
            info!(metric = name, value, "Held-out evaluation");
        }

        let metadata = ModelMetadata {
            id: uuid::Uuid::new_v4(),
            name: MODEL_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            trained_at: chrono::Utc::now(),
            n_training_samples: train.len(),
            n_test_samples: test.len(),
            feature_names: pipeline.feature_names().to_vec(),
            selected_features: pipeline.selected_features(),
            hyperparameters: settings.describe(),
            cv_score,
            test_metrics: metrics,
        };

        info!(
            model_id = %metadata.id,
            selected = metadata.selected_features.len(),
            features = metadata.feature_names.len(),
            "Pipeline fitted"
        );

        Ok(TrainedModel { metadata, pipeline })
    }
}
