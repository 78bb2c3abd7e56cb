use crate::config::TrainingConfig;
use crate::error::Result;
use crate::ml::artifact::load_model;
use crate::ml::features::FeatureEngineer;
use crate::ml::models::{
    EngineeredFeatures, ModelMetadata, PredictionResult, RawRecord, TrafficRecord, TrainedModel,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Serves predictions from a loaded, read-only pipeline.
///
/// Every method takes `&self`; a `Predictor` can be shared across threads
/// (e.g. behind an `Arc`) without locking.
#[derive(Debug)]
pub struct Predictor {
    model: TrainedModel,
    engineer: FeatureEngineer,
    threshold: f64,
    model_path: Option<PathBuf>,
}

impl Predictor {
    /// Resolve configuration, then load the artifact it points to
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = TrainingConfig::load(config_path)?;
        Self::from_config(&config)
    }

    pub fn from_config(config: &TrainingConfig) -> Result<Self> {
        let model = load_model(&config.model_path)?;
        info!(
            path = %config.model_path.display(),
            threshold = config.decision_threshold,
            "Predictor ready"
        );

        let mut predictor = Self::from_model(model, config.decision_threshold);
        predictor.model_path = Some(config.model_path.clone());
        Ok(predictor)
    }

    /// Serve an in-memory model
    pub fn from_model(model: TrainedModel, threshold: f64) -> Self {
        Self {
            model,
            engineer: FeatureEngineer::new(),
            threshold,
            model_path: None,
        }
    }

    /// Predict a single raw record
    pub fn predict(&self, raw: &RawRecord) -> Result<PredictionResult> {
        let features = self.engineer.transform(raw)?;
        self.predict_features(features)
    }

    /// Predict an already validated record
    pub fn predict_record(&self, record: &TrafficRecord) -> Result<PredictionResult> {
        let features = self.engineer.engineer(record)?;
        self.predict_features(features)
    }

    /// Predict every record; any invalid record fails the whole batch
    pub fn predict_batch(&self, raws: &[RawRecord]) -> Result<Vec<PredictionResult>> {
        let features = self.engineer.transform_batch(raws)?;
        let probabilities = self.model.pipeline.predict_proba(&features)?;

        debug!(rows = probabilities.len(), "Batch prediction");
        Ok(probabilities
            .into_iter()
            .map(|p| PredictionResult::from_probability(p, self.threshold))
            .collect())
    }

    fn predict_features(&self, features: EngineeredFeatures) -> Result<PredictionResult> {
        let probabilities = self.model.pipeline.predict_proba(std::slice::from_ref(&features))?;
        let probability = probabilities[0];
        let result = PredictionResult::from_probability(probability, self.threshold);

        debug!(
            probability,
            congestion = result.congestion,
            protocol = %features.protocol,
            service = %features.service,
            "Prediction"
        );
        Ok(result)
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.model.metadata
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Artifact location, when loaded from disk
    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }
}
