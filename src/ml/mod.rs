/// Machine learning core for network congestion prediction
///
/// This module provides:
/// - Feature engineering from raw connection records
/// - A typed preprocess -> select -> classify pipeline
/// - Gradient-boosted tree classification
/// - Stratified splitting, cross-validated grid search and evaluation
/// - Atomic artifact persistence and loading
/// - A thread-safe predictor over a loaded artifact

pub mod artifact;
pub mod classifier;
pub mod dataset;
pub mod features;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod predictor;
pub mod preprocess;
pub mod search;
pub mod selection;
pub mod trainer;

pub use artifact::{load_model, save_model};
pub use classifier::{Classifier, GradientBoostingClassifier};
pub use dataset::TrafficDataset;
pub use features::FeatureEngineer;
pub use models::{
    EngineeredFeatures, ModelMetadata, ModelMetrics, PredictionResult, RawRecord, TrafficRecord,
    TrainedModel,
};
pub use pipeline::{CongestionPipeline, FittedPipeline, Pipeline, PipelineSettings};
pub use predictor::Predictor;
pub use preprocess::{ColumnPreprocessor, Preprocessor};
pub use search::{GridSearch, SearchOutcome};
pub use selection::{KBestSelector, Selector};
pub use trainer::Trainer;
