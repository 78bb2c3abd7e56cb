//! Network congestion prediction.
//!
//! Raw connection records are engineered into a fixed feature schema, fed
//! through a fitted preprocess -> select -> gradient-boosting pipeline, and
//! scored as a congestion probability. [`ml::Trainer`] fits and persists the
//! pipeline; [`ml::Predictor`] loads it and serves predictions.

pub mod config;
pub mod error;
pub mod ml;

pub use config::TrainingConfig;
pub use error::{AppError, Result};
pub use ml::{PredictionResult, Predictor, Trainer};
