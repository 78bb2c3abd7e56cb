use crate::ml::pipeline::CongestionPipeline;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{AsRefStr, Display, EnumCount, EnumIter, IntoEnumIterator};

/// Loosely typed record as received from a caller or a dataset row
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Name of the binary label column in training data
pub const LABEL_COLUMN: &str = "congestion";

/// Validated connection record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    /// Connection duration in seconds
    pub duration: f64,

    /// Bytes sent by the source
    pub src_bytes: f64,

    /// Bytes sent by the destination
    pub dst_bytes: f64,

    /// Packets exchanged
    pub packet_count: u64,

    /// Hour of day
    pub hour: u32,

    /// Transport protocol (TCP, UDP, ICMP, ...)
    pub protocol: String,

    /// Application service (http, dns, none, ...)
    pub service: String,
}

/// Raw numeric input fields, in schema order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum RawField {
    Duration,
    SrcBytes,
    DstBytes,
    PacketCount,
    Hour,
}

/// Categorical input fields, in schema order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum CategoricalFeature {
    Protocol,
    Service,
}

/// Numeric model features, in column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumIter, EnumCount)]
#[strum(serialize_all = "snake_case")]
pub enum NumericFeature {
    Duration,
    SrcBytes,
    DstBytes,
    PacketCount,
    Hour,
    PeakHourFlag,
    PacketSizeVariance,
    BytesRatio,
    AvgPacketSize,
    TrafficIntensity,
}

/// Number of numeric feature columns
pub const NUMERIC_FEATURE_COUNT: usize = NumericFeature::COUNT;

impl NumericFeature {
    /// Column names in order
    pub fn names() -> Vec<String> {
        NumericFeature::iter().map(|f| f.to_string()).collect()
    }
}

/// Feature representation of one connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineeredFeatures {
    pub duration: f64,
    pub src_bytes: f64,
    pub dst_bytes: f64,
    pub packet_count: f64,
    pub hour: f64,
    pub peak_hour_flag: f64,
    pub packet_size_variance: f64,
    pub bytes_ratio: f64,
    pub avg_packet_size: f64,
    pub traffic_intensity: f64,
    pub protocol: String,
    pub service: String,
}

impl EngineeredFeatures {
    pub fn value(&self, feature: NumericFeature) -> f64 {
        match feature {
            NumericFeature::Duration => self.duration,
            NumericFeature::SrcBytes => self.src_bytes,
            NumericFeature::DstBytes => self.dst_bytes,
            NumericFeature::PacketCount => self.packet_count,
            NumericFeature::Hour => self.hour,
            NumericFeature::PeakHourFlag => self.peak_hour_flag,
            NumericFeature::PacketSizeVariance => self.packet_size_variance,
            NumericFeature::BytesRatio => self.bytes_ratio,
            NumericFeature::AvgPacketSize => self.avg_packet_size,
            NumericFeature::TrafficIntensity => self.traffic_intensity,
        }
    }

    /// Numeric columns in schema order
    pub fn numeric(&self) -> [f64; NUMERIC_FEATURE_COUNT] {
        let mut values = [0.0; NUMERIC_FEATURE_COUNT];
        for (slot, feature) in values.iter_mut().zip(NumericFeature::iter()) {
            *slot = self.value(feature);
        }
        values
    }

    pub fn category(&self, feature: CategoricalFeature) -> &str {
        match feature {
            CategoricalFeature::Protocol => &self.protocol,
            CategoricalFeature::Service => &self.service,
        }
    }
}

/// Prediction returned to callers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Whether the connection is predicted to congest
    pub congestion: bool,

    /// Positive-class probability (0.0 - 1.0)
    pub probability: f64,
}

impl PredictionResult {
    pub fn from_probability(probability: f64, threshold: f64) -> Self {
        Self {
            congestion: probability >= threshold,
            probability,
        }
    }
}

/// Binary confusion matrix counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

/// Held-out evaluation metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Accuracy
    pub accuracy: f64,

    /// Precision of the positive class
    pub precision: f64,

    /// Recall of the positive class
    pub recall: f64,

    /// F1 score of the positive class
    pub f1_score: f64,

    /// Area under the ROC curve
    pub roc_auc: f64,

    /// Confusion matrix
    pub confusion_matrix: ConfusionMatrix,
}

impl ModelMetrics {
    /// Metrics as name/value pairs
    pub fn as_pairs(&self) -> [(&'static str, f64); 5] {
        [
            ("accuracy", self.accuracy),
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1", self.f1_score),
            ("roc_auc", self.roc_auc),
        ]
    }
}

/// Model metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Unique id of the training run
    pub id: uuid::Uuid,

    /// Model name
    pub name: String,

    /// Version of the crate that produced the model
    pub version: String,

    /// Training timestamp
    pub trained_at: chrono::DateTime<chrono::Utc>,

    /// Number of training samples
    pub n_training_samples: usize,

    /// Number of held-out samples
    pub n_test_samples: usize,

    /// Preprocessed feature names
    pub feature_names: Vec<String>,

    /// Feature names kept by the selector
    pub selected_features: Vec<String>,

    /// Hyperparameters of the fitted pipeline
    pub hyperparameters: BTreeMap<String, String>,

    /// Best mean cross-validated ROC-AUC, when a search ran
    pub cv_score: Option<f64>,

    /// Held-out metrics
    pub test_metrics: ModelMetrics,
}

/// Everything persisted in a model artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub metadata: ModelMetadata,
    pub pipeline: CongestionPipeline,
}
