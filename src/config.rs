use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum::{Display, EnumString};
use tracing::{debug, error};
use validator::Validate;

/// Environment variable naming the configuration document
pub const MODEL_CONFIG_ENV: &str = "MODEL_CONFIG";

/// Environment variable naming the model artifact location
pub const MODEL_PATH_ENV: &str = "MODEL_PATH";

/// Configuration document used when neither an argument nor the env var names one
pub const DEFAULT_CONFIG_PATH: &str = "config/model.yaml";

/// Artifact location used when neither the config nor the env var names one
pub const DEFAULT_MODEL_PATH: &str = "assets/models/gb_model.bin";

/// Training and serving configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TrainingConfig {
    /// Location of the persisted pipeline artifact
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Number of features kept by the selector
    #[serde(default)]
    pub feature_selection_k: SelectionWidth,

    /// Classifier hyperparameters
    #[serde(default)]
    #[validate(nested)]
    pub model_params: GradientBoostingParams,

    /// Hyperparameter grid; absent or empty disables the search
    #[serde(default)]
    pub grid_search_params: Option<ParamGrid>,

    /// Probability at or above which a connection is flagged as congested
    #[serde(default = "default_decision_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub decision_threshold: f64,

    /// Drop the first (sorted) category of each categorical field
    #[serde(default)]
    pub drop_first_category: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            feature_selection_k: SelectionWidth::All,
            model_params: GradientBoostingParams::default(),
            grid_search_params: None,
            decision_threshold: default_decision_threshold(),
            drop_first_category: false,
        }
    }
}

impl TrainingConfig {
    /// Load configuration from an explicit path, the `MODEL_CONFIG` env var,
    /// or the built-in default location (in that order).
    ///
    /// A path named explicitly or through the environment must exist. The
    /// built-in default is optional; when it is absent every option takes its
    /// default value.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let (path, required) = resolve_config_path(config_path);
        debug!(path = %path.display(), required, "Loading training configuration");

        let config: TrainingConfig = config::Config::builder()
            .add_source(config::File::from(path.as_path()).required(required))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| {
                error!(path = %path.display(), error = %e, "Failed to load configuration");
                AppError::from(e)
            })?;

        config.check()?;
        Ok(config)
    }

    /// Parse configuration from an in-memory YAML document
    pub fn from_yaml_str(document: &str) -> Result<Self> {
        let config: TrainingConfig = config::Config::builder()
            .add_source(config::File::from_str(document, config::FileFormat::Yaml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| {
                error!(error = %e, "Failed to parse configuration document");
                AppError::from(e)
            })?;

        config.check()?;
        Ok(config)
    }

    /// Render the effective configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate field ranges and the search grid
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|e| {
            error!(error = %e, "Configuration failed validation");
            AppError::from(e)
        })?;

        if let Some(grid) = &self.grid_search_params {
            grid.combinations()?;
        }

        Ok(())
    }

    /// Whether a hyperparameter search should run
    pub fn search_enabled(&self) -> bool {
        self.grid_search_params
            .as_ref()
            .map(|grid| !grid.is_empty())
            .unwrap_or(false)
    }
}

/// Resolve the configuration document location and whether it must exist
pub fn resolve_config_path(explicit: Option<&Path>) -> (PathBuf, bool) {
    if let Some(path) = explicit {
        return (path.to_path_buf(), true);
    }

    match std::env::var(MODEL_CONFIG_ENV) {
        Ok(path) if !path.is_empty() => (PathBuf::from(path), true),
        _ => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    }
}

/// How many features the selector keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawSelectionWidth", into = "RawSelectionWidth")]
pub enum SelectionWidth {
    /// Keep every feature
    #[default]
    All,

    /// Keep the top-k features by score
    Top(usize),
}

impl SelectionWidth {
    /// Selected width as an optional count
    pub fn as_option(&self) -> Option<usize> {
        match self {
            SelectionWidth::All => None,
            SelectionWidth::Top(k) => Some(*k),
        }
    }
}

impl fmt::Display for SelectionWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionWidth::All => write!(f, "all"),
            SelectionWidth::Top(k) => write!(f, "{}", k),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawSelectionWidth {
    Count(u64),
    Keyword(String),
}

impl TryFrom<RawSelectionWidth> for SelectionWidth {
    type Error = String;

    fn try_from(raw: RawSelectionWidth) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawSelectionWidth::Count(0) => {
                Err("feature_selection_k must be a positive integer or \"all\"".to_string())
            }
            RawSelectionWidth::Count(k) => Ok(SelectionWidth::Top(k as usize)),
            RawSelectionWidth::Keyword(word) if word.eq_ignore_ascii_case("all") => {
                Ok(SelectionWidth::All)
            }
            RawSelectionWidth::Keyword(word) => match word.trim().parse::<u64>() {
                Ok(k) => SelectionWidth::try_from(RawSelectionWidth::Count(k)),
                Err(_) => Err(format!(
                    "feature_selection_k must be a positive integer or \"all\", got {:?}",
                    word
                )),
            },
        }
    }
}

impl From<SelectionWidth> for RawSelectionWidth {
    fn from(width: SelectionWidth) -> Self {
        match width {
            SelectionWidth::All => RawSelectionWidth::Keyword("all".to_string()),
            SelectionWidth::Top(k) => RawSelectionWidth::Count(k as u64),
        }
    }
}

impl TryFrom<&ParamValue> for SelectionWidth {
    type Error = AppError;

    fn try_from(value: &ParamValue) -> Result<Self> {
        let raw = match value {
            ParamValue::Int(k) if *k >= 0 => RawSelectionWidth::Count(*k as u64),
            ParamValue::Text(word) => RawSelectionWidth::Keyword(word.clone()),
            other => {
                return Err(AppError::Configuration(format!(
                    "invalid feature_selection_k candidate: {}",
                    other
                )))
            }
        };
        SelectionWidth::try_from(raw).map_err(AppError::Configuration)
    }
}

/// Gradient boosting hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GradientBoostingParams {
    /// Number of boosting stages
    #[validate(range(min = 1))]
    pub n_estimators: usize,

    /// Shrinkage applied to each stage
    #[validate(range(exclusive_min = 0.0))]
    pub learning_rate: f64,

    /// Maximum depth of each regression tree
    #[validate(range(min = 1))]
    pub max_depth: usize,

    /// Minimum samples required to split a node
    #[validate(range(min = 2))]
    pub min_samples_split: usize,

    /// Minimum samples required in each leaf
    #[validate(range(min = 1))]
    pub min_samples_leaf: usize,

    /// Fraction of rows drawn for each stage
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub subsample: f64,

    /// Seed for row subsampling
    pub random_state: u64,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
            subsample: 1.0,
            random_state: 42,
        }
    }
}

impl GradientBoostingParams {
    /// Override a single classifier hyperparameter
    pub fn set(&mut self, param: Hyperparameter, value: &ParamValue) -> Result<()> {
        let invalid = || {
            AppError::Configuration(format!("invalid value {} for {}", value, param))
        };

        match param {
            Hyperparameter::NEstimators => {
                self.n_estimators = value.as_usize().ok_or_else(invalid)?
            }
            Hyperparameter::LearningRate => {
                self.learning_rate = value.as_f64().ok_or_else(invalid)?
            }
            Hyperparameter::MaxDepth => self.max_depth = value.as_usize().ok_or_else(invalid)?,
            Hyperparameter::MinSamplesSplit => {
                self.min_samples_split = value.as_usize().ok_or_else(invalid)?
            }
            Hyperparameter::MinSamplesLeaf => {
                self.min_samples_leaf = value.as_usize().ok_or_else(invalid)?
            }
            Hyperparameter::Subsample => self.subsample = value.as_f64().ok_or_else(invalid)?,
            Hyperparameter::RandomState => {
                self.random_state = value.as_usize().ok_or_else(invalid)? as u64
            }
            Hyperparameter::FeatureSelectionK => {
                return Err(AppError::Configuration(
                    "feature_selection_k is not a classifier hyperparameter".to_string(),
                ))
            }
        }

        self.validate()?;
        Ok(())
    }

    /// Hyperparameters as display strings, for model metadata
    pub fn describe(&self) -> BTreeMap<String, String> {
        [
            (Hyperparameter::NEstimators, self.n_estimators.to_string()),
            (Hyperparameter::LearningRate, self.learning_rate.to_string()),
            (Hyperparameter::MaxDepth, self.max_depth.to_string()),
            (Hyperparameter::MinSamplesSplit, self.min_samples_split.to_string()),
            (Hyperparameter::MinSamplesLeaf, self.min_samples_leaf.to_string()),
            (Hyperparameter::Subsample, self.subsample.to_string()),
            (Hyperparameter::RandomState, self.random_state.to_string()),
        ]
        .into_iter()
        .map(|(param, value)| (param.to_string(), value))
        .collect()
    }
}

/// Tunable pipeline hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Hyperparameter {
    NEstimators,
    LearningRate,
    MaxDepth,
    MinSamplesSplit,
    MinSamplesLeaf,
    Subsample,
    RandomState,
    #[strum(to_string = "feature_selection_k", serialize = "k")]
    FeatureSelectionK,
}

impl Hyperparameter {
    /// Parse a grid key, accepting the `model__` / `selector__` stage prefixes
    pub fn from_grid_key(key: &str) -> Result<Self> {
        let unknown = || AppError::Configuration(format!("unknown grid search parameter: {}", key));

        if let Some(name) = key.strip_prefix("selector__") {
            return match Hyperparameter::from_str(name) {
                Ok(Hyperparameter::FeatureSelectionK) => Ok(Hyperparameter::FeatureSelectionK),
                _ => Err(unknown()),
            };
        }

        let name = key.strip_prefix("model__").unwrap_or(key);
        match Hyperparameter::from_str(name) {
            // A bare "k" is ambiguous outside the selector stage
            Ok(Hyperparameter::FeatureSelectionK) if name == "k" => Err(unknown()),
            Ok(param) => Ok(param),
            Err(_) => Err(unknown()),
        }
    }
}

/// A single hyperparameter value as written in the config document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        match self {
            ParamValue::Int(v) if *v >= 0 => Some(*v as usize),
            ParamValue::Float(v) if *v >= 0.0 && v.fract() == 0.0 => Some(*v as usize),
            ParamValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One point of the search grid
pub type ParamSet = Vec<(Hyperparameter, ParamValue)>;

/// Hyperparameter search grid: parameter name to candidate values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamGrid(pub BTreeMap<String, Vec<ParamValue>>);

impl ParamGrid {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Enumerate every parameter combination.
    ///
    /// Keys are visited in sorted order and the last key varies fastest.
    pub fn combinations(&self) -> Result<Vec<ParamSet>> {
        let mut axes = Vec::with_capacity(self.0.len());
        for (key, candidates) in &self.0 {
            let param = Hyperparameter::from_grid_key(key).map_err(|e| {
                error!(key = %key, "Unknown grid search parameter");
                e
            })?;
            if candidates.is_empty() {
                error!(key = %key, "Empty candidate list in grid search parameters");
                return Err(AppError::Configuration(format!(
                    "grid search parameter {} has no candidates",
                    key
                )));
            }
            axes.push((param, candidates));
        }

        let mut combinations: Vec<ParamSet> = vec![Vec::new()];
        for (param, candidates) in axes {
            combinations = combinations
                .into_iter()
                .flat_map(|prefix| {
                    candidates.iter().map(move |value| {
                        let mut set = prefix.clone();
                        set.push((param, value.clone()));
                        set
                    })
                })
                .collect();
        }

        if self.0.is_empty() {
            combinations.clear();
        }

        Ok(combinations)
    }
}

// Default value functions
fn default_model_path() -> PathBuf {
    std::env::var(MODEL_PATH_ENV)
        .ok()
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH))
}

fn default_decision_threshold() -> f64 {
    0.5
}
