use crate::error::{AppError, Result};
use crate::ml::models::{CategoricalFeature, EngineeredFeatures, NumericFeature, NUMERIC_FEATURE_COUNT};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::IntoEnumIterator;
use tracing::{debug, error};

/// Column-wise preprocessing stage
pub trait Preprocessor: Send + Sync {
    /// Learn column statistics and category domains
    fn fit(&mut self, rows: &[EngineeredFeatures]) -> Result<()>;

    /// Produce the numeric design matrix
    fn transform(&self, rows: &[EngineeredFeatures]) -> Result<Array2<f64>>;

    /// Output column names, in order
    fn feature_names(&self) -> &[String];
}

/// Standardizes columns to zero mean and unit variance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| AppError::Training("cannot fit scaler on zero rows".to_string()))?;
        // Constant columns keep unit scale
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });

        self.mean = mean;
        self.scale = scale;
        Ok(())
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean) / &self.scale
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }
}

/// One-hot encoder over the category domain seen at fit time.
///
/// Categories unseen at fit time encode as all zeros.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OneHotEncoder {
    field: String,
    categories: Vec<String>,
    drop_first: bool,
}

impl OneHotEncoder {
    pub fn new(field: impl Into<String>, drop_first: bool) -> Self {
        Self {
            field: field.into(),
            categories: Vec::new(),
            drop_first,
        }
    }

    pub fn fit<'a>(&mut self, values: impl Iterator<Item = &'a str>) {
        let domain: BTreeSet<&str> = values.collect();
        self.categories = domain.into_iter().map(str::to_string).collect();
    }

    /// Categories that get their own column
    pub fn encoded_categories(&self) -> &[String] {
        if self.drop_first && !self.categories.is_empty() {
            &self.categories[1..]
        } else {
            &self.categories
        }
    }

    pub fn width(&self) -> usize {
        self.encoded_categories().len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.encoded_categories()
            .iter()
            .map(|c| format!("{}_{}", self.field, c))
            .collect()
    }

    /// Write the indicator for `value` into `out` (length `width()`)
    pub fn encode(&self, value: &str, out: &mut [f64]) {
        out.iter_mut().for_each(|v| *v = 0.0);
        if let Some(pos) = self.encoded_categories().iter().position(|c| c == value) {
            out[pos] = 1.0;
        }
    }
}

/// Scales numeric columns and one-hot encodes protocol and service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnPreprocessor {
    numeric_columns: Vec<String>,
    scaler: StandardScaler,
    protocol: OneHotEncoder,
    service: OneHotEncoder,
    feature_names: Vec<String>,
    fitted: bool,
}

impl ColumnPreprocessor {
    pub fn new(drop_first: bool) -> Self {
        Self {
            numeric_columns: NumericFeature::names(),
            scaler: StandardScaler::default(),
            protocol: OneHotEncoder::new(CategoricalFeature::Protocol.to_string(), drop_first),
            service: OneHotEncoder::new(CategoricalFeature::Service.to_string(), drop_first),
            feature_names: Vec::new(),
            fitted: false,
        }
    }

    fn encoder(&self, feature: CategoricalFeature) -> &OneHotEncoder {
        match feature {
            CategoricalFeature::Protocol => &self.protocol,
            CategoricalFeature::Service => &self.service,
        }
    }

    /// Numeric column names the preprocessor was fit with
    pub fn numeric_columns(&self) -> &[String] {
        &self.numeric_columns
    }

    /// Confirm a deserialized preprocessor matches the current feature schema.
    ///
    /// The caller reports the mismatch.
    pub fn check_schema(&self) -> Result<()> {
        let expected = NumericFeature::names();
        if self.numeric_columns != expected {
            return Err(AppError::Schema(format!(
                "stored numeric columns {:?} do not match expected {:?}",
                self.numeric_columns, expected
            )));
        }
        Ok(())
    }

    fn numeric_matrix(rows: &[EngineeredFeatures]) -> Array2<f64> {
        let mut x = Array2::zeros((rows.len(), NUMERIC_FEATURE_COUNT));
        for (mut row, features) in x.rows_mut().into_iter().zip(rows) {
            for (cell, value) in row.iter_mut().zip(features.numeric()) {
                *cell = value;
            }
        }
        x
    }
}

impl Preprocessor for ColumnPreprocessor {
    fn fit(&mut self, rows: &[EngineeredFeatures]) -> Result<()> {
        if rows.is_empty() {
            error!("Preprocessor fit called with no rows");
            return Err(AppError::Training(
                "cannot fit preprocessor on an empty dataset".to_string(),
            ));
        }

        self.scaler.fit(&Self::numeric_matrix(rows))?;
        self.protocol.fit(rows.iter().map(|r| r.protocol.as_str()));
        self.service.fit(rows.iter().map(|r| r.service.as_str()));

        let mut names = self.numeric_columns.clone();
        names.extend(self.protocol.column_names());
        names.extend(self.service.column_names());
        self.feature_names = names;
        self.fitted = true;

        debug!(
            rows = rows.len(),
            columns = self.feature_names.len(),
            protocols = self.protocol.width(),
            services = self.service.width(),
            "Fitted column preprocessor"
        );

        Ok(())
    }

    fn transform(&self, rows: &[EngineeredFeatures]) -> Result<Array2<f64>> {
        if !self.fitted {
            return Err(AppError::Training(
                "preprocessor must be fitted before transform".to_string(),
            ));
        }

        let scaled = self.scaler.transform(&Self::numeric_matrix(rows));
        let width = scaled.ncols() + self.protocol.width() + self.service.width();

        if width != self.feature_names.len() {
            error!(
                width,
                expected = self.feature_names.len(),
                "Preprocessed width does not match fitted columns"
            );
            return Err(AppError::Schema(format!(
                "preprocessed row has {} columns, expected {}",
                width,
                self.feature_names.len()
            )));
        }

        let mut x = Array2::zeros((rows.len(), width));
        x.slice_mut(ndarray::s![.., ..scaled.ncols()]).assign(&scaled);

        for (mut row, features) in x.rows_mut().into_iter().zip(rows) {
            let mut offset = scaled.ncols();
            for feature in CategoricalFeature::iter() {
                let encoder = self.encoder(feature);
                let slice = row
                    .as_slice_mut()
                    .map(|r| &mut r[offset..offset + encoder.width()]);
                match slice {
                    Some(out) => encoder.encode(features.category(feature), out),
                    None => {
                        return Err(AppError::Schema(
                            "design matrix rows are not contiguous".to_string(),
                        ))
                    }
                }
                offset += encoder.width();
            }
        }

        Ok(x)
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(duration: f64, protocol: &str, service: &str) -> EngineeredFeatures {
        EngineeredFeatures {
            duration,
            src_bytes: duration * 10.0,
            dst_bytes: 5.0,
            packet_count: 3.0,
            hour: 1.0,
            peak_hour_flag: 0.0,
            packet_size_variance: 0.0,
            bytes_ratio: 1.0,
            avg_packet_size: 2.0,
            traffic_intensity: 4.0,
            protocol: protocol.to_string(),
            service: service.to_string(),
        }
    }

    fn training_rows() -> Vec<EngineeredFeatures> {
        vec![
            features(1.0, "TCP", "http"),
            features(2.0, "UDP", "dns"),
            features(3.0, "TCP", "ssh"),
            features(4.0, "ICMP", "none"),
        ]
    }

    #[test]
    fn test_scaler_zero_mean_unit_variance() {
        let mut pre = ColumnPreprocessor::new(false);
        pre.fit(&training_rows()).unwrap();
        let x = pre.transform(&training_rows()).unwrap();

        let duration = x.column(0);
        assert!(duration.mean().unwrap().abs() < 1e-12);
        assert!((duration.std(0.0) - 1.0).abs() < 1e-12);

        // Constant column stays finite and centred
        let dst = x.column(2);
        assert!(dst.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_one_hot_columns_sorted_and_fixed() {
        let mut pre = ColumnPreprocessor::new(false);
        pre.fit(&training_rows()).unwrap();

        let names = pre.feature_names();
        assert_eq!(names.len(), NUMERIC_FEATURE_COUNT + 3 + 4);
        assert_eq!(names[NUMERIC_FEATURE_COUNT], "protocol_ICMP");
        assert_eq!(names[NUMERIC_FEATURE_COUNT + 1], "protocol_TCP");
        assert_eq!(names[NUMERIC_FEATURE_COUNT + 3], "service_dns");

        let x = pre.transform(&[features(1.0, "UDP", "http")]).unwrap();
        let cats: Vec<f64> = x.row(0).iter().skip(NUMERIC_FEATURE_COUNT).copied().collect();
        assert_eq!(cats, vec![0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_unseen_category_encodes_as_zeros() {
        let mut pre = ColumnPreprocessor::new(false);
        pre.fit(&training_rows()).unwrap();

        let x = pre.transform(&[features(1.0, "SCTP", "gopher")]).unwrap();
        assert!(x
            .row(0)
            .iter()
            .skip(NUMERIC_FEATURE_COUNT)
            .all(|v| *v == 0.0));
    }

    #[test]
    fn test_drop_first_applied_consistently() {
        let mut pre = ColumnPreprocessor::new(true);
        pre.fit(&training_rows()).unwrap();

        let names = pre.feature_names();
        assert_eq!(names.len(), NUMERIC_FEATURE_COUNT + 2 + 3);
        assert!(!names.contains(&"protocol_ICMP".to_string()));
        assert!(!names.contains(&"service_dns".to_string()));

        let x = pre.transform(&[features(1.0, "ICMP", "dns")]).unwrap();
        assert_eq!(x.ncols(), names.len());
        assert!(x.row(0).iter().skip(NUMERIC_FEATURE_COUNT).all(|v| *v == 0.0));
    }

    #[test]
    fn test_transform_before_fit_fails() {
        let pre = ColumnPreprocessor::new(false);
        assert!(pre.transform(&training_rows()).is_err());
    }

    #[test]
    fn test_fit_on_empty_rows_fails() {
        let mut pre = ColumnPreprocessor::new(false);
        assert!(pre.fit(&[]).is_err());
    }

    #[test]
    fn test_schema_check() {
        let mut pre = ColumnPreprocessor::new(false);
        assert!(pre.check_schema().is_ok());

        pre.numeric_columns.pop();
        assert_eq!(pre.check_schema().unwrap_err().error_code(), "SCHEMA_ERROR");
    }
}
