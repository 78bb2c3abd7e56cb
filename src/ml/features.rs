use crate::error::{AppError, Result};
use crate::ml::models::{
    CategoricalFeature, EngineeredFeatures, NumericFeature, RawField, RawRecord, TrafficRecord,
    NUMERIC_FEATURE_COUNT,
};
use serde_json::Value;
use strum::IntoEnumIterator;
use tracing::{debug, error};

/// Morning peak band (inclusive hours)
const PEAK_MORNING_HOURS: [u32; 3] = [8, 9, 10];

/// Evening peak band (inclusive hours)
const PEAK_EVENING_HOURS: [u32; 3] = [17, 18, 19];

/// Lower bound on duration when computing traffic intensity
const MIN_DURATION_SECS: f64 = 0.1;

/// Maps raw connection records into the fixed feature schema
#[derive(Debug, Clone, Default)]
pub struct FeatureEngineer;

impl FeatureEngineer {
    pub fn new() -> Self {
        Self
    }

    /// Validate and engineer a single raw record
    pub fn transform(&self, raw: &RawRecord) -> Result<EngineeredFeatures> {
        let record = self.validate(raw)?;
        let features = self.engineer(&record)?;

        debug!(
            input_fields = raw.len(),
            numeric_columns = NUMERIC_FEATURE_COUNT,
            categorical_columns = 2,
            "Engineered features"
        );

        Ok(features)
    }

    /// Validate and engineer a batch, row by row
    pub fn transform_batch(&self, raws: &[RawRecord]) -> Result<Vec<EngineeredFeatures>> {
        let features = raws
            .iter()
            .enumerate()
            .map(|(row, raw)| {
                let record = self.validate(raw).map_err(|e| {
                    debug!(row, "Rejected batch row");
                    e
                })?;
                self.engineer(&record)
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            rows = features.len(),
            numeric_columns = NUMERIC_FEATURE_COUNT,
            "Engineered feature batch"
        );

        Ok(features)
    }

    /// Check required fields and convert a raw record into a typed one.
    ///
    /// Every offending field is reported, not just the first.
    pub fn validate(&self, raw: &RawRecord) -> Result<TrafficRecord> {
        let mut missing = Vec::new();
        let mut invalid = Vec::new();
        let mut numbers = [0.0; 5];

        for (slot, field) in numbers.iter_mut().zip(RawField::iter()) {
            let name: &str = field.as_ref();
            match raw.get(name) {
                None | Some(Value::Null) => missing.push(name.to_string()),
                Some(value) => match parse_non_negative(value) {
                    Some(v) if is_integral_field(field) && v.fract() != 0.0 => {
                        invalid.push(name.to_string())
                    }
                    Some(v) if v >= integral_bound(field) => invalid.push(name.to_string()),
                    Some(v) => *slot = v,
                    None => invalid.push(name.to_string()),
                },
            }
        }

        let mut categories = [String::new(), String::new()];
        for (slot, field) in categories.iter_mut().zip(CategoricalFeature::iter()) {
            let name: &str = field.as_ref();
            match raw.get(name) {
                None | Some(Value::Null) => missing.push(name.to_string()),
                Some(Value::String(s)) if !s.trim().is_empty() => *slot = s.trim().to_string(),
                Some(_) => invalid.push(name.to_string()),
            }
        }

        if !missing.is_empty() || !invalid.is_empty() {
            let mut parts = Vec::new();
            if !missing.is_empty() {
                parts.push(format!("missing required fields: {}", missing.join(", ")));
            }
            if !invalid.is_empty() {
                parts.push(format!(
                    "fields must be non-negative numbers (integers for counts and hours) \
                     or non-empty categories: {}",
                    invalid.join(", ")
                ));
            }
            let message = parts.join("; ");
            error!(missing = ?missing, invalid = ?invalid, "Invalid input record");

            missing.extend(invalid);
            return Err(AppError::InvalidInput {
                fields: missing,
                message,
            });
        }

        let [duration, src_bytes, dst_bytes, packet_count, hour] = numbers;
        let [protocol, service] = categories;

        Ok(TrafficRecord {
            duration,
            src_bytes,
            dst_bytes,
            packet_count: packet_count as u64,
            hour: hour as u32,
            protocol,
            service,
        })
    }

    /// Compute engineered features for a validated record
    pub fn engineer(&self, record: &TrafficRecord) -> Result<EngineeredFeatures> {
        let features = EngineeredFeatures {
            duration: record.duration,
            src_bytes: record.src_bytes,
            dst_bytes: record.dst_bytes,
            packet_count: record.packet_count as f64,
            hour: record.hour as f64,
            peak_hour_flag: Self::peak_hour_flag(record.hour),
            packet_size_variance: Self::packet_size_variance(record),
            bytes_ratio: Self::bytes_ratio(record),
            avg_packet_size: Self::avg_packet_size(record),
            traffic_intensity: Self::traffic_intensity(record),
            protocol: record.protocol.clone(),
            service: record.service.clone(),
        };

        Self::validate_output(&features)?;
        Ok(features)
    }

    /// Every numeric column must be finite and every category present
    fn validate_output(features: &EngineeredFeatures) -> Result<()> {
        let mut broken: Vec<String> = NumericFeature::iter()
            .filter(|f| !features.value(*f).is_finite())
            .map(|f| f.to_string())
            .collect();

        broken.extend(
            CategoricalFeature::iter()
                .filter(|f| features.category(*f).is_empty())
                .map(|f| f.to_string()),
        );

        if !broken.is_empty() {
            error!(columns = ?broken, "Engineered features violate schema");
            return Err(AppError::Schema(format!(
                "missing or non-finite engineered features: {}",
                broken.join(", ")
            )));
        }

        Ok(())
    }

    fn peak_hour_flag(hour: u32) -> f64 {
        let hour = hour % 24;
        if PEAK_MORNING_HOURS.contains(&hour) || PEAK_EVENING_HOURS.contains(&hour) {
            1.0
        } else {
            0.0
        }
    }

    fn packet_divisor(record: &TrafficRecord) -> f64 {
        record.packet_count.max(1) as f64
    }

    /// Population variance over byte totals and per-packet sizes
    fn packet_size_variance(record: &TrafficRecord) -> f64 {
        let divisor = Self::packet_divisor(record);
        let sizes = [
            record.src_bytes,
            record.dst_bytes,
            record.src_bytes / divisor,
            record.dst_bytes / divisor,
        ];
        let mean = sizes.iter().sum::<f64>() / sizes.len() as f64;
        sizes.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / sizes.len() as f64
    }

    fn bytes_ratio(record: &TrafficRecord) -> f64 {
        record.src_bytes / record.dst_bytes.max(1.0)
    }

    fn avg_packet_size(record: &TrafficRecord) -> f64 {
        (record.src_bytes + record.dst_bytes) / Self::packet_divisor(record)
    }

    fn traffic_intensity(record: &TrafficRecord) -> f64 {
        (record.src_bytes + record.dst_bytes) / record.duration.max(MIN_DURATION_SECS)
    }
}

fn is_integral_field(field: RawField) -> bool {
    matches!(field, RawField::PacketCount | RawField::Hour)
}

/// Exclusive upper bound of the typed record field
fn integral_bound(field: RawField) -> f64 {
    match field {
        RawField::Hour => u32::MAX as f64 + 1.0,
        // rounds to 2^64
        RawField::PacketCount => u64::MAX as f64,
        _ => f64::INFINITY,
    }
}

/// Accepts JSON numbers and numeric strings; rejects negatives and non-finite values
fn parse_non_negative(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    if number.is_finite() && number >= 0.0 {
        Some(number)
    } else {
        None
    }
}
