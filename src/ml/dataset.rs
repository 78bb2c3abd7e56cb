use crate::error::{AppError, Result};
use crate::ml::features::FeatureEngineer;
use crate::ml::models::{CategoricalFeature, EngineeredFeatures, RawField, RawRecord, LABEL_COLUMN};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use strum::IntoEnumIterator;
use tracing::{debug, error, info};

/// Labeled, feature-engineered training rows
#[derive(Debug, Clone, Default)]
pub struct TrafficDataset {
    records: Vec<EngineeredFeatures>,
    labels: Vec<usize>,
}

impl TrafficDataset {
    pub fn new(records: Vec<EngineeredFeatures>, labels: Vec<usize>) -> Result<Self> {
        if records.len() != labels.len() {
            error!(rows = records.len(), labels = labels.len(), "Dataset shape mismatch");
            return Err(AppError::DataLoad(format!(
                "{} records but {} labels",
                records.len(),
                labels.len()
            )));
        }
        if let Some(bad) = labels.iter().find(|&&label| label > 1) {
            error!(label = bad, "Dataset label outside {{0, 1}}");
            return Err(AppError::DataLoad(format!("label {} is not 0 or 1", bad)));
        }
        Ok(Self { records, labels })
    }

    /// Load a CSV file with a header row naming every record field plus `congestion`
    pub fn load_csv(path: &Path, engineer: &FeatureEngineer) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to open training dataset");
            AppError::DataLoad(format!("cannot read {}: {}", path.display(), e))
        })?;

        let dataset = Self::from_csv_reader(BufReader::new(file), engineer)?;
        info!(
            path = %path.display(),
            rows = dataset.len(),
            positives = dataset.positives(),
            "Loaded training dataset"
        );
        Ok(dataset)
    }

    pub fn from_csv_reader<R: BufRead>(reader: R, engineer: &FeatureEngineer) -> Result<Self> {
        let mut lines = reader.lines().enumerate();

        let header = loop {
            match lines.next() {
                Some((_, line)) => {
                    let line = line.map_err(read_error)?;
                    if !line.trim().is_empty() {
                        break parse_csv_line(&line);
                    }
                }
                None => {
                    error!("Training dataset is empty");
                    return Err(AppError::DataLoad("dataset is empty".to_string()));
                }
            }
        };
        let columns = DatasetColumns::from_header(&header)?;

        let mut records = Vec::new();
        let mut labels = Vec::new();

        for (index, line) in lines {
            let line = line.map_err(read_error)?;
            if line.trim().is_empty() {
                continue;
            }
            let line_no = index + 1;
            let cells = parse_csv_line(&line);

            if cells.len() != header.len() {
                error!(line = line_no, cells = cells.len(), expected = header.len(), "Malformed dataset row");
                return Err(AppError::DataLoad(format!(
                    "line {}: expected {} columns, found {}",
                    line_no,
                    header.len(),
                    cells.len()
                )));
            }

            let raw = columns.record(&cells);
            let features = engineer
                .transform(&raw)
                .map_err(|e| AppError::DataLoad(format!("line {}: {}", line_no, e)))?;
            let cell = &cells[columns.label];
            let label = parse_label(cell).ok_or_else(|| {
                error!(line = line_no, value = %cell, "Invalid label value");
                AppError::DataLoad(format!("line {}: label {:?} is not 0 or 1", line_no, cell))
            })?;

            records.push(features);
            labels.push(label);
        }

        if records.is_empty() {
            error!("Training dataset has a header but no rows");
            return Err(AppError::DataLoad("dataset has no rows".to_string()));
        }

        Ok(Self { records, labels })
    }

    pub fn records(&self) -> &[EngineeredFeatures] {
        &self.records
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of congested rows
    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&label| label == 1).count()
    }

    /// Rows at the given indices, in index order
    pub fn subset(&self, indices: &[usize]) -> TrafficDataset {
        TrafficDataset {
            records: indices.iter().map(|&i| self.records[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

/// Column positions resolved from the header row
struct DatasetColumns {
    fields: Vec<(String, usize)>,
    label: usize,
}

impl DatasetColumns {
    fn from_header(header: &[String]) -> Result<Self> {
        let position = |name: &str| header.iter().position(|h| h == name);

        let label = position(LABEL_COLUMN).ok_or_else(|| {
            error!(header = ?header, "Training dataset lacks the label column");
            AppError::DataLoad(format!("missing label column '{}'", LABEL_COLUMN))
        })?;

        let names: Vec<String> = RawField::iter()
            .map(|f| f.to_string())
            .chain(CategoricalFeature::iter().map(|f| f.to_string()))
            .collect();

        let mut fields = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match position(&name) {
                Some(idx) => fields.push((name, idx)),
                None => missing.push(name),
            }
        }

        if !missing.is_empty() {
            error!(missing = ?missing, "Training dataset lacks feature columns");
            return Err(AppError::DataLoad(format!(
                "missing feature columns: {}",
                missing.join(", ")
            )));
        }

        debug!(columns = header.len(), "Resolved dataset header");
        Ok(Self { fields, label })
    }

    /// Empty cells are left out so they surface as missing fields
    fn record(&self, cells: &[String]) -> RawRecord {
        self.fields
            .iter()
            .filter(|(_, idx)| !cells[*idx].is_empty())
            .map(|(name, idx)| (name.clone(), Value::String(cells[*idx].clone())))
            .collect()
    }
}

fn read_error(e: std::io::Error) -> AppError {
    error!(error = %e, "Failed to read training dataset");
    AppError::DataLoad(format!("read failed: {}", e))
}

fn parse_label(cell: &str) -> Option<usize> {
    match cell.parse::<f64>().ok()? {
        v if v == 0.0 => Some(0),
        v if v == 1.0 => Some(1),
        _ => None,
    }
}

/// Split one CSV line, honouring double-quoted cells
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    let mut chars = line.trim_end_matches('\r').chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            // doubled quote inside a quoted cell is a literal quote
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Seeded stratified train/test split.
///
/// Each class contributes to the test partition in proportion to its size;
/// leftover test slots go to the classes with the largest fractional share.
/// Returns `(train, test)` row indices.
pub fn stratified_split(
    labels: &[usize],
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let classes = class_indices(labels);
    if classes.len() < 2 {
        error!(rows = labels.len(), "Cannot stratify a single-class dataset");
        return Err(AppError::DataLoad(
            "dataset must contain both congestion classes".to_string(),
        ));
    }
    if let Some(small) = classes.iter().find(|members| members.len() < 2) {
        error!(members = small.len(), "Class too small to stratify");
        return Err(AppError::DataLoad(
            "every class needs at least two rows for a stratified split".to_string(),
        ));
    }

    let n = labels.len();
    let n_test = ((test_fraction * n as f64).ceil() as usize).clamp(classes.len(), n - classes.len());

    // Proportional allocation with largest-remainder rounding
    let shares: Vec<f64> = classes
        .iter()
        .map(|members| n_test as f64 * members.len() as f64 / n as f64)
        .collect();
    let mut allocation: Vec<usize> = shares.iter().map(|s| s.floor() as usize).collect();
    let mut by_remainder: Vec<usize> = (0..classes.len()).collect();
    by_remainder.sort_by(|&a, &b| {
        let ra = shares[a] - shares[a].floor();
        let rb = shares[b] - shares[b].floor();
        rb.total_cmp(&ra)
    });
    let assigned: usize = allocation.iter().sum();
    for &class in by_remainder.iter().take(n_test - assigned) {
        allocation[class] += 1;
    }
    for (slot, members) in allocation.iter_mut().zip(&classes) {
        *slot = (*slot).clamp(1, members.len() - 1);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n);
    let mut test = Vec::with_capacity(n_test);
    for (members, &take) in classes.iter().zip(&allocation) {
        let mut shuffled = members.clone();
        shuffled.shuffle(&mut rng);
        test.extend_from_slice(&shuffled[..take]);
        train.extend_from_slice(&shuffled[take..]);
    }

    train.shuffle(&mut rng);
    test.sort_unstable();

    debug!(train = train.len(), test = test.len(), seed, "Stratified split");
    Ok((train, test))
}

/// Non-shuffled stratified k-fold over positions `0..labels.len()`.
///
/// Each class is cut into `k` contiguous chunks (earlier chunks take the
/// remainder) and fold `f` tests on chunk `f` of every class. Returns
/// `(train, validation)` position lists per fold.
pub fn stratified_kfold(labels: &[usize], k: usize) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
    let classes = class_indices(labels);
    if k < 2 || classes.iter().any(|members| members.len() < k) {
        error!(folds = k, "Not enough rows per class for cross-validation");
        return Err(AppError::Training(format!(
            "every class needs at least {} rows for {}-fold cross-validation",
            k.max(2),
            k
        )));
    }

    let mut fold_of = vec![0usize; labels.len()];
    for members in &classes {
        let (base, extra) = (members.len() / k, members.len() % k);
        let mut cursor = 0;
        for fold in 0..k {
            let size = base + usize::from(fold < extra);
            for &idx in &members[cursor..cursor + size] {
                fold_of[idx] = fold;
            }
            cursor += size;
        }
    }

    Ok((0..k)
        .map(|fold| {
            let (validation, train): (Vec<usize>, Vec<usize>) =
                (0..labels.len()).partition(|&i| fold_of[i] == fold);
            (train, validation)
        })
        .collect())
}

/// Row indices grouped by label, classes in ascending label order
fn class_indices(labels: &[usize]) -> Vec<Vec<usize>> {
    let n_classes = labels.iter().copied().max().map(|m| m + 1).unwrap_or(0);
    let mut classes = vec![Vec::new(); n_classes];
    for (i, &label) in labels.iter().enumerate() {
        classes[label].push(i);
    }
    classes.retain(|members| !members.is_empty());
    classes
}
