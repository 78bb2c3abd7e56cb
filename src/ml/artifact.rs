use crate::error::{AppError, Result};
use crate::ml::models::TrainedModel;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{error, info};

/// Leading bytes of every artifact
const ARTIFACT_MAGIC: [u8; 8] = *b"CONGPIPE";

/// Bumped whenever the encoded model layout changes
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ArtifactEnvelope {
    magic: [u8; 8],
    format_version: u32,
    /// Hex SHA-256 of `payload`
    checksum: String,
    payload: Vec<u8>,
}

/// Hex-encoded SHA-256 digest
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Atomically write a trained model to `path`.
///
/// The artifact is written to a temporary file beside the target and renamed
/// over it, so readers see either the previous artifact or the complete new one.
pub fn save_model(model: &TrainedModel, path: &Path) -> Result<()> {
    let payload = bincode::serialize(model).map_err(|e| persist_error(path, e))?;
    let envelope = ArtifactEnvelope {
        magic: ARTIFACT_MAGIC,
        format_version: ARTIFACT_FORMAT_VERSION,
        checksum: checksum(&payload),
        payload,
    };
    let bytes = bincode::serialize(&envelope).map_err(|e| persist_error(path, e))?;

    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| persist_error(path, e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| persist_error(path, e))?;
    tmp.write_all(&bytes).map_err(|e| persist_error(path, e))?;
    tmp.as_file().sync_all().map_err(|e| persist_error(path, e))?;
    tmp.persist(path).map_err(|e| persist_error(path, e.error))?;

    info!(
        path = %path.display(),
        bytes = bytes.len(),
        checksum = %envelope.checksum,
        "Model artifact saved"
    );
    Ok(())
}

/// Read, verify and decode a model artifact
pub fn load_model(path: &Path) -> Result<TrainedModel> {
    if !path.is_file() {
        error!(path = %path.display(), "Model artifact not found");
        return Err(AppError::ModelNotFound(path.display().to_string()));
    }

    let bytes = fs::read(path).map_err(|e| load_error(path, e))?;
    let envelope: ArtifactEnvelope = bincode::deserialize(&bytes).map_err(|e| load_error(path, e))?;

    if envelope.magic != ARTIFACT_MAGIC {
        return Err(load_error(path, "not a congestion model artifact"));
    }
    if envelope.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(load_error(
            path,
            format!(
                "unsupported format version {} (expected {})",
                envelope.format_version, ARTIFACT_FORMAT_VERSION
            ),
        ));
    }
    if checksum(&envelope.payload) != envelope.checksum {
        return Err(load_error(path, "checksum mismatch"));
    }

    let model: TrainedModel =
        bincode::deserialize(&envelope.payload).map_err(|e| load_error(path, e))?;
    model
        .pipeline
        .preprocessor()
        .check_schema()
        .map_err(|e| load_error(path, e))?;

    info!(
        path = %path.display(),
        model_id = %model.metadata.id,
        trained_at = %model.metadata.trained_at,
        "Model artifact loaded"
    );
    Ok(model)
}

fn persist_error(path: &Path, cause: impl std::fmt::Display) -> AppError {
    error!(path = %path.display(), error = %cause, "Failed to persist model artifact");
    AppError::Persist(format!("{}: {}", path.display(), cause))
}

fn load_error(path: &Path, cause: impl std::fmt::Display) -> AppError {
    error!(path = %path.display(), error = %cause, "Failed to load model artifact");
    AppError::ModelLoad(format!("{}: {}", path.display(), cause))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GradientBoostingParams, TrainingConfig};
    use crate::ml::dataset::TrafficDataset;
    use crate::ml::features::FeatureEngineer;
    use crate::ml::trainer::Trainer;
    use serde_json::json;

    fn small_model() -> TrainedModel {
        let engineer = FeatureEngineer::new();
        let mut records = Vec::new();
        let mut labels = Vec::new();
        for i in 0..30u64 {
            let busy = i % 3 == 0;
            let raw = json!({
                "duration": if busy { 12 } else { 1 },
                "src_bytes": if busy { 5000 + i } else { 60 + i },
                "dst_bytes": if busy { 3000 } else { 40 },
                "packet_count": if busy { 90 } else { 3 },
                "hour": if busy { 8 } else { 3 },
                "protocol": "TCP",
                "service": "http"
            });
            records.push(engineer.transform(raw.as_object().unwrap()).unwrap());
            labels.push(busy as usize);
        }
        let config = TrainingConfig {
            model_params: GradientBoostingParams {
                n_estimators: 5,
                ..GradientBoostingParams::default()
            },
            ..TrainingConfig::default()
        };
        let dataset = TrafficDataset::new(records, labels).unwrap();
        Trainer::new(config).fit_dataset(&dataset).unwrap()
    }

    #[test]
    fn test_save_under_regular_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();

        let err = save_model(&small_model(), &blocker.join("model.bin")).unwrap_err();
        assert_eq!(err.error_code(), "PERSIST_ERROR");
    }

    #[test]
    fn test_save_over_directory_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let model = small_model();

        let saved = dir.path().join("saved.bin");
        save_model(&model, &saved).unwrap();

        let occupied = dir.path().join("occupied");
        fs::create_dir(&occupied).unwrap();
        let err = save_model(&model, &occupied).unwrap_err();
        assert_eq!(err.error_code(), "PERSIST_ERROR");

        let mut entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["occupied", "saved.bin"]);
        assert!(occupied.is_dir());

        let reloaded = load_model(&saved).unwrap();
        assert_eq!(reloaded.metadata.id, model.metadata.id);
    }

    #[test]
    fn test_stale_feature_schema_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");

        let mut payload = bincode::serialize(&small_model()).unwrap();
        let (old, new) = (b"packet_size_variance", b"packet_size_varianxe");
        let mut pos = 0;
        while let Some(offset) = payload[pos..].windows(old.len()).position(|w| w == old) {
            let start = pos + offset;
            payload[start..start + old.len()].copy_from_slice(new);
            pos = start + old.len();
        }
        let stale = ArtifactEnvelope {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            checksum: checksum(&payload),
            payload,
        };
        fs::write(&path, bincode::serialize(&stale).unwrap()).unwrap();

        let err = load_model(&path).unwrap_err();
        assert_eq!(err.error_code(), "MODEL_LOAD_ERROR");
        assert!(err.to_string().contains("packet_size_varianxe"));
    }

    #[test]
    fn test_round_trip_keeps_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.bin");
        let model = small_model();

        save_model(&model, &path).unwrap();
        let reloaded = load_model(&path).unwrap();
        assert_eq!(reloaded.metadata.feature_names, model.metadata.feature_names);
        assert_eq!(reloaded.metadata.test_metrics, model.metadata.test_metrics);
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_model(&dir.path().join("absent.bin")).unwrap_err();
        assert_eq!(err.error_code(), "MODEL_NOT_FOUND");
    }

    #[test]
    fn test_garbage_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        fs::write(&path, b"not a model").unwrap();

        let err = load_model(&path).unwrap_err();
        assert_eq!(err.error_code(), "MODEL_LOAD_ERROR");
    }

    #[test]
    fn test_wrong_magic_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");

        let payload = vec![1u8, 2, 3];
        let foreign = ArtifactEnvelope {
            magic: *b"SOMEFILE",
            format_version: ARTIFACT_FORMAT_VERSION,
            checksum: checksum(&payload),
            payload: payload.clone(),
        };
        fs::write(&path, bincode::serialize(&foreign).unwrap()).unwrap();
        let err = load_model(&path).unwrap_err();
        assert!(err.to_string().contains("not a congestion model"));

        let future = ArtifactEnvelope {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION + 1,
            checksum: checksum(&payload),
            payload,
        };
        fs::write(&path, bincode::serialize(&future).unwrap()).unwrap();
        let err = load_model(&path).unwrap_err();
        assert!(err.to_string().contains("format version"));
    }

    #[test]
    fn test_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");

        let tampered = ArtifactEnvelope {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            checksum: checksum(b"original"),
            payload: b"modified".to_vec(),
        };
        fs::write(&path, bincode::serialize(&tampered).unwrap()).unwrap();
        let err = load_model(&path).unwrap_err();
        assert_eq!(err.error_code(), "MODEL_LOAD_ERROR");
        assert!(err.to_string().contains("checksum"));
    }
}
