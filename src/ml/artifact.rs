use crate::error::{AppError, Result};
use crate::ml::features::FeatureEncoder;
use crate::ml::forest::RandomForestRegressor;
use crate::ml::models::ModelMetadata;
use crate::models::{Advisory, FeatureSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

const ARTIFACT_MAGIC: [u8; 4] = *b"CVSM";
const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// What happens to the previous artifact when a new one is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementPolicy {
    /// Replace the previous artifact outright
    #[default]
    Overwrite,

    /// Keep the previous artifact alongside as `<path>.bak`
    KeepBackup,
}

/// Trained encoder and forest, plus the metadata of the run that produced them
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub metadata: ModelMetadata,
    pub encoder: FeatureEncoder,
    pub model: RandomForestRegressor,
}

impl ModelArtifact {
    pub fn feature_set(&self) -> FeatureSet {
        self.encoder.feature_set()
    }

    /// Encode and score advisories, one score per input in input order
    pub fn predict(&self, advisories: &[&Advisory]) -> Result<Vec<f64>> {
        let features = self.encoder.transform(advisories);
        Ok(self.model.predict(&features)?.to_vec())
    }

    pub fn predict_one(&self, advisory: &Advisory) -> Result<f64> {
        self.predict(&[advisory])?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Prediction("model returned no score".to_string()))
    }
}

/// On-disk envelope guarding the payload against truncation and format drift
#[derive(Serialize, Deserialize)]
struct ArtifactEnvelope {
    magic: [u8; 4],
    format_version: u32,
    sha256: Vec<u8>,
    payload: Vec<u8>,
}

/// File identity a cached artifact was loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

struct CachedArtifact {
    stamp: Option<FileStamp>,
    artifact: Arc<ModelArtifact>,
}

/// File-backed store for a single model artifact.
///
/// Writes go to `<path>.tmp`, are fsynced, then renamed into place, so readers
/// see either the old or the new artifact in full. Loads are cached and
/// refreshed whenever the file's modification time changes.
pub struct ArtifactStore {
    path: PathBuf,
    policy: ReplacementPolicy,
    cache: RwLock<Option<CachedArtifact>>,
}

impl ArtifactStore {
    pub fn new(path: impl Into<PathBuf>, policy: ReplacementPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path, "bak")
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Persist `artifact`, replacing the current one according to the policy
    pub fn save(&self, artifact: ModelArtifact) -> Result<Arc<ModelArtifact>> {
        let payload = bincode::serialize(&artifact)?;
        let envelope = ArtifactEnvelope {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            sha256: Sha256::digest(&payload).to_vec(),
            payload,
        };
        let bytes = bincode::serialize(&envelope)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = with_suffix(&self.path, "tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }

        if self.policy == ReplacementPolicy::KeepBackup && self.path.exists() {
            fs::copy(&self.path, self.backup_path())?;
            debug!(backup = %self.backup_path().display(), "Kept previous model artifact");
        }
        fs::rename(&tmp_path, &self.path)?;

        info!(
            path = %self.path.display(),
            feature_set = %artifact.metadata.feature_set,
            run_id = %artifact.metadata.run_id,
            bytes = bytes.len(),
            "Model artifact written"
        );

        let artifact = Arc::new(artifact);
        *self.cache.write() = Some(CachedArtifact {
            stamp: file_stamp(&self.path),
            artifact: artifact.clone(),
        });
        Ok(artifact)
    }

    /// Load the artifact, reusing the cached copy while the file is unchanged
    pub fn load(&self) -> Result<Arc<ModelArtifact>> {
        if !self.path.exists() {
            return Err(AppError::Configuration(format!(
                "Model file not found at {}",
                self.path.display()
            )));
        }
        let stamp = file_stamp(&self.path);

        if let Some(cached) = self.cache.read().as_ref() {
            if cached.stamp.is_some() && cached.stamp == stamp {
                return Ok(cached.artifact.clone());
            }
        }

        let artifact = Arc::new(self.read_from_disk()?);
        debug!(
            path = %self.path.display(),
            run_id = %artifact.metadata.run_id,
            "Model artifact loaded"
        );

        *self.cache.write() = Some(CachedArtifact {
            stamp,
            artifact: artifact.clone(),
        });
        Ok(artifact)
    }

    fn read_from_disk(&self) -> Result<ModelArtifact> {
        let mut bytes = Vec::new();
        File::open(&self.path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| corrupt(&self.path, format!("unreadable: {}", e)))?;

        let envelope: ArtifactEnvelope = bincode::deserialize(&bytes)
            .map_err(|e| corrupt(&self.path, format!("not a model artifact: {}", e)))?;

        if envelope.magic != ARTIFACT_MAGIC {
            return Err(corrupt(&self.path, "not a model artifact".to_string()));
        }
        if envelope.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(corrupt(
                &self.path,
                format!(
                    "format version {} is not supported (expected {})",
                    envelope.format_version, ARTIFACT_FORMAT_VERSION
                ),
            ));
        }
        if Sha256::digest(&envelope.payload).as_slice() != envelope.sha256.as_slice() {
            return Err(corrupt(&self.path, "checksum mismatch".to_string()));
        }

        bincode::deserialize(&envelope.payload)
            .map_err(|e| corrupt(&self.path, format!("payload decode failed: {}", e)))
    }
}

fn corrupt(path: &Path, reason: String) -> AppError {
    AppError::Configuration(format!("Model file at {} is {}", path.display(), reason))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn file_stamp(path: &Path) -> Option<FileStamp> {
    let metadata = fs::metadata(path).ok()?;
    Some(FileStamp {
        modified: metadata.modified().ok()?,
        len: metadata.len(),
    })
}
