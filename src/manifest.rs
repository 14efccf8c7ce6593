//! Batch manifest (`info.json`).
//!
//! Written once per batch, after every artifact is on disk. The
//! `manifest_hash` covers the canonical JSON of all other fields, so a
//! loaded manifest can be checked for tampering or truncation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hashing::compute_manifest_hash;
use crate::storage::{write_atomic, BatchDir, MANIFEST_FILE};
use crate::templates::ScriptStyle;
use crate::validation::ValidationViolation;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed manifest: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Manifest hash mismatch: recorded {recorded}, computed {computed}")]
    HashMismatch { recorded: String, computed: String },
}

/// Files produced for one name. Paths are relative to the batch directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateArtifact {
    pub name: String,
    pub png: PathBuf,
    pub jpg: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf: Option<PathBuf>,
    pub png_sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Render,
    Pdf,
    Merge,
}

/// A per-name problem that did not abort the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameFailure {
    pub name: Option<String>,
    pub stage: FailureStage,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchManifest {
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub engine_version: String,
    pub style: ScriptStyle,
    pub names: Vec<String>,
    pub artifacts: Vec<CertificateArtifact>,
    pub has_pdf: bool,
    pub has_combined_pdf: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combined_pdf: Option<PathBuf>,
    #[serde(default)]
    pub failures: Vec<NameFailure>,
    #[serde(default)]
    pub warnings: Vec<ValidationViolation>,
    pub request_hash: String,
    pub manifest_hash: String,
}

impl BatchManifest {
    /// Hash of every field except `manifest_hash` itself.
    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        let mut unhashed = self.clone();
        unhashed.manifest_hash = String::new();
        compute_manifest_hash(&unhashed)
    }

    pub fn seal(&mut self) -> Result<(), serde_json::Error> {
        self.manifest_hash = self.compute_hash()?;
        Ok(())
    }

    /// Seal and write `info.json` into the batch directory.
    pub fn persist(&mut self, dir: &BatchDir) -> Result<PathBuf, ManifestError> {
        self.seal()?;
        let path = dir.manifest_path();
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&path, &json).map_err(|source| ManifestError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Read `<dir>/info.json` and verify its hash.
    pub fn load(dir: &Path) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = fs::read(&path).map_err(|source| ManifestError::Read {
            path: path.clone(),
            source,
        })?;
        let manifest: BatchManifest = serde_json::from_slice(&bytes)?;

        let computed = manifest.compute_hash()?;
        if computed != manifest.manifest_hash {
            return Err(ManifestError::HashMismatch {
                recorded: manifest.manifest_hash,
                computed,
            });
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BatchManifest {
        BatchManifest {
            batch_id: "cert_0123456789abcdef.42".to_string(),
            created_at: Utc::now(),
            engine_version: crate::ENGINE_VERSION.to_string(),
            style: ScriptStyle::Arial,
            names: vec!["Anju Shah".to_string()],
            artifacts: vec![CertificateArtifact {
                name: "Anju Shah".to_string(),
                png: PathBuf::from("cert_1_Anju_Shah.png"),
                jpg: PathBuf::from("jpg/cert_1_Anju_Shah.jpg"),
                pdf: None,
                png_sha256: "00".repeat(32),
            }],
            has_pdf: false,
            has_combined_pdf: false,
            combined_pdf: None,
            failures: vec![],
            warnings: vec![],
            request_hash: "11".repeat(32),
            manifest_hash: String::new(),
        }
    }

    #[test]
    fn test_persist_then_load_verifies() {
        let out = tempfile::tempdir().unwrap();
        let dir = BatchDir::create(out.path(), "cert_0123456789abcdef.42").unwrap();
        let mut manifest = sample();
        manifest.persist(&dir).unwrap();

        let loaded = BatchManifest::load(&dir.root).unwrap();
        assert_eq!(loaded.manifest_hash, manifest.manifest_hash);
        assert_eq!(loaded.artifacts, manifest.artifacts);
    }

    #[test]
    fn test_hash_ignores_its_own_field() {
        let mut manifest = sample();
        let before = manifest.compute_hash().unwrap();
        manifest.manifest_hash = "anything".to_string();
        assert_eq!(manifest.compute_hash().unwrap(), before);
    }

    #[test]
    fn test_edited_manifest_is_rejected() {
        let out = tempfile::tempdir().unwrap();
        let dir = BatchDir::create(out.path(), "cert_0123456789abcdef.42").unwrap();
        sample().persist(&dir).unwrap();

        let path = dir.manifest_path();
        let edited = fs::read_to_string(&path).unwrap().replace("Anju Shah", "Someone Else");
        fs::write(&path, edited).unwrap();

        assert!(matches!(
            BatchManifest::load(&dir.root),
            Err(ManifestError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_manifest_is_read_error() {
        let out = tempfile::tempdir().unwrap();
        assert!(matches!(
            BatchManifest::load(out.path()),
            Err(ManifestError::Read { .. })
        ));
    }
}
