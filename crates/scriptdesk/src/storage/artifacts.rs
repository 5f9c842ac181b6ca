use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use super::filesystem::{ensure_directory, remove_if_exists};
use crate::error::StorageError;

/// Per-script JSON documents kept next to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// `parse_results/script_{id}_parsed.json`
    Parse,
    /// `analysis_results/script_{id}_analysis.json`
    Analysis,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Parse, ArtifactKind::Analysis];

    fn directory(&self) -> &'static str {
        match self {
            ArtifactKind::Parse => "parse_results",
            ArtifactKind::Analysis => "analysis_results",
        }
    }

    fn file_name(&self, script_id: i64) -> String {
        match self {
            ArtifactKind::Parse => format!("script_{}_parsed.json", script_id),
            ArtifactKind::Analysis => format!("script_{}_analysis.json", script_id),
        }
    }
}

/// A serialized artifact waiting to replace the current one.
#[derive(Debug)]
pub struct StagedArtifact {
    file: NamedTempFile,
    path: PathBuf,
}

impl StagedArtifact {
    /// Renames the staged file over the artifact.
    pub fn commit(self) -> Result<PathBuf, StorageError> {
        let StagedArtifact { file, path } = self;
        file.persist(&path).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e.error,
        })?;
        Ok(path)
    }
}

/// Reads and writes artifacts under a storage root. Writes replace the
/// previous document for the same script.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, kind: ArtifactKind, script_id: i64) -> PathBuf {
        self.root
            .join(kind.directory())
            .join(kind.file_name(script_id))
    }

    /// Serializes and replaces the artifact in one step.
    pub fn write<T: Serialize>(
        &self,
        kind: ArtifactKind,
        script_id: i64,
        value: &T,
    ) -> Result<PathBuf, StorageError> {
        self.stage(kind, script_id, value)?.commit()
    }

    /// Serializes `value` into a uniquely named temp file next to the
    /// artifact. Nothing is visible until [`StagedArtifact::commit`]; dropping
    /// the staged file discards it. Concurrent writers each get their own
    /// temp file and the last commit wins.
    pub fn stage<T: Serialize>(
        &self,
        kind: ArtifactKind,
        script_id: i64,
        value: &T,
    ) -> Result<StagedArtifact, StorageError> {
        let path = self.path_for(kind, script_id);
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        ensure_directory(&parent)?;

        let body = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Json {
            path: path.clone(),
            source: e,
        })?;

        let write_err = |source: std::io::Error| StorageError::WriteFile {
            path: parent.clone(),
            source,
        };
        let mut file = NamedTempFile::new_in(&parent).map_err(write_err)?;
        file.write_all(&body).map_err(write_err)?;

        Ok(StagedArtifact { file, path })
    }

    /// Loads an artifact. `Ok(None)` when it was never written.
    pub fn read<T: DeserializeOwned>(
        &self,
        kind: ArtifactKind,
        script_id: i64,
    ) -> Result<Option<T>, StorageError> {
        let path = self.path_for(kind, script_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::ReadFile { path, source: e }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Json { path, source: e })
    }

    pub fn exists(&self, kind: ArtifactKind, script_id: i64) -> bool {
        self.path_for(kind, script_id).is_file()
    }

    pub fn remove(&self, kind: ArtifactKind, script_id: i64) -> Result<bool, StorageError> {
        remove_if_exists(&self.path_for(kind, script_id))
    }

    /// Removes every artifact of a script. Returns how many files were deleted.
    pub fn remove_all(&self, script_id: i64) -> Result<usize, StorageError> {
        let mut removed = 0;
        for kind in ArtifactKind::ALL {
            if self.remove(kind, script_id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
