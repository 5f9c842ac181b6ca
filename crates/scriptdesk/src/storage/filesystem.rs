use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::config::UploadSettings;
use crate::error::{StorageError, ValidationError};
use crate::sanitize::sanitize_filename;

pub(crate) fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Removes a file, treating an already-missing file as success.
/// Returns whether something was deleted.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::RemoveFile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `content` into a file this call just created. On failure the
/// partial file is removed.
fn fill_new_file<W: Write>(path: &Path, mut file: W, content: &[u8]) -> Result<(), StorageError> {
    let written = file.write_all(content).and_then(|()| file.flush());
    drop(file);
    if let Err(e) = written {
        if let Err(cleanup) = remove_if_exists(path) {
            log::warn!(
                "Failed to remove partial upload {}: {}",
                crate::sanitize::redact_path(path),
                cleanup
            );
        }
        return Err(StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}

/// A script file accepted by [`UploadStore::store`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredUpload {
    pub path: PathBuf,
    /// Client filename after sanitizing.
    pub filename: String,
    pub size: u64,
    pub mime_type: Option<String>,
}

/// Stores uploaded script files as `{YYYYmmdd_HHMMSS}_{filename}`.
pub struct UploadStore {
    directory: PathBuf,
    allowed_extensions: Vec<String>,
    max_upload_bytes: u64,
}

impl UploadStore {
    pub fn new<P: AsRef<Path>>(directory: P, settings: &UploadSettings) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            allowed_extensions: settings
                .allowed_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            max_upload_bytes: settings.max_upload_bytes,
        }
    }

    /// Upload directory under a storage root: `<root>/uploads/scripts`.
    pub fn under_root(root: &Path, settings: &UploadSettings) -> Self {
        Self::new(root.join("uploads").join("scripts"), settings)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Checks name, extension and size. Returns the sanitized filename.
    pub fn validate(&self, filename: &str, size: u64) -> Result<String, ValidationError> {
        let clean = sanitize_filename(filename)
            .ok_or_else(|| ValidationError::InvalidFilename(filename.to_string()))?;

        let extension = Path::new(&clean)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        if !self.allowed_extensions.contains(&extension) {
            return Err(ValidationError::ExtensionNotAllowed {
                extension,
                allowed: self.allowed_extensions.join(", "),
            });
        }

        if size > self.max_upload_bytes {
            return Err(ValidationError::TooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        Ok(clean)
    }

    /// Validates and writes an upload. Never overwrites an existing file.
    pub fn store(&self, filename: &str, content: &[u8]) -> crate::error::Result<StoredUpload> {
        let clean = self.validate(filename, content.len() as u64)?;
        ensure_directory(&self.directory)?;

        let stamped = format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), clean);
        let path = self.create_exclusive(&stamped, content)?;
        let mime_type = mime_guess::from_path(&path).first().map(|m| m.to_string());

        log::info!(
            "Stored upload {} ({} bytes)",
            crate::sanitize::redact_path(&path),
            content.len()
        );

        Ok(StoredUpload {
            path,
            filename: clean,
            size: content.len() as u64,
            mime_type,
        })
    }

    /// Creates `filename` in the upload directory, numbering it `_2`, `_3`,
    /// ... when taken. Creation is exclusive so concurrent uploads of the
    /// same name in the same second cannot clobber each other.
    fn create_exclusive(&self, filename: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        let (base, ext) = match filename.rfind('.') {
            Some(dot) => (&filename[..dot], Some(&filename[dot..])),
            None => (filename, None),
        };

        for counter in 1..=1000 {
            let candidate = if counter == 1 {
                filename.to_string()
            } else {
                match ext {
                    Some(ext) => format!("{}_{}{}", base, counter, ext),
                    None => format!("{}_{}", base, counter),
                }
            };
            let path = self.directory.join(&candidate);

            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => {
                    fill_new_file(&path, file, content)?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StorageError::WriteFile { path, source: e }),
            }
        }

        Err(StorageError::NoFreeName(filename.to_string()))
    }

    /// Deletes a stored upload. Missing files are not an error.
    pub fn remove(&self, path: &Path) -> Result<bool, StorageError> {
        remove_if_exists(path)
    }
}
