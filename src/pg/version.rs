//! PostgreSQL version detection.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Server versions whose WAL formats this crate reads.
pub const SUPPORTED_VERSIONS: &[&str] = &["9.1", "9.4"];

/// Errors from version detection.
#[derive(Debug)]
pub enum VersionError {
    /// The `PG_VERSION` file could not be read.
    Io {
        /// Path of the version file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The data directory belongs to a server version without a supported
    /// WAL format.
    Unsupported(String),
}

impl fmt::Display for VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionError::Io { path, source } => {
                write!(f, "failed to read {:?}: {}", path, source)
            }
            VersionError::Unsupported(version) => {
                write!(
                    f,
                    "postgres {} is not supported (supported: {})",
                    version,
                    SUPPORTED_VERSIONS.join(", ")
                )
            }
        }
    }
}

impl std::error::Error for VersionError {}

/// Reads the server version out of `<dataDir>/PG_VERSION`.
pub async fn detect_pg_version(data_dir: impl AsRef<Path>) -> Result<String, VersionError> {
    let path = data_dir.as_ref().join("PG_VERSION");
    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| VersionError::Io { path, source })?;
    Ok(contents.trim().to_string())
}

/// Whether a detected version has a supported WAL format.
pub fn is_supported(version: &str) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// Detects the server version and fails on unsupported ones.
pub async fn ensure_supported(data_dir: impl AsRef<Path>) -> Result<String, VersionError> {
    let version = detect_pg_version(data_dir).await?;
    if !is_supported(&version) {
        return Err(VersionError::Unsupported(version));
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_detects_trimmed_version() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("PG_VERSION"), "9.4\n")
            .await
            .unwrap();
        assert_eq!(detect_pg_version(dir.path()).await.unwrap(), "9.4");
        assert_eq!(ensure_supported(dir.path()).await.unwrap(), "9.4");
    }

    #[tokio::test]
    async fn test_unsupported_version_is_rejected() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("PG_VERSION"), "12\n")
            .await
            .unwrap();
        let err = ensure_supported(dir.path()).await.unwrap_err();
        assert!(matches!(err, VersionError::Unsupported(v) if v == "12"));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = detect_pg_version(dir.path()).await.unwrap_err();
        assert!(matches!(err, VersionError::Io { .. }));
    }
}
