//! Kernel payloads: the SPIR-V bytes handed to the device runtime.

use std::ops::Deref;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("cannot read kernel payload '{}': {source}", path.display())]
pub struct PayloadError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Immutable payload bytes plus a content fingerprint for logs.
#[derive(Clone, Debug)]
pub struct KernelPayload {
    bytes: Vec<u8>,
    fingerprint: blake3::Hash,
}

impl KernelPayload {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let fingerprint = blake3::hash(&bytes);
        Self { bytes, fingerprint }
    }

    /// Read the whole file. The contents are not validated here.
    pub fn read(path: &Path) -> Result<Self, PayloadError> {
        let bytes = std::fs::read(path).map_err(|source| PayloadError {
            path: path.to_path_buf(),
            source,
        })?;
        let payload = Self::from_bytes(bytes);
        tracing::debug!(
            path = %path.display(),
            bytes = payload.len(),
            fingerprint = %payload.short_fingerprint(),
            "read kernel payload"
        );
        Ok(payload)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn fingerprint(&self) -> &blake3::Hash {
        &self.fingerprint
    }

    /// First 16 hex digits of the fingerprint.
    pub fn short_fingerprint(&self) -> String {
        self.fingerprint.to_hex()[..16].to_string()
    }
}

impl Deref for KernelPayload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4]).unwrap();
        let payload = KernelPayload::read(file.path()).unwrap();
        assert_eq!(payload.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(payload.len(), 4);
        assert_eq!(payload.fingerprint(), &blake3::hash(&[1, 2, 3, 4]));
        assert_eq!(payload.short_fingerprint().len(), 16);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = KernelPayload::read(&dir.path().join("kernel.spv")).unwrap_err();
        assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
        assert!(err.to_string().contains("kernel.spv"));
    }

    #[test]
    fn test_empty_file_is_accepted() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let payload = KernelPayload::read(file.path()).unwrap();
        assert!(payload.is_empty());
    }
}
