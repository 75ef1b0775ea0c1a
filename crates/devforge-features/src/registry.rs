//! Registry collaborator interface.
//!
//! The network transport (HTTP, authentication, retries with backoff) lives
//! behind [`RegistryClient`]. Errors reaching this crate are final: the
//! client has already retried whatever it considers transient.
//!
//! [`DirectoryRegistry`] serves packages from a local mirror directory and
//! is what offline and air-gapped setups use.

use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use devforge_common::constants::FEATURE_MANIFEST_FILE;
use devforge_common::types::Sha256Digest;
use thiserror::Error;

use crate::hash::hash_bytes;

/// Errors reported by a registry client after its own retries.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The identifier or reference does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The registry could not be reached or answered garbage.
    #[error("transport error: {0}")]
    Transport(String),
}

/// A manifest as published for one tag or digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedManifest {
    /// Digest of the package archive the manifest belongs to.
    pub digest: Sha256Digest,
    /// Raw `devcontainer-feature.json` bytes.
    pub manifest_bytes: Vec<u8>,
}

/// Access to an OCI-style feature registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Lists the published tags of `identifier`.
    async fn list_tags(&self, identifier: &str) -> Result<Vec<String>, RegistryError>;

    /// Fetches the manifest published under `reference` (a tag or `sha256:` digest).
    async fn fetch_manifest(
        &self,
        identifier: &str,
        reference: &str,
    ) -> Result<FetchedManifest, RegistryError>;

    /// Fetches the package archive with the given digest.
    async fn fetch_layer(
        &self,
        identifier: &str,
        digest: &Sha256Digest,
    ) -> Result<Vec<u8>, RegistryError>;
}

/// A registry mirrored into a directory.
///
/// Layout: `<root>/<identifier>/<tag>.tgz`, one gzip-compressed package
/// archive per published tag.
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    root: PathBuf,
}

/// Extension of mirrored package archives.
const ARCHIVE_EXTENSION: &str = "tgz";

impl DirectoryRegistry {
    /// Serves packages mirrored under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn feature_dir(&self, identifier: &str) -> PathBuf {
        self.root.join(identifier)
    }

    async fn read_archive(&self, path: &Path) -> Result<Vec<u8>, RegistryError> {
        tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RegistryError::NotFound(path.display().to_string()),
            _ => RegistryError::Transport(format!("{}: {e}", path.display())),
        })
    }

    /// Finds the archive whose bytes hash to `digest`.
    async fn find_by_digest(
        &self,
        identifier: &str,
        digest: &Sha256Digest,
    ) -> Result<Vec<u8>, RegistryError> {
        for tag in self.list_tags(identifier).await? {
            let bytes = self.read_archive(&self.archive_path(identifier, &tag)).await?;
            if &hash_bytes(&bytes) == digest {
                return Ok(bytes);
            }
        }
        Err(RegistryError::NotFound(format!("{identifier}@{digest}")))
    }

    fn archive_path(&self, identifier: &str, tag: &str) -> PathBuf {
        self.feature_dir(identifier)
            .join(format!("{tag}.{ARCHIVE_EXTENSION}"))
    }
}

#[async_trait]
impl RegistryClient for DirectoryRegistry {
    async fn list_tags(&self, identifier: &str) -> Result<Vec<String>, RegistryError> {
        let dir = self.feature_dir(identifier);
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RegistryError::NotFound(identifier.to_string()),
            _ => RegistryError::Transport(format!("{}: {e}", dir.display())),
        })?;
        let mut tags = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RegistryError::Transport(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION) {
                if let Some(stem) = path.file_stem() {
                    tags.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        tags.sort();
        Ok(tags)
    }

    async fn fetch_manifest(
        &self,
        identifier: &str,
        reference: &str,
    ) -> Result<FetchedManifest, RegistryError> {
        let bytes = match Sha256Digest::parse(reference) {
            Ok(digest) => self.find_by_digest(identifier, &digest).await?,
            Err(_) => self.read_archive(&self.archive_path(identifier, reference)).await?,
        };
        let digest = hash_bytes(&bytes);
        let manifest_bytes = tokio::task::spawn_blocking(move || manifest_from_archive(&bytes))
            .await
            .map_err(|e| RegistryError::Transport(e.to_string()))??;
        Ok(FetchedManifest {
            digest,
            manifest_bytes,
        })
    }

    async fn fetch_layer(
        &self,
        identifier: &str,
        digest: &Sha256Digest,
    ) -> Result<Vec<u8>, RegistryError> {
        self.find_by_digest(identifier, digest).await
    }
}

/// Reads the manifest file out of a gzip-compressed package archive.
fn manifest_from_archive(bytes: &[u8]) -> Result<Vec<u8>, RegistryError> {
    let broken = |e: std::io::Error| RegistryError::Transport(format!("unreadable package: {e}"));
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(bytes));
    for entry in archive.entries().map_err(broken)? {
        let mut entry = entry.map_err(broken)?;
        let path = entry.path().map_err(broken)?.into_owned();
        if path.file_name().is_some_and(|n| n == FEATURE_MANIFEST_FILE)
            && path.components().count() <= 2
        {
            let mut manifest = Vec::new();
            let _ = entry.read_to_end(&mut manifest).map_err(broken)?;
            return Ok(manifest);
        }
    }
    Err(RegistryError::Transport(format!(
        "package has no {FEATURE_MANIFEST_FILE}"
    )))
}
