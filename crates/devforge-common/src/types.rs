//! Domain primitive types used across the devforge workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Identifies the container the exec collaborator should target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerTarget(String);

impl ContainerTarget {
    /// Creates a target from a container id or name.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical identity of a feature within one installation.
///
/// Registry features are keyed by `registry/path/name` without tag or
/// digest, local features by their normalized absolute path. Two references
/// with the same `FeatureId` describe the same graph node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureId(String);

impl FeatureId {
    /// Creates a feature id from its canonical string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the last path segment, used for staging directory names.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 digest used to address cached packages.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Creates a digest from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self, CacheError> {
        let hex = hex.into().to_ascii_lowercase();
        if hex.len() != crate::constants::SHA256_HEX_LENGTH
            || !hex.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(CacheError::Corrupt {
                digest: hex,
                actual: "not a sha256 hex digest".into(),
            });
        }
        Ok(Self(hex))
    }

    /// Creates a digest from the 32 raw bytes of a SHA-256 hash.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        use std::fmt::Write as _;
        let mut hex = String::with_capacity(crate::constants::SHA256_HEX_LENGTH);
        for byte in bytes {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Parses the `sha256:<hex>` form used by OCI registries.
    ///
    /// # Errors
    ///
    /// Returns an error if the algorithm prefix is missing or the hex is invalid.
    pub fn parse(value: &str) -> Result<Self, CacheError> {
        value.strip_prefix("sha256:").map_or_else(
            || {
                Err(CacheError::Corrupt {
                    digest: value.to_string(),
                    actual: "missing sha256: prefix".into(),
                })
            },
            Self::from_hex,
        )
    }

    /// Returns the hex-encoded digest.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// Which substitution pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Before the container exists; only local sources are available.
    PreContainer,
    /// After the container was created; its environment is available.
    PostContainer,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreContainer => write!(f, "pre-container"),
            Self::PostContainer => write!(f, "post-container"),
        }
    }
}
