//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Environment variable that overrides the package cache location.
pub const CACHE_DIR_ENV: &str = "DEVFORGE_CACHE_DIR";

/// Returns the cache directory, preferring `$DEVFORGE_CACHE_DIR`, then
/// `$HOME/.devforge/cache`, falling back to the system temp directory.
fn resolve_cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        return PathBuf::from(home).join(".devforge").join("cache");
    }
    std::env::temp_dir().join("devforge-cache")
}

static CACHE_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved cache directory for this session.
pub fn cache_dir() -> &'static PathBuf {
    CACHE_DIR.get_or_init(resolve_cache_dir)
}

/// File name of a feature manifest inside its package.
pub const FEATURE_MANIFEST_FILE: &str = "devcontainer-feature.json";

/// File name of a feature's install script inside its package.
pub const FEATURE_INSTALL_SCRIPT: &str = "install.sh";

/// In-container directory under which feature packages are staged.
pub const DEFAULT_STAGING_ROOT: &str = "/tmp/dev-container-features";

/// Namespace that bare feature names expand into.
pub const DEFAULT_SHORTHAND_NAMESPACE: &str = "ghcr.io/devcontainers/features";

/// Default bound on concurrent metadata and package fetches.
pub const DEFAULT_MAX_PARALLEL_FETCHES: usize = 4;

/// Image label carrying serialized configuration metadata.
pub const IMAGE_METADATA_LABEL: &str = "devcontainer.metadata";

/// Label identifying the host workspace folder of a dev container.
pub const LOCAL_FOLDER_LABEL: &str = "devcontainer.local_folder";

/// Label identifying the configuration file of a dev container.
pub const CONFIG_FILE_LABEL: &str = "devcontainer.config_file";

/// Environment variable always set to the installing feature's id.
pub const FEATURE_ID_ENV: &str = "_FEATURE_ID";

/// Environment variable always set to the feature's staging path.
pub const FEATURE_PATH_ENV: &str = "_FEATURE_PATH";

/// Environment variable set to the configured remote user, if any.
pub const REMOTE_USER_ENV: &str = "_REMOTE_USER";

/// Environment variable set to the configured container user, if any.
pub const CONTAINER_USER_ENV: &str = "_CONTAINER_USER";

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;

/// Width of a rendered `${devcontainerId}`.
pub const DEVCONTAINER_ID_LENGTH: usize = 52;

/// Application name used in CLI output and log targets.
pub const APP_NAME: &str = "devforge";
