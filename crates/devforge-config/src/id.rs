//! Stable `${devcontainerId}` derivation.
//!
//! The id is the SHA-256 of the container's identifying labels serialized
//! as JSON with sorted keys, rendered as a base-32 number and left-padded
//! with zeros to a fixed width.

use std::collections::BTreeMap;
use std::path::Path;

use devforge_common::constants::{CONFIG_FILE_LABEL, DEVCONTAINER_ID_LENGTH, LOCAL_FOLDER_LABEL};
use sha2::{Digest, Sha256};

const BASE32_DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Computes the devcontainer id for a set of identifying labels.
#[must_use]
pub fn devcontainer_id(labels: &BTreeMap<String, String>) -> String {
    let canonical = serde_json::to_string(labels).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    let rendered = to_base32(&digest);
    format!("{rendered:0>DEVCONTAINER_ID_LENGTH$}")
}

/// Computes the devcontainer id of the container for a workspace folder
/// and configuration file.
#[must_use]
pub fn workspace_devcontainer_id(local_folder: &str, config_file: &Path) -> String {
    let labels = BTreeMap::from([
        (LOCAL_FOLDER_LABEL.to_string(), local_folder.to_string()),
        (CONFIG_FILE_LABEL.to_string(), config_file.display().to_string()),
    ]);
    devcontainer_id(&labels)
}

/// Renders a big-endian unsigned integer in base 32.
fn to_base32(bytes: &[u8]) -> String {
    let mut number = bytes.to_vec();
    let mut digits = Vec::new();
    while number.iter().any(|&b| b != 0) {
        let mut remainder = 0u32;
        for byte in &mut number {
            let acc = (remainder << 8) | u32::from(*byte);
            *byte = u8::try_from(acc / 32).unwrap_or(u8::MAX);
            remainder = acc % 32;
        }
        digits.push(BASE32_DIGITS[remainder as usize]);
    }
    if digits.is_empty() {
        digits.push(b'0');
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}
