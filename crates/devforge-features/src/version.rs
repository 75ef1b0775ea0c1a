//! Version constraints attached to feature references.
//!
//! The tag of a reference doubles as its constraint: `1` and `1.2` float
//! within their major or minor line, `1.2.3` pins, `latest` (or no tag)
//! takes the newest release, and a digest pins the exact package.

use std::fmt;

use devforge_common::types::Sha256Digest;
use semver::{Version, VersionReq};

/// Tag registries publish for the newest release.
pub const LATEST_TAG: &str = "latest";

/// Which published versions a reference accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Newest semver tag, falling back to the literal `latest` tag.
    Latest,
    /// Exactly this version.
    Exact(Version),
    /// Highest version matching the requirement.
    Range {
        /// Requirement used for matching.
        req: VersionReq,
        /// Constraint as written.
        text: String,
    },
    /// The package with this digest, whatever its version.
    Digest(Sha256Digest),
}

impl VersionConstraint {
    /// Parses a tag or requirement string.
    ///
    /// # Errors
    ///
    /// Returns a description if the text is neither a version, a partial
    /// version, a semver requirement, nor a `sha256:` digest.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() || text == LATEST_TAG {
            return Ok(Self::Latest);
        }
        if text.starts_with("sha256:") {
            return Sha256Digest::parse(text)
                .map(Self::Digest)
                .map_err(|e| e.to_string());
        }
        if let Ok(version) = Version::parse(text) {
            return Ok(Self::Exact(version));
        }
        let req_text = if is_partial_version(text) {
            format!("~{text}")
        } else {
            text.to_string()
        };
        VersionReq::parse(&req_text)
            .map(|req| Self::Range {
                req,
                text: text.to_string(),
            })
            .map_err(|e| format!("\"{text}\" is not a version or version range: {e}"))
    }

    /// Whether repeated resolution may pick a different package.
    #[must_use]
    pub const fn is_floating(&self) -> bool {
        matches!(self, Self::Latest | Self::Range { .. })
    }

    /// Picks the registry tag to fetch among the published `tags`.
    ///
    /// Tags that are not full semver versions only match `Latest` through
    /// the literal `latest` tag. Returns `None` when nothing satisfies.
    #[must_use]
    pub fn select(&self, tags: &[String]) -> Option<String> {
        let best = |accept: &dyn Fn(&Version) -> bool| {
            tags.iter()
                .filter_map(|t| Version::parse(t).ok().map(|v| (v, t)))
                .filter(|(v, _)| accept(v))
                .max_by(|(a, _), (b, _)| a.cmp(b))
                .map(|(_, t)| t.clone())
        };
        match self {
            Self::Latest => best(&|v| v.pre.is_empty())
                .or_else(|| tags.iter().find(|t| *t == LATEST_TAG).cloned()),
            Self::Exact(version) => best(&|v| v == version),
            Self::Range { req, .. } => best(&|v| req.matches(v)),
            Self::Digest(digest) => Some(digest.to_string()),
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str(LATEST_TAG),
            Self::Exact(version) => write!(f, "{version}"),
            Self::Range { text, .. } => f.write_str(text),
            Self::Digest(digest) => write!(f, "{digest}"),
        }
    }
}

/// `1` or `1.2`: one or two dot-separated numbers.
fn is_partial_version(text: &str) -> bool {
    let parts: Vec<&str> = text.split('.').collect();
    parts.len() <= 2
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_each_form() {
        assert_eq!(VersionConstraint::parse("").expect("empty"), VersionConstraint::Latest);
        assert_eq!(VersionConstraint::parse("latest").expect("latest"), VersionConstraint::Latest);
        assert_eq!(
            VersionConstraint::parse("1.2.3").expect("exact"),
            VersionConstraint::Exact(Version::new(1, 2, 3))
        );
        assert!(matches!(
            VersionConstraint::parse("1").expect("major"),
            VersionConstraint::Range { .. }
        ));
        assert!(matches!(
            VersionConstraint::parse(">=1.2, <2").expect("req"),
            VersionConstraint::Range { .. }
        ));
        assert!(matches!(
            VersionConstraint::parse(&format!("sha256:{}", "a".repeat(64))).expect("digest"),
            VersionConstraint::Digest(_)
        ));
        assert!(VersionConstraint::parse("not a version").is_err());
    }

    #[test]
    fn range_selects_highest_satisfying() {
        let published = tags(&["1.0.0", "1.2.0", "1.2.5", "1.10.1", "2.0.0", "latest", "1"]);
        let select = |c: &str| VersionConstraint::parse(c).expect("parse").select(&published);
        assert_eq!(select("1").as_deref(), Some("1.10.1"));
        assert_eq!(select("1.2").as_deref(), Some("1.2.5"));
        assert_eq!(select(">=1.2, <1.3").as_deref(), Some("1.2.5"));
        assert_eq!(select("latest").as_deref(), Some("2.0.0"));
        assert_eq!(select("1.2.0").as_deref(), Some("1.2.0"));
        assert_eq!(select("3"), None);
        assert_eq!(select("1.2.4"), None);
    }

    #[test]
    fn latest_ignores_prereleases_and_falls_back_to_tag() {
        let published = tags(&["1.0.0", "2.0.0-rc.1"]);
        assert_eq!(
            VersionConstraint::Latest.select(&published).as_deref(),
            Some("1.0.0")
        );
        assert_eq!(
            VersionConstraint::Latest.select(&tags(&["latest", "dev"])).as_deref(),
            Some("latest")
        );
    }

    #[test]
    fn display_round_trips_text() {
        assert_eq!(VersionConstraint::parse("1.2").expect("parse").to_string(), "1.2");
        assert_eq!(VersionConstraint::Latest.to_string(), "latest");
    }

    #[test]
    fn floating_constraints() {
        assert!(VersionConstraint::Latest.is_floating());
        assert!(!VersionConstraint::Exact(Version::new(1, 0, 0)).is_floating());
    }
}
