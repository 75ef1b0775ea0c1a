//! Feature reference grammar.
//!
//! A key of the `features` map (or of a manifest's `dependsOn`) names a
//! feature in one of three ways:
//!
//! - a local directory: `./tools/lint`, `../shared/node`, `/opt/features/x`
//! - a registry path: `ghcr.io/acme/features/node:1`, `localhost:5000/f/x@sha256:…`
//! - a shorthand: `node` or `node:1`, expanded into the shorthand namespace

use std::fmt;
use std::path::{Component, Path, PathBuf};

use devforge_common::error::FeatureResolutionError;
use devforge_common::types::FeatureId;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while_m_n, take_while1},
    character::complete::{char, digit1},
    combinator::{all_consuming, map, opt, peek, recognize},
    multi::many0,
    sequence::preceded,
};

use crate::version::VersionConstraint;

/// Where a feature is fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    /// An OCI registry.
    Registry,
    /// A directory on the host.
    LocalPath,
    /// A bare name expanded into the shorthand namespace.
    Shorthand,
}

/// A parsed feature reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRef {
    /// How the feature was named.
    pub kind: SourceKind,
    /// `registry/path/name` for registry and shorthand references, the
    /// normalized directory for local ones.
    pub identifier: String,
    /// Accepted versions.
    pub constraint: VersionConstraint,
    /// The reference exactly as written.
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Suffix<'a> {
    Tag(&'a str),
    Digest(&'a str),
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn segment(input: &str) -> IResult<&str, &str> {
    take_while1(is_segment_char).parse(input)
}

/// `:5000` directly followed by a path separator.
fn port(input: &str) -> IResult<&str, &str> {
    recognize((char(':'), digit1, peek(char('/')))).parse(input)
}

fn repository(input: &str) -> IResult<&str, &str> {
    recognize((segment, opt(port), many0((char('/'), segment)))).parse(input)
}

fn digest(input: &str) -> IResult<&str, &str> {
    recognize((
        tag("sha256:"),
        take_while_m_n(64, 64, |c: char| c.is_ascii_hexdigit()),
    ))
    .parse(input)
}

fn suffix(input: &str) -> IResult<&str, Suffix<'_>> {
    alt((
        map(preceded(char('@'), digest), Suffix::Digest),
        map(preceded(char(':'), segment), Suffix::Tag),
    ))
    .parse(input)
}

fn remote(input: &str) -> IResult<&str, (&str, Option<Suffix<'_>>)> {
    all_consuming((repository, opt(suffix))).parse(input)
}

fn local_prefix(input: &str) -> IResult<&str, &str> {
    alt((tag("./"), tag("../"), tag("/"))).parse(input)
}

fn looks_like_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

impl FeatureRef {
    /// Parses `raw`.
    ///
    /// Local paths are resolved against `base_dir`, bare names are placed
    /// under `shorthand_namespace`.
    ///
    /// # Errors
    ///
    /// Returns `FeatureResolutionError::InvalidReference` if the text fits
    /// none of the three forms or its tag is not a valid constraint.
    pub fn parse(
        raw: &str,
        shorthand_namespace: &str,
        base_dir: &Path,
    ) -> Result<Self, FeatureResolutionError> {
        let invalid = |message: &str| FeatureResolutionError::InvalidReference {
            reference: raw.to_string(),
            message: message.to_string(),
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty reference"));
        }

        if local_prefix(trimmed).is_ok() {
            return Ok(Self {
                kind: SourceKind::LocalPath,
                identifier: normalize(&base_dir.join(trimmed)).display().to_string(),
                constraint: VersionConstraint::Latest,
                raw: raw.to_string(),
            });
        }

        let (_, (repo, suffix)) = remote(trimmed)
            .map_err(|_| invalid("expected a local path, a registry path, or a feature name"))?;
        let constraint = match suffix {
            None => VersionConstraint::Latest,
            Some(Suffix::Tag(tag) | Suffix::Digest(tag)) => {
                VersionConstraint::parse(tag).map_err(|e| invalid(&e))?
            }
        };

        let (kind, identifier) = match repo.split_once('/') {
            None => (
                SourceKind::Shorthand,
                format!("{}/{repo}", shorthand_namespace.trim_end_matches('/')),
            ),
            Some((host, _)) if looks_like_host(host) => (SourceKind::Registry, repo.to_string()),
            Some(_) => return Err(invalid("registry references must start with a registry host")),
        };

        Ok(Self {
            kind,
            identifier: identifier.to_ascii_lowercase(),
            constraint,
            raw: raw.to_string(),
        })
    }

    /// Canonical graph identity: the identifier without tag or digest.
    #[must_use]
    pub fn id(&self) -> FeatureId {
        FeatureId::new(self.identifier.clone())
    }

    /// Whether the feature is read from a host directory.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self.kind, SourceKind::LocalPath)
    }
}

impl fmt::Display for FeatureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.constraint) {
            (SourceKind::LocalPath, _) | (_, VersionConstraint::Latest) => {
                f.write_str(&self.identifier)
            }
            (_, VersionConstraint::Digest(d)) => write!(f, "{}@{d}", self.identifier),
            (_, constraint) => write!(f, "{}:{constraint}", self.identifier),
        }
    }
}

/// Lexically removes `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use devforge_common::constants::DEFAULT_SHORTHAND_NAMESPACE;

    use super::*;

    fn parse(raw: &str) -> Result<FeatureRef, FeatureResolutionError> {
        FeatureRef::parse(raw, DEFAULT_SHORTHAND_NAMESPACE, Path::new("/w/.devcontainer"))
    }

    #[test]
    fn registry_reference_with_tag() {
        let r = parse("ghcr.io/devcontainers/features/node:1").expect("parse");
        assert_eq!(r.kind, SourceKind::Registry);
        assert_eq!(r.identifier, "ghcr.io/devcontainers/features/node");
        assert!(matches!(r.constraint, VersionConstraint::Range { .. }));
        assert_eq!(r.to_string(), "ghcr.io/devcontainers/features/node:1");
    }

    #[test]
    fn registry_reference_with_port_and_digest() {
        let hex = "b".repeat(64);
        let r = parse(&format!("localhost:5000/acme/tool@sha256:{hex}")).expect("parse");
        assert_eq!(r.kind, SourceKind::Registry);
        assert_eq!(r.identifier, "localhost:5000/acme/tool");
        assert!(matches!(r.constraint, VersionConstraint::Digest(_)));
    }

    #[test]
    fn untagged_reference_floats_to_latest() {
        let r = parse("ghcr.io/acme/features/go").expect("parse");
        assert_eq!(r.constraint, VersionConstraint::Latest);
    }

    #[test]
    fn shorthand_expands_into_namespace() {
        let r = parse("docker-in-docker:2").expect("parse");
        assert_eq!(r.kind, SourceKind::Shorthand);
        assert_eq!(r.identifier, "ghcr.io/devcontainers/features/docker-in-docker");
        assert_eq!(r.id(), parse("ghcr.io/devcontainers/features/docker-in-docker").expect("p").id());
    }

    #[test]
    fn local_paths_resolve_against_base() {
        let r = parse("./lint").expect("parse");
        assert_eq!(r.kind, SourceKind::LocalPath);
        assert_eq!(r.identifier, "/w/.devcontainer/lint");
        assert_eq!(parse("../shared/x").expect("parse").identifier, "/w/shared/x");
        assert_eq!(parse("/opt/f").expect("parse").identifier, "/opt/f");
    }

    #[test]
    fn ids_ignore_tag_and_case() {
        let a = parse("ghcr.io/Acme/features/node:1").expect("a");
        let b = parse("ghcr.io/acme/features/node:2.0.0").expect("b");
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn rejects_malformed_references() {
        assert!(parse("").is_err());
        assert!(parse("acme/features/node").is_err());
        assert!(parse("ghcr.io/acme/node:").is_err());
        assert!(parse("ghcr.io/acme/node@sha256:abc").is_err());
        assert!(parse("ghcr.io/acme/node:not+valid").is_err());
        assert!(parse("white space").is_err());
    }
}
