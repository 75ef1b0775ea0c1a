//! # devforge-features
//!
//! Turns feature declarations into an ordered install plan.
//!
//! Handles:
//! - **References**: registry, local-path, and shorthand feature references.
//! - **Versions**: exact, ranged, floating, and digest-pinned constraints.
//! - **Manifests**: validated `devcontainer-feature.json` documents and options.
//! - **Cache**: content-addressed package storage with single-writer-per-digest.
//! - **Resolver**: bounded-concurrency manifest resolution through a registry.
//! - **Graph**: hard and soft feature relations with cycle detection.
//! - **Planner**: deterministic install order honoring explicit overrides.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cache;
pub mod graph;
pub mod hash;
pub mod manifest;
pub mod options;
pub mod planner;
pub mod reference;
pub mod registry;
pub mod resolver;
pub mod version;

pub use cache::{CacheEntry, PackageCache};
pub use graph::{DependencyGraph, FeatureNode, FeatureRequest};
pub use manifest::{FeatureManifest, FeatureMetadata};
pub use planner::{InstallPlan, plan};
pub use reference::{FeatureRef, SourceKind};
pub use registry::{DirectoryRegistry, FetchedManifest, RegistryClient, RegistryError};
pub use resolver::FeatureResolver;
pub use version::VersionConstraint;
