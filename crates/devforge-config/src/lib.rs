//! # devforge-config
//!
//! Turns an as-authored dev container configuration into the effective
//! configuration every later stage consumes.
//!
//! Handles:
//! - **Substitution**: `${...}` variables resolved per phase (pre/post container).
//! - **Extends**: loading of base configurations with cycle detection.
//! - **Layers**: typed, validated views of each configuration source.
//! - **Merge**: defaults, bases, user config, overrides, and image metadata
//!   folded with per-field policies.
//! - **Lifecycle**: the six lifecycle hook slots and their run order.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod effective;
pub mod extends;
pub mod feature_value;
pub mod id;
pub mod image_metadata;
pub mod layer;
pub mod lifecycle;
pub mod merge;
pub mod resolve;
pub mod substitution;

pub use effective::EffectiveConfig;
pub use feature_value::{FeatureValue, OptionValue};
pub use lifecycle::{HookKind, LifecycleCommand};
pub use merge::{Overrides, merge};
pub use resolve::{ResolveInputs, resolve_configuration};
pub use substitution::SubstitutionContext;
