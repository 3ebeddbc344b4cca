//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the high-level [`operations`](super::operations) module
//! (which decides what rendition to create) and the [`backend`](super::backend)
//! (which does the actual pixel work). This separation allows swapping backends
//! (e.g. for testing with a mock) without changing operation logic.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100). Clamped on construction.
//! - [`Profile`]: Size bound + quality for one rendition.
//! - [`VersionSpec`]: A profile given by name or inline, resolved once.
//! - [`EncodeParams`]: Everything needed for one encode: source, output, bound, quality.

use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(100)
    }
}

/// Size and quality parameters for one rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    /// Bound on the longer edge. `None` keeps the source size.
    pub max_width: Option<u32>,
    pub quality: Quality,
}

/// The profile rendered from the source for every other named profile.
pub const MASTER_PROFILE: &str = "web";

/// Built-in named profiles: (name, longer-edge bound, quality).
pub const NAMED_PROFILES: &[(&str, u32, u32)] = &[
    ("web", 2048, 100),
    ("low", 1024, 100),
    ("mob", 480, 90),
    ("thumb", 120, 80),
    ("tiny", 3, 60),
];

/// Look up a built-in profile by name.
pub fn named_profile(name: &str) -> Option<Profile> {
    NAMED_PROFILES
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|&(_, width, quality)| Profile {
            max_width: Some(width),
            quality: Quality::new(quality),
        })
}

/// A rendition profile as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    Named(String),
    Explicit(Profile),
}

impl VersionSpec {
    /// Resolve to a concrete profile. `None` for an unknown name.
    pub fn resolve(&self) -> Option<Profile> {
        match self {
            VersionSpec::Named(name) => named_profile(name),
            VersionSpec::Explicit(profile) => Some(*profile),
        }
    }
}

/// Parameters for a single encode: decode `source`, fit within `max_edge`
/// (never upscaling), write a JPEG at `quality` to `output`.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub max_edge: Option<u32>,
    pub quality: Quality,
}
