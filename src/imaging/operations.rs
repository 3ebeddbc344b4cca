//! High-level image operations.
//!
//! These functions combine profile resolution with backend execution. They
//! take configuration, compute parameters, and call the backend.

use super::backend::{BackendError, EncodedInfo, ImageBackend};
use super::params::{EncodeParams, MASTER_PROFILE, NAMED_PROFILES, Profile, VersionSpec};
use std::path::Path;
use tracing::debug;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Get image dimensions using the backend.
pub fn get_dimensions(backend: &impl ImageBackend, path: &Path) -> Result<(u32, u32)> {
    let dims = backend.identify(path)?;
    Ok((dims.width, dims.height))
}

/// A generated rendition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub profile: Profile,
    pub encoded: EncodedInfo,
}

/// Produce one re-encoded rendition of `source` at `destination`.
///
/// Creates the destination directory if needed. Independent per call; a
/// failure only concerns this rendition.
pub fn generate_version(
    backend: &impl ImageBackend,
    source: &Path,
    profile: &Profile,
    destination: &Path,
) -> Result<VersionInfo> {
    if let Some(dir) = destination.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let encoded = backend.encode(&EncodeParams {
        source: source.to_path_buf(),
        output: destination.to_path_buf(),
        max_edge: profile.max_width,
        quality: profile.quality,
    })?;
    debug!(
        source = %source.display(),
        destination = %destination.display(),
        width = encoded.width,
        height = encoded.height,
        "rendition written"
    );

    Ok(VersionInfo {
        profile: *profile,
        encoded,
    })
}

/// Resolve a [`VersionSpec`] and generate it.
pub fn generate_spec(
    backend: &impl ImageBackend,
    source: &Path,
    spec: &VersionSpec,
    destination: &Path,
) -> Result<VersionInfo> {
    let profile = spec
        .resolve()
        .ok_or_else(|| BackendError::ProcessingFailed(format!("unknown profile {spec:?}")))?;
    generate_version(backend, source, &profile, destination)
}

/// Outcome of [`generate_versions`]: generated profile names and failures.
#[derive(Debug, Default)]
pub struct VersionSet {
    pub generated: Vec<&'static str>,
    pub failed: Vec<(&'static str, BackendError)>,
}

/// Render every named profile except the master from `dir/<master>/file`
/// into `dir/<profile>/file`.
pub fn generate_versions(backend: &impl ImageBackend, dir: &Path, file: &str) -> VersionSet {
    let master = dir.join(MASTER_PROFILE).join(file);
    let mut set = VersionSet::default();

    for &(name, _, _) in NAMED_PROFILES.iter().filter(|(n, _, _)| *n != MASTER_PROFILE) {
        let destination = dir.join(name).join(file);
        match generate_spec(backend, &master, &VersionSpec::Named(name.to_string()), &destination)
        {
            Ok(_) => set.generated.push(name),
            Err(e) => set.failed.push((name, e)),
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::imaging::params::Quality;
    use tempfile::TempDir;

    #[test]
    fn generate_version_creates_destination_dir() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("pack/web/a.jpg");
        let backend = MockBackend::new();
        let profile = Profile {
            max_width: Some(1024),
            quality: Quality::new(80),
        };

        let info = generate_version(&backend, Path::new("/src/a.jpg"), &profile, &dest).unwrap();

        assert!(dest.exists());
        assert_eq!(info.profile, profile);
        assert_eq!(
            backend.get_operations(),
            vec![RecordedOp::Encode {
                source: "/src/a.jpg".into(),
                output: dest.to_string_lossy().to_string(),
                max_edge: Some(1024),
                quality: 80,
            }]
        );
    }

    #[test]
    fn generate_version_reports_encode_failure() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::new().failing_encode("bad.jpg");
        let profile = Profile {
            max_width: None,
            quality: Quality::default(),
        };
        let result = generate_version(
            &backend,
            Path::new("/src/bad.jpg"),
            &profile,
            &tmp.path().join("out/bad.jpg"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn generate_spec_rejects_unknown_name() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::new();
        let result = generate_spec(
            &backend,
            Path::new("/src/a.jpg"),
            &VersionSpec::Named("poster".into()),
            &tmp.path().join("a.jpg"),
        );
        assert!(result.is_err());
        assert!(backend.get_operations().is_empty());
    }

    #[test]
    fn generate_versions_renders_all_but_master() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::new();

        let set = generate_versions(&backend, tmp.path(), "a.jpg");

        assert_eq!(set.generated, vec!["low", "mob", "thumb", "tiny"]);
        assert!(set.failed.is_empty());
        for op in backend.encodes() {
            let RecordedOp::Encode { source, .. } = op else {
                unreachable!()
            };
            assert!(source.ends_with("web/a.jpg"), "unexpected source {source}");
        }
        assert!(tmp.path().join("thumb/a.jpg").exists());
    }
}
