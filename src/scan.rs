//! Source enumeration and the metadata index.
//!
//! Stage 1 of a pack run. Lists the photos under `basepath/originaldir`
//! whose extension is on the allow-list, then runs the
//! [metadata extractor](crate::metadata) over all of them in parallel and
//! folds the results into a [`MetadataIndex`] keyed by photo id.
//!
//! ```text
//! basepath/
//! ├── originaldir/
//! │   ├── IMG_0001.jpg        → id "IMG_0001", path "originaldir"
//! │   ├── IMG_0002.JPG        → id "IMG_0002"
//! │   ├── notes.txt           (not on the allow-list)
//! │   └── 2023/               (only visited with `recursive`)
//! │       └── IMG_0100.jpg    → id "IMG_0100", path "originaldir/2023"
//! └── index.json              ← exported index
//! ```
//!
//! Ids are file stems, so with `recursive` two files can collide. The first
//! one in path order wins; the others are reported as failures.

use crate::config::PackConfig;
use crate::imaging::ImageBackend;
use crate::metadata::{self, Extraction};
use crate::types::MetadataIndex;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("source directory not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("no source photos in {0}")]
    NoSourcePhotos(PathBuf),
    #[error("cannot list source directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// A file that did not make it into the index, or only partially.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFailure {
    pub path: PathBuf,
    /// Photo id when one could be derived.
    pub id: Option<String>,
    pub error: String,
}

impl ScanFailure {
    /// Name to log the failure under: the id, else the file name.
    pub fn photo(&self) -> String {
        self.id.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| self.path.display().to_string())
        })
    }
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub index: MetadataIndex,
    pub failures: Vec<ScanFailure>,
}

/// List source photos in path order.
pub fn list_photos(config: &PackConfig) -> Result<Vec<PathBuf>, ScanError> {
    let root = config.source_dir();
    if !root.is_dir() {
        return Err(ScanError::SourceNotFound(root));
    }

    let max_depth = if config.recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    for entry in WalkDir::new(&root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let accepted = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| config.accepts_extension(e));
        if accepted {
            files.push(entry.into_path());
        }
    }

    if files.is_empty() {
        return Err(ScanError::NoSourcePhotos(root));
    }
    debug!(count = files.len(), root = %root.display(), "source photos listed");
    Ok(files)
}

/// The `path` attached to a record: the file's directory relative to
/// `basepath`, `/`-separated.
fn relative_dir(base: &Path, file: &Path) -> String {
    let dir = file.parent().unwrap_or(base);
    let rel = dir.strip_prefix(base).unwrap_or(dir);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Extract metadata for every file in parallel and build the index.
///
/// Must be called inside the run's thread pool to respect its bound.
/// `on_done` fires once per file as each extraction completes.
pub fn scan_metadata(
    backend: &impl ImageBackend,
    config: &PackConfig,
    files: &[PathBuf],
    scanned_at: DateTime<Utc>,
    on_done: &(dyn Fn() + Sync),
) -> ScanOutcome {
    let extractions: Vec<(&PathBuf, Extraction)> = files
        .par_iter()
        .map(|path| {
            let extraction = metadata::extract(backend, path);
            on_done();
            (path, extraction)
        })
        .collect();

    let mut outcome = ScanOutcome::default();
    for (path, extraction) in extractions {
        let id = extraction.record.as_ref().map(|r| r.id.clone());
        for error in extraction.errors {
            warn!(path = %path.display(), %error, "metadata probe failed");
            outcome.failures.push(ScanFailure {
                path: path.clone(),
                id: id.clone(),
                error: error.to_string(),
            });
        }

        let Some(mut record) = extraction.record else {
            continue;
        };
        if let Some(existing) = outcome.index.get(&record.id) {
            let first = existing
                .filename
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            warn!(path = %path.display(), id = %record.id, %first, "duplicate photo id");
            outcome.failures.push(ScanFailure {
                path: path.clone(),
                id: Some(record.id.clone()),
                error: format!("duplicate photo id, already read from {first}"),
            });
            continue;
        }

        record.filename = Some(path.clone());
        record.path = Some(relative_dir(&config.basepath, path));
        record.lastscrap = Some(scanned_at);
        outcome.index.insert(record.id.clone(), record);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockBackend;
    use crate::test_helpers::sample_config;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    fn library() -> (TempDir, PackConfig) {
        let tmp = TempDir::new().unwrap();
        let config = sample_config(tmp.path());
        let src = config.source_dir();
        touch(&src.join("b.jpg"));
        touch(&src.join("a.JPG"));
        touch(&src.join("notes.txt"));
        touch(&src.join("2023/c.jpg"));
        (tmp, config)
    }

    // =========================================================================
    // Listing
    // =========================================================================

    #[test]
    fn lists_allowed_extensions_sorted_top_level_only() {
        let (_tmp, config) = library();
        let files = list_photos(&config).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.jpg"]);
    }

    #[test]
    fn recursive_descends_into_subdirectories() {
        let (_tmp, mut config) = library();
        config.recursive = true;
        let files = list_photos(&config).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().any(|p| p.ends_with("2023/c.jpg")));
    }

    #[test]
    fn missing_source_dir_is_structural() {
        let tmp = TempDir::new().unwrap();
        let config = sample_config(tmp.path());
        assert!(matches!(list_photos(&config), Err(ScanError::SourceNotFound(_))));
    }

    #[test]
    fn empty_source_dir_is_structural() {
        let tmp = TempDir::new().unwrap();
        let config = sample_config(tmp.path());
        fs::create_dir_all(config.source_dir()).unwrap();
        touch(&config.source_dir().join("readme.md"));
        assert!(matches!(list_photos(&config), Err(ScanError::NoSourcePhotos(_))));
    }

    // =========================================================================
    // Index building
    // =========================================================================

    #[test]
    fn index_attaches_provenance() {
        let (_tmp, mut config) = library();
        config.recursive = true;
        let files = list_photos(&config).unwrap();
        let backend = MockBackend::new().with_dimensions("a.JPG", 10, 20);
        let now = Utc::now();
        let calls = AtomicUsize::new(0);

        let outcome = scan_metadata(&backend, &config, &files, now, &|| {
            calls.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
        let a = &outcome.index["a"];
        assert_eq!(a.file_type, "jpg");
        assert_eq!(a.path.as_deref(), Some("originals"));
        assert_eq!(a.lastscrap, Some(now));
        assert_eq!(
            a.filename.as_deref(),
            Some(config.source_dir().join("a.JPG").as_path())
        );
        assert_eq!(outcome.index["c"].path.as_deref(), Some("originals/2023"));
    }

    #[test]
    fn duplicate_ids_keep_first_and_report_rest() {
        let tmp = TempDir::new().unwrap();
        let mut config = sample_config(tmp.path());
        config.recursive = true;
        let src = config.source_dir();
        touch(&src.join("a.jpg"));
        touch(&src.join("z/a.jpg"));

        let files = list_photos(&config).unwrap();
        let outcome = scan_metadata(&MockBackend::new(), &config, &files, Utc::now(), &|| {});

        assert_eq!(outcome.index.len(), 1);
        assert_eq!(outcome.index["a"].filename.as_deref(), Some(src.join("a.jpg").as_path()));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].photo(), "a");
        assert!(outcome.failures[0].error.contains("duplicate"));
    }

    #[test]
    fn unreadable_file_is_dropped_and_reported() {
        let tmp = TempDir::new().unwrap();
        let config = sample_config(tmp.path());
        let ghost = config.source_dir().join("ghost.jpg");

        let outcome = scan_metadata(
            &MockBackend::new(),
            &config,
            std::slice::from_ref(&ghost),
            Utc::now(),
            &|| {},
        );
        assert!(outcome.index.is_empty());
        assert!(!outcome.failures.is_empty());
        assert!(outcome.failures.iter().all(|f| f.id.is_none()));
        assert_eq!(outcome.failures[0].photo(), "ghost.jpg");
    }

    #[test]
    fn relative_dir_uses_forward_slashes() {
        assert_eq!(
            relative_dir(Path::new("/base"), Path::new("/base/orig/2023/x.jpg")),
            "orig/2023"
        );
        assert_eq!(relative_dir(Path::new("/base"), Path::new("/base/x.jpg")), "");
    }
}
