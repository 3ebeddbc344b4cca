//! Per-file metadata extraction.
//!
//! Three independent probes run concurrently for every source photo:
//!
//! | Probe | Produces |
//! |---|---|
//! | filesystem stat + dimension probe | `id`, `type`, `filecreation`, `width`, `height`, `orientation` |
//! | EXIF decode ([`ImageBackend::read_tags`]) | camera, exposure and GPS fields |
//! | XMP region + [`xmp::XmpProjector`] | rights, author, location, rating, tags |
//!
//! All three are joined and merged into one [`PhotoRecord`]. A failing probe
//! contributes an entry to [`Extraction::errors`] but never hides what the
//! others found. Only the stat probe yields identity, so without it there is
//! no record at all; what to do about that is the caller's call.
//!
//! A failed dimension probe is not an error: the record simply has no
//! width, height or orientation.

pub mod xmp;

use crate::imaging::{BackendError, ImageBackend, get_dimensions};
use crate::types::{FieldValue, Orientation, PhotoRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use xmp::{XMP_END, XMP_START, XmpError, project_xmp};

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("cannot stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),
    #[error("{0} has no usable file name")]
    NoIdentity(PathBuf),
    #[error("EXIF: {0}")]
    Tags(#[from] BackendError),
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("XMP region opened but never closed")]
    UnterminatedRegion,
    #[error("XMP region is not valid UTF-8")]
    Encoding,
    #[error("XMP: {0}")]
    Xmp(#[from] XmpError),
}

/// What one file yielded.
#[derive(Debug)]
pub struct Extraction {
    /// `None` only when the stat probe failed.
    pub record: Option<PhotoRecord>,
    /// Partial failures, one per failed probe.
    pub errors: Vec<MetadataError>,
}

/// Facts from the filesystem and the dimension probe.
#[derive(Debug, Clone, PartialEq)]
struct FileFacts {
    id: String,
    file_type: String,
    created: Option<DateTime<Utc>>,
    dimensions: Option<(u32, u32)>,
}

fn stat_probe(backend: &impl ImageBackend, path: &Path) -> Result<FileFacts, MetadataError> {
    let meta = fs::metadata(path).map_err(|source| MetadataError::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    if !meta.is_file() {
        return Err(MetadataError::NotAFile(path.to_path_buf()));
    }
    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| MetadataError::NoIdentity(path.to_path_buf()))?;
    let file_type = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let created = meta.created().or_else(|_| meta.modified()).ok().map(DateTime::<Utc>::from);

    let dimensions = match get_dimensions(backend, path) {
        Ok(dims) => Some(dims),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "dimension probe failed");
            None
        }
    };

    Ok(FileFacts {
        id,
        file_type,
        created,
        dimensions,
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return (from <= haystack.len()).then_some(from);
    }
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Bytes from the first `start` marker through the following `end` marker,
/// inclusive. `Ok(None)` when the start marker is absent.
pub fn extract_region<'a>(
    bytes: &'a [u8],
    start: &str,
    end: &str,
) -> Result<Option<&'a [u8]>, MetadataError> {
    let Some(from) = find(bytes, start.as_bytes(), 0) else {
        return Ok(None);
    };
    let to = find(bytes, end.as_bytes(), from + start.len())
        .ok_or(MetadataError::UnterminatedRegion)?;
    Ok(Some(&bytes[from..to + end.len()]))
}

fn xmp_probe(path: &Path) -> Result<BTreeMap<String, FieldValue>, MetadataError> {
    let bytes = fs::read(path).map_err(|source| MetadataError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let Some(region) = extract_region(&bytes, XMP_START, XMP_END)? else {
        return Ok(BTreeMap::new());
    };
    let xml = std::str::from_utf8(region).map_err(|_| MetadataError::Encoding)?;
    Ok(project_xmp(xml)?)
}

/// Run the three probes for `path` and merge what they found.
pub fn extract(backend: &impl ImageBackend, path: &Path) -> Extraction {
    let (facts, (tags, xmp)) = rayon::join(
        || stat_probe(backend, path),
        || rayon::join(|| backend.read_tags(path), || xmp_probe(path)),
    );

    let mut errors = Vec::new();
    let mut fields = BTreeMap::new();

    match tags {
        Ok(tags) => fields.extend(
            tags.into_fields()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v)),
        ),
        // Files without EXIF are common; keep it quiet.
        Err(BackendError::NoExif(reason)) => {
            debug!(path = %path.display(), %reason, "no EXIF data");
        }
        Err(e) => errors.push(MetadataError::Tags(e)),
    }
    match xmp {
        Ok(projected) => fields.extend(projected),
        Err(e) => errors.push(e),
    }

    let record = match facts {
        Ok(facts) => {
            let mut record = PhotoRecord::new(facts.id, facts.file_type);
            record.filecreation = facts.created;
            if let Some((width, height)) = facts.dimensions {
                record.width = Some(width);
                record.height = Some(height);
                record.orientation = Some(Orientation::from_dimensions(width, height));
            }
            record.fields = fields;
            Some(record)
        }
        Err(e) => {
            errors.push(e);
            None
        }
    };

    Extraction { record, errors }
}
