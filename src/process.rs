//! Selection and rendition generation.
//!
//! Stage 2 of a pack run. For every pack × format pair the criteria engine
//! picks photo ids from the index; every selected (pack, format, photo)
//! then becomes one independent job:
//!
//! 1. render the source into `basepath/outputdir/<pack>/<format>/<id>.<ext>`
//! 2. apply the format's watermarks to that file, in order
//!
//! ## Output Structure
//!
//! ```text
//! packs/
//! ├── events/
//! │   ├── web/
//! │   │   ├── IMG_0001.jpg
//! │   │   └── IMG_0042.jpg
//! │   └── thumb/
//! │       └── IMG_0001.jpg
//! └── portfolio/
//!     └── web/
//!         └── IMG_0042.jpg
//! ```
//!
//! Renditions are always JPEG. The extension follows the source when it is
//! already `jpg`/`jpeg`, otherwise `jpg`.
//!
//! ## Parallel Processing
//!
//! Jobs run in parallel on the caller's rayon pool. Two jobs never touch the
//! same output file, so only the watermark chain inside one job needs to be
//! sequential. A failed job is returned as data and never stops the others.

use crate::config::{FormatSpec, PackConfig};
use crate::criteria::{CriteriaGroup, select};
use crate::imaging::{BackendError, ImageBackend, Profile, generate_version};
use crate::types::{MetadataIndex, PhotoRecord};
use crate::watermark::{ToolRunner, WatermarkCompositor, WatermarkError, WatermarkSpec};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("photo {0} is not in the index")]
    MissingPhoto(String),
    #[error("photo {0} has no source file")]
    MissingSource(String),
    #[error("format {format}: unknown profile {profile}")]
    UnknownProfile { format: String, profile: String },
    #[error("rendition failed: {0}")]
    Render(#[from] BackendError),
    #[error("{0}")]
    Watermark(#[from] WatermarkError),
}

/// pack → format → selected photo ids.
pub type Selections = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Run the criteria engine for every pack × format pair. `on_pair` fires
/// after each pair.
pub fn compute_selections(
    config: &PackConfig,
    index: &MetadataIndex,
    on_pair: &dyn Fn(),
) -> Selections {
    config
        .packs
        .iter()
        .map(|(pack_name, pack)| {
            let pack_group = CriteriaGroup::new(&pack.criteria, pack.criterialogic);
            let formats = config
                .formats
                .iter()
                .map(|(format_name, format)| {
                    let format_group = CriteriaGroup::new(&format.criteria, format.criterialogic);
                    let ids = select(index, pack_group, format_group);
                    debug!(pack = %pack_name, format = %format_name, selected = ids.len(), "selection computed");
                    on_pair();
                    (format_name.clone(), ids)
                })
                .collect();
            (pack_name.clone(), formats)
        })
        .collect()
}

/// Total number of jobs across all pairs.
pub fn selection_count(selections: &Selections) -> usize {
    selections
        .values()
        .flat_map(|formats| formats.values())
        .map(Vec::len)
        .sum()
}

/// Rendition extension for a source of the given type.
pub fn output_extension(file_type: &str) -> &str {
    match file_type {
        "jpg" | "jpeg" => file_type,
        _ => "jpg",
    }
}

/// Where the rendition of `record` for (pack, format) is written.
pub fn output_path(config: &PackConfig, pack: &str, format: &str, record: &PhotoRecord) -> PathBuf {
    config
        .output_dir()
        .join(pack)
        .join(format)
        .join(format!("{}.{}", record.id, output_extension(&record.file_type)))
}

/// A format resolved once: its profile and its watermark chain.
struct ResolvedFormat {
    profile: Result<Profile, String>,
    watermarks: Vec<(String, WatermarkSpec)>,
}

impl ResolvedFormat {
    fn new(config: &PackConfig, format: &FormatSpec) -> Self {
        let version = format.version();
        Self {
            profile: version
                .resolve()
                .ok_or_else(|| format.profile.clone().unwrap_or_default()),
            watermarks: config.watermark_chain(format),
        }
    }
}

/// The result of one (pack, format, photo) job.
#[derive(Debug)]
pub struct JobOutcome {
    pub photo: String,
    pub pack: String,
    pub format: String,
    pub result: Result<PathBuf, GenerationError>,
}

struct Job<'a> {
    pack: &'a str,
    format: &'a str,
    photo: &'a str,
}

fn run_job<B: ImageBackend, R: ToolRunner>(
    backend: &B,
    compositor: &WatermarkCompositor<'_, R>,
    config: &PackConfig,
    index: &MetadataIndex,
    job: &Job<'_>,
    format: &ResolvedFormat,
) -> Result<PathBuf, GenerationError> {
    let record = index
        .get(job.photo)
        .ok_or_else(|| GenerationError::MissingPhoto(job.photo.to_string()))?;
    let source = record
        .filename
        .as_deref()
        .ok_or_else(|| GenerationError::MissingSource(job.photo.to_string()))?;
    let profile = format
        .profile
        .as_ref()
        .map_err(|profile| GenerationError::UnknownProfile {
            format: job.format.to_string(),
            profile: profile.clone(),
        })?;

    let destination = output_path(config, job.pack, job.format, record);
    generate_version(backend, source, profile, &destination)?;

    let steps: Vec<(&str, &WatermarkSpec)> = format
        .watermarks
        .iter()
        .map(|(name, spec)| (name.as_str(), spec))
        .collect();
    compositor.apply(&destination, &steps)?;
    Ok(destination)
}

/// Generate every selected rendition.
///
/// Must be called inside the run's thread pool to respect its bound.
/// `on_done` fires once per job as each finishes.
pub fn generate_all<B: ImageBackend, R: ToolRunner>(
    backend: &B,
    runner: &R,
    config: &PackConfig,
    index: &MetadataIndex,
    selections: &Selections,
    on_done: &(dyn Fn() + Sync),
) -> Vec<JobOutcome> {
    let resolved: BTreeMap<&str, ResolvedFormat> = config
        .formats
        .iter()
        .map(|(name, format)| (name.as_str(), ResolvedFormat::new(config, format)))
        .collect();
    let compositor =
        WatermarkCompositor::new(runner, &config.image_tool_path, &config.image_tool_args);

    let jobs: Vec<Job<'_>> = selections
        .iter()
        .flat_map(|(pack, formats)| {
            formats.iter().flat_map(move |(format, ids)| {
                ids.iter().map(move |photo| Job {
                    pack,
                    format,
                    photo,
                })
            })
        })
        .collect();

    jobs.par_iter()
        .map(|job| {
            let result = match resolved.get(job.format) {
                Some(format) => run_job(backend, &compositor, config, index, job, format),
                None => Err(GenerationError::UnknownProfile {
                    format: job.format.to_string(),
                    profile: String::new(),
                }),
            };
            on_done();
            JobOutcome {
                photo: job.photo.to_string(),
                pack: job.pack.to_string(),
                format: job.format.to_string(),
                result,
            }
        })
        .collect()
}
