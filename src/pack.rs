//! The pack run: configuration to renditions.
//!
//! ```text
//! config        validate, structural
//! photolist     list sources, structural when empty
//! photoinfo     metadata extraction (parallel, per-file errors logged)
//! exportindex   basepath/<exportindex>
//! packlist      criteria per pack × format
//! photogeneration  render + watermark (parallel, per-job errors logged)
//! ```
//!
//! Structural problems come back as `Err(PackError)` before anything is
//! generated. Everything after that is best effort: item failures land in
//! the [`RunLog`] and the run still finishes. Callers judge a run by
//! [`RunReport::is_clean`], not by the absence of an error.
//!
//! Both parallel stages run on one run-local rayon pool sized from
//! `maxProcesses`, so the bound holds for extraction and generation alike.

use crate::config::{ConfigError, PackConfig, effective_threads};
use crate::imaging::{ImageBackend, RustBackend};
use crate::process::{Selections, compute_selections, generate_all, selection_count};
use crate::progress::{Observer, ProcessState, ProgressError, ProgressTracker};
use crate::scan::{ScanError, list_photos, scan_metadata};
use crate::types::MetadataIndex;
use crate::watermark::{CommandRunner, ToolRunner};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Progress phase names, in run order.
pub const PHASE_CONFIG: &str = "config";
pub const PHASE_PHOTOLIST: &str = "photolist";
pub const PHASE_PHOTOINFO: &str = "photoinfo";
pub const PHASE_EXPORTINDEX: &str = "exportindex";
pub const PHASE_PACKLIST: &str = "packlist";
pub const PHASE_GENERATION: &str = "photogeneration";

/// Pack name under which metadata failures are logged.
pub const METADATA_PACK: &str = "original";
/// Format name under which metadata failures are logged.
pub const METADATA_FORMAT: &str = "*";

#[derive(Error, Debug)]
pub enum PackError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot serialize: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Per-run knobs that are not part of the config file.
#[derive(Default)]
pub struct RunOptions {
    /// Scan and select, but generate nothing.
    pub dry_run: bool,
    /// Overrides `maxProcesses` from the config.
    pub max_processes: Option<usize>,
    /// Receives every progress transition.
    pub observer: Option<Observer>,
}

/// One line of the run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub photo: String,
    pub pack: String,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEntry {
    fn new(photo: &str, pack: &str, format: &str, error: Option<String>) -> Self {
        Self {
            photo: photo.to_string(),
            pack: pack.to_string(),
            format: format.to_string(),
            error,
        }
    }
}

/// The persisted run log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLog {
    pub success: Vec<LogEntry>,
    pub error: Vec<LogEntry>,
}

/// Everything a finished run knows about itself.
#[derive(Debug)]
pub struct RunReport {
    pub index_path: PathBuf,
    pub log_path: PathBuf,
    /// Photos in the index.
    pub photos: usize,
    pub selections: Selections,
    /// Jobs across all pack × format pairs.
    pub selected: usize,
    pub log: RunLog,
    pub progress: ProcessState,
    pub dry_run: bool,
}

impl RunReport {
    /// True when no item failed.
    pub fn is_clean(&self) -> bool {
        self.log.error.is_empty()
    }
}

/// The tracker behind a lock. Bookkeeping failures are logged and
/// otherwise ignored; they never change what the run does.
struct Phases {
    tracker: Mutex<ProgressTracker>,
}

impl Phases {
    fn new(tracker: ProgressTracker) -> Self {
        Self {
            tracker: Mutex::new(tracker),
        }
    }

    fn step(&self, op: impl FnOnce(&mut ProgressTracker) -> Result<(), ProgressError>) {
        let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(error) = op(&mut tracker) {
            warn!(%error, "progress bookkeeping failed");
        }
    }

    fn start(&self, name: &str, comment: &str) {
        self.step(|t| t.start_process(name, Some(comment)));
    }

    fn iterations(&self, name: &str, count: usize) {
        self.step(|t| t.start_iterations(name, count));
    }

    fn tick(&self, name: &str) {
        self.step(|t| t.next_iteration(name));
    }

    fn end(&self, name: &str) {
        self.step(|t| t.end_process(name));
    }

    fn end_iterating(&self, name: &str) {
        self.step(|t| t.end_iteration(name));
        self.end(name);
    }

    fn into_state(self) -> ProcessState {
        self.tracker
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .into_state()
    }
}

/// Run-log file name for a run started at `at`.
pub fn log_file_name(at: DateTime<Local>) -> String {
    format!("{}.log", at.format("%Y%m%d%H%M%S"))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PackError> {
    let io_err = |source| PackError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(io_err)
}

/// Replace the index file. The old one goes first so a failed write never
/// leaves a stale index looking current.
fn write_index(path: &Path, index: &MetadataIndex) -> Result<(), PackError> {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "previous index removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(PackError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    write_json(path, index)
}

/// Run with the pure-Rust imaging backend and the configured external
/// compositing tool.
pub fn run(config: &PackConfig, options: RunOptions) -> Result<RunReport, PackError> {
    let backend = RustBackend::new();
    let runner = CommandRunner::new(config.tool_timeout());
    run_with(&backend, &runner, config, options)
}

/// Run against explicit collaborators.
pub fn run_with<B: ImageBackend, R: ToolRunner>(
    backend: &B,
    runner: &R,
    config: &PackConfig,
    options: RunOptions,
) -> Result<RunReport, PackError> {
    let mut tracker = ProgressTracker::new();
    if let Some(observer) = options.observer {
        tracker.set_observer(observer);
    }
    let phases = Phases::new(tracker);
    let started = Local::now();

    phases.start(PHASE_CONFIG, "checking configuration");
    config.validate()?;
    phases.end(PHASE_CONFIG);

    let threads = effective_threads(options.max_processes.or(config.max_processes));
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    debug!(threads, "worker pool ready");

    phases.start(PHASE_PHOTOLIST, "listing source photos");
    let files = list_photos(config)?;
    phases.end(PHASE_PHOTOLIST);
    info!(count = files.len(), source = %config.source_dir().display(), "source photos found");

    phases.start(PHASE_PHOTOINFO, "reading metadata");
    phases.iterations(PHASE_PHOTOINFO, files.len());
    let scanned_at = Utc::now();
    let scan = pool.install(|| {
        scan_metadata(backend, config, &files, scanned_at, &|| {
            phases.tick(PHASE_PHOTOINFO)
        })
    });
    phases.end_iterating(PHASE_PHOTOINFO);

    let mut log = RunLog::default();
    log.error.extend(scan.failures.iter().map(|failure| {
        LogEntry::new(
            &failure.photo(),
            METADATA_PACK,
            METADATA_FORMAT,
            Some(failure.error.clone()),
        )
    }));
    let index = scan.index;

    phases.start(PHASE_EXPORTINDEX, "writing metadata index");
    let index_path = config.index_path();
    write_index(&index_path, &index)?;
    phases.end(PHASE_EXPORTINDEX);
    info!(photos = index.len(), path = %index_path.display(), "index written");

    phases.start(PHASE_PACKLIST, "selecting photos");
    phases.iterations(PHASE_PACKLIST, config.packs.len() * config.formats.len());
    let selections = compute_selections(config, &index, &|| phases.tick(PHASE_PACKLIST));
    let selected = selection_count(&selections);
    phases.end_iterating(PHASE_PACKLIST);
    info!(selected, "selection complete");

    if selected == 0 {
        info!("nothing selected, skipping generation");
    } else if options.dry_run {
        info!(selected, "dry run, skipping generation");
    } else {
        phases.start(PHASE_GENERATION, "generating renditions");
        phases.iterations(PHASE_GENERATION, selected);
        let outcomes = pool.install(|| {
            generate_all(backend, runner, config, &index, &selections, &|| {
                phases.tick(PHASE_GENERATION)
            })
        });
        phases.end_iterating(PHASE_GENERATION);

        for outcome in outcomes {
            match outcome.result {
                Ok(_) => log.success.push(LogEntry::new(
                    &outcome.photo,
                    &outcome.pack,
                    &outcome.format,
                    None,
                )),
                Err(error) => {
                    warn!(
                        photo = %outcome.photo,
                        pack = %outcome.pack,
                        format = %outcome.format,
                        %error,
                        "rendition failed"
                    );
                    log.error.push(LogEntry::new(
                        &outcome.photo,
                        &outcome.pack,
                        &outcome.format,
                        Some(error.to_string()),
                    ));
                }
            }
        }
    }

    let log_path = config.basepath.join(log_file_name(started));
    write_json(&log_path, &log)?;
    info!(
        success = log.success.len(),
        errors = log.error.len(),
        path = %log_path.display(),
        "run log written"
    );

    let progress = phases.into_state();
    debug!(state = ?progress, "final progress state");

    Ok(RunReport {
        index_path,
        log_path,
        photos: index.len(),
        selections,
        selected,
        log,
        progress,
        dry_run: options.dry_run,
    })
}
