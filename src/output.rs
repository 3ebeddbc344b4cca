//! CLI output formatting for pack runs.
//!
//! # Output Format
//!
//! ## Progress
//!
//! One line per transition, fed by the tracker's observer:
//!
//! ```text
//! ==> photoinfo: reading metadata
//!     photoinfo 12/40, ~8.4s remaining
//!     photoinfo done in 11.9s
//! ```
//!
//! ## Summary
//!
//! ```text
//! Packs
//! events
//!     thumb: 12 photos
//!     web: 12 photos
//! portfolio
//!     web: 3 photos
//!
//! Errors
//!     IMG_0042 events/web: rendition failed: ...
//!     broken.jpg original/*: XMP: ...
//!
//! Generated 26 of 27 renditions, 2 errors
//! Index: /photos/index.json
//! Log:   /photos/20240309170502.log
//! ```
//!
//! # Architecture
//!
//! Each display has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::pack::RunReport;
use crate::progress::{Observer, ProcessInfo, ProcessState, ProgressEvent};
use std::time::Duration;
use tracing::{debug, info};

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable duration: milliseconds below a second, then seconds
/// with one decimal, then minutes and seconds.
fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        let secs = d.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

// ============================================================================
// Progress
// ============================================================================

fn iteration_line(info: &ProcessInfo) -> String {
    let done = info.itmax.saturating_sub(info.itpending);
    let mut line = format!("{}{} {}/{}", indent(1), info.name, done, info.itmax);
    if info.itpending > 0 && !info.remainingtime.is_zero() {
        line.push_str(&format!(
            ", ~{} remaining",
            format_duration(info.remainingtime)
        ));
    }
    line
}

/// Lines describing one progress transition of process `name`.
pub fn format_progress_event(event: ProgressEvent, name: &str, state: &ProcessState) -> Vec<String> {
    let Some(info) = state.get(name) else {
        return vec![format!("{}{} {}", indent(1), name, event)];
    };
    match event {
        ProgressEvent::StartProcess => match &info.comment {
            Some(comment) => vec![format!("==> {name}: {comment}")],
            None => vec![format!("==> {name}")],
        },
        ProgressEvent::EndProcess => vec![format!(
            "{}{} done in {}",
            indent(1),
            name,
            format_duration(info.duration)
        )],
        ProgressEvent::StartIteration | ProgressEvent::NextIteration => vec![iteration_line(info)],
        ProgressEvent::EndIteration => Vec::new(),
    }
}

/// The default observer: phase boundaries at info, iterations at debug.
pub fn progress_logger() -> Observer {
    Box::new(|event: ProgressEvent, name: &str, state: &ProcessState| {
        for line in format_progress_event(event, name, state) {
            match event {
                ProgressEvent::StartProcess | ProgressEvent::EndProcess => info!("{line}"),
                _ => debug!("{line}"),
            }
        }
    })
}

// ============================================================================
// Run summary
// ============================================================================

/// Format the end-of-run summary: selections per pack, failures, totals.
pub fn format_run_summary(report: &RunReport) -> Vec<String> {
    let mut lines = vec!["Packs".to_string()];
    for (pack, formats) in &report.selections {
        lines.push(pack.clone());
        for (format, ids) in formats {
            lines.push(format!(
                "{}{}: {}",
                indent(1),
                format,
                plural(ids.len(), "photo", "photos")
            ));
        }
    }

    if !report.log.error.is_empty() {
        lines.push(String::new());
        lines.push("Errors".to_string());
        for entry in &report.log.error {
            lines.push(format!(
                "{}{} {}/{}: {}",
                indent(1),
                entry.photo,
                entry.pack,
                entry.format,
                entry.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    lines.push(String::new());
    let errors = plural(report.log.error.len(), "error", "errors");
    if report.dry_run {
        lines.push(format!(
            "Dry run: {} selected from {}, {}",
            plural(report.selected, "rendition", "renditions"),
            plural(report.photos, "photo", "photos"),
            errors
        ));
    } else if report.selected == 0 {
        lines.push(format!(
            "Nothing selected from {}, {}",
            plural(report.photos, "photo", "photos"),
            errors
        ));
    } else {
        lines.push(format!(
            "Generated {} of {} renditions, {}",
            report.log.success.len(),
            report.selected,
            errors
        ));
    }
    lines.push(format!("Index: {}", report.index_path.display()));
    lines.push(format!("Log:   {}", report.log_path.display()));
    lines
}

pub fn print_run_summary(report: &RunReport) {
    for line in format_run_summary(report) {
        println!("{}", line);
    }
}
