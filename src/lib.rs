//! # Photopack
//!
//! Builds photo packs from a library of originals. A pack is a named bundle
//! of photos chosen by metadata criteria; inside every pack each format
//! produces one rendition per selected photo, resized, re-encoded and
//! optionally watermarked.
//!
//! # Architecture: One Run, Two Parallel Stages
//!
//! ```text
//! 1. Scan      originals/  →  index.json               (files → metadata records)
//! 2. Select    index       →  pack × format → [ids]    (criteria engine, pure)
//! 3. Generate  selections  →  packs/<pack>/<format>/   (render + watermark)
//!                          →  <timestamp>.log          (success and error lists)
//! ```
//!
//! Scanning and generation fan out over a run-local rayon pool. Selection is
//! a pure function of the index and the config, so it is cheap to test and
//! to re-run with `--dry-run`.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pack`] | The run: phases, index and log persistence, the [`pack::RunReport`] |
//! | [`scan`] | Source listing and the parallel metadata scan into a [`types::MetadataIndex`] |
//! | [`metadata`] | Per-file probes (stat, EXIF, XMP) merged into one record; the XMP projector |
//! | [`criteria`] | Criteria evaluation: key semantics, AND/OR groups, pack × format selection |
//! | [`process`] | Selection over all pairs and the parallel render + watermark jobs |
//! | [`imaging`] | Pure-Rust decode, resize and JPEG encode with metadata carried over |
//! | [`watermark`] | Typed argument builders for the compositing tool and a timed process runner |
//! | [`progress`] | Nested phase/iteration timing with ETA estimates |
//! | [`config`] | JSON/TOML config loading and validation |
//! | [`types`] | Photo records and their field values |
//! | [`output`] | CLI output formatting for progress and the run summary |
//!
//! # Design Decisions
//!
//! ## Item Failures Are Data
//!
//! Only structural problems (bad config, missing or empty source directory)
//! fail a run. A photo whose metadata cannot be read, or whose rendition or
//! watermark fails, becomes an entry in the run log and the batch moves on.
//! [`pack::RunReport::is_clean`] tells a clean run from one with errors; the
//! binary turns that into exit code 2.
//!
//! ## Rendering In Process, Compositing Out Of Process
//!
//! Resizing and encoding use the `image` crate, so the common path has no
//! system dependencies. Watermarks are delegated to an ImageMagick-style tool
//! because its gravity/dissolve/annotate grammar is what photographers
//! already configure. Arguments are built as discrete values and never pass
//! through a shell.
//!
//! ## Criteria Fail Closed
//!
//! Unknown criteria keys never match. A typo in a config therefore selects
//! nothing rather than everything, and validation warns about it up front.

pub mod config;
pub mod criteria;
pub mod imaging;
pub mod metadata;
pub mod output;
pub mod pack;
pub mod process;
pub mod progress;
pub mod scan;
pub mod types;
pub mod watermark;

#[cfg(test)]
pub(crate) mod test_helpers;
