//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the three black-box services the
//! pipeline consumes: identify (dimension probe), read_tags (binary EXIF
//! decode) and encode (resize + JPEG encode with metadata carried over).
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend): pure Rust, no system
//! libraries.

use super::params::EncodeParams;
use crate::types::FieldValue;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("No EXIF data: {0}")]
    NoExif(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Camera, exposure and GPS facts decoded from EXIF.
///
/// Field names mirror the export names they are stored under.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExifTags {
    pub xres: Option<f64>,
    pub yres: Option<f64>,
    pub model: Option<String>,
    pub modelserial: Option<String>,
    pub focal: Option<f64>,
    pub lens: Option<String>,
    pub iso: Option<u32>,
    pub ex: Option<f64>,
    pub fnumber: Option<f64>,
    pub creation: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
}

impl ExifTags {
    /// Flatten into `(export name, value)` pairs, skipping absent tags.
    pub fn into_fields(self) -> Vec<(&'static str, FieldValue)> {
        let numbers = [
            ("xres", self.xres),
            ("yres", self.yres),
            ("focal", self.focal),
            ("iso", self.iso.map(f64::from)),
            ("ex", self.ex),
            ("fn", self.fnumber),
            ("latitude", self.latitude),
            ("longitude", self.longitude),
            ("altitude", self.altitude),
        ];
        let texts = [
            ("model", self.model),
            ("modelserial", self.modelserial),
            ("lens", self.lens),
            ("creation", self.creation),
        ];

        numbers
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, FieldValue::from(v))))
            .chain(
                texts
                    .into_iter()
                    .filter_map(|(k, v)| v.map(|v| (k, FieldValue::from(v)))),
            )
            .collect()
    }
}

/// Outcome of a successful encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedInfo {
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
}

/// Trait for image processing backends.
///
/// `Sync` so a single backend can be shared across the rayon pool.
pub trait ImageBackend: Sync {
    /// Get image dimensions.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Decode embedded EXIF camera/exposure/GPS tags.
    fn read_tags(&self, path: &Path) -> Result<ExifTags, BackendError>;

    /// Execute a resize + encode operation.
    fn encode(&self, params: &EncodeParams) -> Result<EncodedInfo, BackendError>;
}
