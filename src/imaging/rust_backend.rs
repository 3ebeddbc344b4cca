//! Pure Rust image processing backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `image::image_dimensions` (header probe, no full decode) |
//! | EXIF tags | `kamadak-exif` via [`exif_reader`](super::exif_reader) |
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate |
//! | Resize | `image::DynamicImage::resize` with `Lanczos3` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Metadata carry-over | APP1/APP13 splice via [`jpeg_segments`](super::jpeg_segments) |

use super::backend::{BackendError, Dimensions, EncodedInfo, ExifTags, ImageBackend};
use super::calculations::fit_within;
use super::exif_reader;
use super::jpeg_segments::{metadata_segments, splice_segments};
use super::params::EncodeParams;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;
use std::sync::LazyLock;

/// Extensions whose decoders are compiled in.
const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn decode(path: &Path, bytes: &[u8]) -> Result<DynamicImage, BackendError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(BackendError::Io)?
        .decode()
        .map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
        })
}

/// Encode as baseline JPEG. Alpha is dropped; JPEG has no alpha channel.
fn encode_jpeg(img: &DynamicImage, quality: u32) -> Result<Vec<u8>, BackendError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality as u8);
    rgb.write_with_encoder(encoder)
        .map_err(|e| BackendError::ProcessingFailed(format!("JPEG encode failed: {}", e)))?;
    Ok(buf)
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        let (width, height) = image::image_dimensions(path).map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to read dimensions: {}", e))
        })?;
        Ok(Dimensions { width, height })
    }

    fn read_tags(&self, path: &Path) -> Result<ExifTags, BackendError> {
        exif_reader::read_exif(path)
    }

    fn encode(&self, params: &EncodeParams) -> Result<EncodedInfo, BackendError> {
        let source_bytes = std::fs::read(&params.source)?;
        let img = decode(&params.source, &source_bytes)?;

        let (width, height) = fit_within((img.width(), img.height()), params.max_edge);
        let img = if (width, height) != (img.width(), img.height()) {
            img.resize(width, height, FilterType::Lanczos3)
        } else {
            img
        };

        let mut out = encode_jpeg(&img, params.quality.value())?;
        splice_segments(&mut out, &metadata_segments(&source_bytes));
        std::fs::write(&params.output, &out)?;

        Ok(EncodedInfo {
            width: img.width(),
            height: img.height(),
            bytes: out.len() as u64,
        })
    }
}
