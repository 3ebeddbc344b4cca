//! Image processing: pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::image_dimensions` |
//! | **EXIF tags** | `kamadak-exif` |
//! | **Resize → JPEG** | Lanczos3 + `JpegEncoder`, APP1/APP13 carried over |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Profiles and encode parameters
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: Rendition generation combining profiles + backend

pub mod backend;
mod calculations;
mod exif_reader;
pub(crate) mod jpeg_segments;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, EncodedInfo, ExifTags, ImageBackend};
pub use calculations::fit_within;
pub use operations::{
    VersionInfo, VersionSet, generate_spec, generate_version, generate_versions, get_dimensions,
};
pub use params::{
    EncodeParams, MASTER_PROFILE, NAMED_PROFILES, Profile, Quality, VersionSpec, named_profile,
};
pub use rust_backend::{RustBackend, supported_input_extensions};
