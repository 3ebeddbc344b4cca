//! Shared test utilities for the photopack test suite.
//!
//! Provides a ready-to-run [`PackConfig`] rooted in a temp directory, record
//! fixtures, and synthetic JPEG writers (optionally carrying an XMP packet)
//! so tests exercise real decode/encode paths without binary fixtures.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let config = sample_config(tmp.path());
//! write_test_jpeg_with_xmp(&config.source_dir().join("a.jpg"), 64, 48, XMP);
//! ```

use crate::config::{FormatSpec, PackConfig, PackSpec};
use crate::imaging::jpeg_segments::splice_segments;
use crate::types::PhotoRecord;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// APP1 namespace header that marks an XMP segment.
const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

// =========================================================================
// Configuration fixtures
// =========================================================================

/// A valid config rooted at `base`: sources in `originals/`, output in
/// `packs/`, one unconstrained pack `all` and two formats, `web` and
/// `thumb`, using the built-in profiles.
pub fn sample_config(base: &Path) -> PackConfig {
    let format = |profile: &str| FormatSpec {
        profile: Some(profile.to_string()),
        ..Default::default()
    };
    PackConfig {
        basepath: base.to_path_buf(),
        originaldir: PathBuf::from("originals"),
        outputdir: PathBuf::from("packs"),
        exportindex: "index.json".into(),
        readedfiles: vec!["jpg".into()],
        recursive: false,
        packs: BTreeMap::from([("all".to_string(), PackSpec::default())]),
        formats: BTreeMap::from([
            ("web".to_string(), format("web")),
            ("thumb".to_string(), format("thumb")),
        ]),
        watermarks: BTreeMap::new(),
        image_tool_path: PathBuf::from("magick"),
        image_tool_args: Vec::new(),
        tool_timeout_secs: 10,
        max_processes: Some(2),
    }
}

/// A record whose source file sits in the config's source directory.
pub fn record_at(config: &PackConfig, id: &str, file_type: &str) -> PhotoRecord {
    let mut record = PhotoRecord::new(id, file_type);
    record.filename = Some(config.source_dir().join(format!("{id}.{file_type}")));
    record.path = Some("originals".into());
    record
}

// =========================================================================
// Synthetic images
// =========================================================================

fn gradient_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 90)
        .encode_image(&img)
        .unwrap();
    buf
}

/// Write a gradient JPEG of the given size, creating parent directories.
pub fn write_test_jpeg(path: &Path, width: u32, height: u32) {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).unwrap();
    }
    std::fs::write(path, gradient_jpeg(width, height)).unwrap();
}

/// Like [`write_test_jpeg`], with `xmp` embedded as an APP1 XMP segment.
pub fn write_test_jpeg_with_xmp(path: &Path, width: u32, height: u32, xmp: &str) {
    let payload_len = XMP_HEADER.len() + xmp.len() + 2;
    let mut segment = vec![0xFF, 0xE1];
    segment.extend_from_slice(&(payload_len as u16).to_be_bytes());
    segment.extend_from_slice(XMP_HEADER);
    segment.extend_from_slice(xmp.as_bytes());

    let mut jpeg = gradient_jpeg(width, height);
    splice_segments(&mut jpeg, &[&segment]);

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).unwrap();
    }
    std::fs::write(path, jpeg).unwrap();
}

/// An XMP packet in the shape Lightroom writes: rating and label as
/// attributes, tags as a bag.
pub fn lightroom_xmp(rating: u32, tags: &[&str]) -> String {
    let items: String = tags
        .iter()
        .map(|t| format!("<rdf:li>{t}</rdf:li>"))
        .collect();
    format!(
        r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about="" xmlns:xmp="http://ns.adobe.com/xap/1.0/"
    xmlns:dc="http://purl.org/dc/elements/1.1/" xmp:Rating="{rating}" xmp:Label="Green">
   <dc:subject><rdf:Bag>{items}</rdf:Bag></dc:subject>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>"#
    )
}
