//! EXIF decoding via `kamadak-exif`.
//!
//! Reads the primary IFD for camera and exposure facts and the GPS IFD for
//! location. Only the tags the export map names are pulled out; everything
//! else in the container is ignored.

use super::backend::{BackendError, ExifTags};
use exif::{Exif, In, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Read EXIF tags from any container `kamadak-exif` understands
/// (JPEG, TIFF, HEIF, PNG, WebP).
pub fn read_exif(path: &Path) -> Result<ExifTags, BackendError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new()
        .read_from_container(&mut reader)
        .map_err(|e| BackendError::NoExif(format!("{}: {e}", path.display())))?;
    Ok(tags_from_exif(&exif))
}

fn tags_from_exif(exif: &Exif) -> ExifTags {
    ExifTags {
        xres: rational(exif, Tag::XResolution),
        yres: rational(exif, Tag::YResolution),
        model: ascii(exif, Tag::Model),
        modelserial: ascii(exif, Tag::BodySerialNumber),
        focal: rational(exif, Tag::FocalLength),
        lens: ascii(exif, Tag::LensModel),
        iso: unsigned(exif, Tag::PhotographicSensitivity),
        ex: rational(exif, Tag::ExposureTime),
        fnumber: rational(exif, Tag::FNumber),
        creation: ascii(exif, Tag::DateTimeOriginal),
        latitude: coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, 'S'),
        longitude: coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, 'W'),
        altitude: altitude(exif),
    }
}

fn ascii(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|bytes| {
                String::from_utf8_lossy(bytes)
                    .trim_end_matches('\0')
                    .trim()
                    .to_string()
            })
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn rational(exif: &Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Rational(v) if !v.is_empty() => Some(v[0].to_f64()),
        _ => None,
    }
}

fn unsigned(exif: &Exif, tag: Tag) -> Option<u32> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Short(v) if !v.is_empty() => Some(u32::from(v[0])),
        Value::Long(v) if !v.is_empty() => Some(v[0]),
        _ => None,
    }
}

/// Degrees/minutes/seconds → signed decimal degrees.
fn coordinate(exif: &Exif, tag: Tag, ref_tag: Tag, negative: char) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let degrees = match &field.value {
        Value::Rational(v) if v.len() >= 3 => {
            v[0].to_f64() + v[1].to_f64() / 60.0 + v[2].to_f64() / 3600.0
        }
        _ => return None,
    };
    let hemisphere = ascii(exif, ref_tag).unwrap_or_default();
    if hemisphere.starts_with(negative) {
        Some(-degrees)
    } else {
        Some(degrees)
    }
}

/// Altitude in metres; reference byte 1 means below sea level.
fn altitude(exif: &Exif) -> Option<f64> {
    let value = rational(exif, Tag::GPSAltitude)?;
    let below = exif
        .get_field(Tag::GPSAltitudeRef, In::PRIMARY)
        .is_some_and(|f| matches!(&f.value, Value::Byte(v) if v.first() == Some(&1)));
    Some(if below { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_exif_nonexistent_file_is_io_error() {
        let result = read_exif(Path::new("/nonexistent/image.jpg"));
        assert!(matches!(result, Err(BackendError::Io(_))));
    }

    #[test]
    fn read_exif_without_exif_block_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("plain.jpg");
        crate::test_helpers::write_test_jpeg(&path, 16, 8);
        assert!(matches!(read_exif(&path), Err(BackendError::NoExif(_))));
    }
}
