//! JPEG marker segment handling for metadata carry-over.
//!
//! The encoder writes a bare JFIF stream. To keep the source's descriptive
//! metadata we copy its APP1 (EXIF, XMP) and APP13 (IPTC) segments verbatim
//! and splice them in after the encoder's own APP0.

const SOI: [u8; 2] = [0xFF, 0xD8];
const APP1: u8 = 0xE1;
const APP13: u8 = 0xED;
const SOS: u8 = 0xDA;

/// Collect the raw APP1/APP13 segments (marker + length + payload) that
/// precede the scan data of a JPEG stream. Empty for non-JPEG input.
pub fn metadata_segments(jpeg: &[u8]) -> Vec<&[u8]> {
    let mut segments = Vec::new();
    if !jpeg.starts_with(&SOI) {
        return segments;
    }

    let mut pos = 2;
    while pos + 4 <= jpeg.len() && jpeg[pos] == 0xFF {
        let marker = jpeg[pos + 1];
        if marker == SOS || marker == 0xD9 {
            break;
        }
        // Standalone markers carry no length
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) || marker == 0xFF {
            pos += if marker == 0xFF { 1 } else { 2 };
            continue;
        }
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        if len < 2 {
            break;
        }
        let end = pos + 2 + len;
        if end > jpeg.len() {
            break;
        }
        if marker == APP1 || marker == APP13 {
            segments.push(&jpeg[pos..end]);
        }
        pos = end;
    }
    segments
}

/// Insert pre-built segments after the leading APP0/APPn block of `jpeg`.
///
/// Any APP1/APP13 segments the encoder produced itself are dropped first so
/// the source's copies are the only ones present.
pub fn splice_segments(jpeg: &mut Vec<u8>, segments: &[&[u8]]) {
    if segments.is_empty() || !jpeg.starts_with(&SOI) {
        return;
    }

    let mut pos = 2;
    let mut insert_at = None;
    while pos + 4 <= jpeg.len() && jpeg[pos] == 0xFF {
        let marker = jpeg[pos + 1];
        if !(0xE0..=0xEF).contains(&marker) {
            break;
        }
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        if len < 2 || pos + 2 + len > jpeg.len() {
            break;
        }
        if marker == APP1 || marker == APP13 {
            jpeg.drain(pos..pos + 2 + len);
            insert_at.get_or_insert(pos);
            continue;
        }
        pos += 2 + len;
    }

    let at = insert_at.map_or(pos, |first| first.min(pos));
    let payload: Vec<u8> = segments.iter().flat_map(|s| s.iter().copied()).collect();
    jpeg.splice(at..at, payload);
}
