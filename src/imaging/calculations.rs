//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Dimensions of a rendition bounded on its longer edge.
///
/// Preserves aspect ratio and never upscales: a source whose longer edge is
/// already within `max_edge` is returned unchanged. The shorter edge is
/// rounded and kept at least one pixel.
///
/// # Examples
/// ```
/// # use photopack::imaging::fit_within;
/// assert_eq!(fit_within((4000, 3000), Some(2048)), (2048, 1536));
/// assert_eq!(fit_within((3000, 4000), Some(2048)), (1536, 2048));
/// assert_eq!(fit_within((800, 600), Some(2048)), (800, 600));
/// assert_eq!(fit_within((800, 600), None), (800, 600));
/// ```
pub fn fit_within(original: (u32, u32), max_edge: Option<u32>) -> (u32, u32) {
    let (w, h) = original;
    let Some(bound) = max_edge else {
        return original;
    };
    let longer = w.max(h);
    if bound == 0 || longer <= bound {
        return original;
    }

    let ratio = bound as f64 / longer as f64;
    if w >= h {
        let out_h = ((h as f64 * ratio).round() as u32).max(1);
        (bound, out_h)
    } else {
        let out_w = ((w as f64 * ratio).round() as u32).max(1);
        (out_w, bound)
    }
}
