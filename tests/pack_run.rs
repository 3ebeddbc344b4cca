//! End-to-end pack runs against real JPEGs.
//!
//! Sources are synthetic gradients written with the `image` crate, some
//! carrying an XMP packet. Rendering uses the real pure-Rust backend. The
//! compositing tool is either a recording [`ToolRunner`] or, on Unix, a small
//! shell script driven through the real [`CommandRunner`].

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};
use photopack::config::{PackConfig, load_config};
use photopack::imaging::RustBackend;
use photopack::pack::{self, PackError, RunLog, RunOptions};
use photopack::scan::ScanError;
use photopack::watermark::{ToolOutput, ToolRunner, WatermarkError};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

fn xmp(rating: u32, tags: &[&str]) -> String {
    let items: String = tags.iter().map(|t| format!("<rdf:li>{t}</rdf:li>")).collect();
    format!(
        r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"><rdf:Description xmlns:xmp="http://ns.adobe.com/xap/1.0/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:photoshop="http://ns.adobe.com/photoshop/1.0/" xmp:Rating="{rating}"><photoshop:City>Lisbon</photoshop:City><dc:subject><rdf:Bag>{items}</rdf:Bag></dc:subject></rdf:Description></rdf:RDF></x:xmpmeta>"#
    )
}

/// Write a `width`×`height` JPEG with `packet` spliced in as APP1 XMP.
fn write_photo(path: &Path, width: u32, height: u32, packet: &str) {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 90)
        .encode_image(&img)
        .unwrap();

    let len = (2 + XMP_HEADER.len() + packet.len()) as u16;
    let mut segment = vec![0xFF, 0xE1];
    segment.extend_from_slice(&len.to_be_bytes());
    segment.extend_from_slice(XMP_HEADER);
    segment.extend_from_slice(packet.as_bytes());
    jpeg.splice(2..2, segment);

    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, jpeg).unwrap();
}

/// A library with A (event, 4 stars, 300×200) and B (untagged, 2 stars,
/// 120×240), and a JSON config using a relative basepath.
fn library(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("library");
    write_photo(&base.join("originals/A.jpg"), 300, 200, &xmp(4, &["event"]));
    write_photo(&base.join("originals/B.jpg"), 120, 240, &xmp(2, &[]));

    let config = format!(
        r#"{{
            "basepath": "library",
            "originaldir": "originals",
            "outputdir": "packs",
            "packs": {{
                "events": {{ "criteria": [{{ "key": "tags", "value": "event" }}] }},
                "everything": {{}}
            }},
            "formats": {{
                "web": {{
                    "maxWidth": 150,
                    "quality": 85,
                    "criteria": [{{ "key": "rating", "value": [3, 4, 5] }}]
                    {extra}
                }},
                "thumb": {{ "profile": "thumb" }}
            }},
            "watermarks": {{
                "sign": {{ "kind": "text", "text": "Sample", "gravity": "southeast", "x": 10, "y": 10 }},
                "logo": {{ "img": "logo.png", "dissolve": 30 }}
            }},
            "maxProcesses": 2
        }}"#
    );
    let path = tmp.path().join("photopack.json");
    fs::write(&path, config).unwrap();
    (tmp, path)
}

#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<Vec<String>>>,
}

impl ToolRunner for RecordingRunner {
    fn run(&self, _program: &Path, args: &[OsString]) -> Result<ToolOutput, WatermarkError> {
        self.calls.lock().unwrap().push(
            args.iter()
                .map(|a| a.to_string_lossy().to_string())
                .collect(),
        );
        Ok(ToolOutput {
            code: Some(0),
            success: true,
            ..Default::default()
        })
    }
}

fn load(path: &Path) -> PackConfig {
    load_config(path).unwrap()
}

// =============================================================================
// Selection, rendering and persistence
// =============================================================================

#[test]
fn renders_selected_photos_per_pack_and_format() {
    let (_tmp, path) = library("");
    let config = load(&path);
    let report =
        pack::run_with(&RustBackend::new(), &RecordingRunner::default(), &config, RunOptions::default())
            .unwrap();

    assert!(report.is_clean(), "{:?}", report.log.error);
    assert_eq!(report.photos, 2);
    assert_eq!(report.selections["events"]["web"], vec!["A"]);
    assert_eq!(report.selections["events"]["thumb"], vec!["A"]);
    assert_eq!(report.selections["everything"]["web"], vec!["A"]);
    assert_eq!(report.selections["everything"]["thumb"], vec!["A", "B"]);
    assert_eq!(report.selected, 5);
    assert_eq!(report.log.success.len(), 5);

    let out = config.output_dir();
    let web = out.join("events/web/A.jpg");
    assert_eq!(image::image_dimensions(&web).unwrap(), (150, 100));
    assert_eq!(
        image::image_dimensions(out.join("everything/thumb/B.jpg")).unwrap(),
        (60, 120)
    );
    assert!(!out.join("everything/web/B.jpg").exists());

    // The XMP packet survives re-encoding.
    let bytes = fs::read(&web).unwrap();
    assert!(bytes.windows(10).any(|w| w == b"<x:xmpmeta"));
}

#[test]
fn index_and_log_land_under_basepath() {
    let (tmp, path) = library("");
    let config = load(&path);
    let report =
        pack::run_with(&RustBackend::new(), &RecordingRunner::default(), &config, RunOptions::default())
            .unwrap();

    let base = tmp.path().join("library");
    assert_eq!(report.index_path, base.join("index.json"));
    let index: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report.index_path).unwrap()).unwrap();
    let a = &index["A"];
    assert_eq!(a["width"], 300);
    assert_eq!(a["orientation"], "L");
    assert_eq!(a["city"], "Lisbon");
    assert_eq!(a["authorrating"], 4.0);
    assert_eq!(a["path"], "originals");
    assert_eq!(index["B"]["orientation"], "P");

    assert_eq!(report.log_path.parent(), Some(base.as_path()));
    let name = report.log_path.file_name().unwrap().to_string_lossy().to_string();
    assert_eq!(name.len(), "YYYYMMDDHHMMSS.log".len());
    let log: RunLog = serde_json::from_str(&fs::read_to_string(&report.log_path).unwrap()).unwrap();
    assert_eq!(log, report.log);
}

#[test]
fn watermark_chain_runs_in_declaration_order() {
    let (tmp, path) = library(r#", "watermarks": ["sign", "logo"]"#);
    let config = load(&path);
    let runner = RecordingRunner::default();
    let report =
        pack::run_with(&RustBackend::new(), &runner, &config, RunOptions::default()).unwrap();
    assert!(report.is_clean(), "{:?}", report.log.error);

    // A is selected for web in both packs: two photos × two steps.
    let calls = runner.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 4);
    let logo = tmp.path().join("library/logo.png").display().to_string();
    for target in ["events", "everything"] {
        let image = config
            .output_dir()
            .join(target)
            .join("web/A.jpg")
            .display()
            .to_string();
        let steps: Vec<&Vec<String>> = calls.iter().filter(|c| c[0] == image).collect();
        assert_eq!(steps.len(), 2);
        assert!(steps[0].contains(&"Sample".to_string()));
        assert_eq!(steps[1][1], logo);
        assert!(steps[1].contains(&"compose:args=30,100".to_string()));
        assert_eq!(steps[1].last(), Some(&image));
    }
}

#[test]
fn dry_run_generates_nothing() {
    let (_tmp, path) = library("");
    let config = load(&path);
    let options = RunOptions {
        dry_run: true,
        ..Default::default()
    };
    let report =
        pack::run_with(&RustBackend::new(), &RecordingRunner::default(), &config, options).unwrap();
    assert_eq!(report.selected, 5);
    assert!(report.index_path.exists());
    assert!(!config.output_dir().exists());
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn empty_source_directory_is_structural() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("originals")).unwrap();
    let config = PackConfig::from_json(&format!(
        r#"{{ "basepath": {:?}, "originaldir": "originals", "outputdir": "packs",
             "packs": {{ "p": {{}} }}, "formats": {{ "f": {{ "profile": "web" }} }} }}"#,
        tmp.path().display().to_string()
    ))
    .unwrap();

    let result = pack::run(&config, RunOptions::default());
    assert!(matches!(result, Err(PackError::Scan(ScanError::NoSourcePhotos(_)))));
    assert!(!tmp.path().join("index.json").exists());
    assert!(!tmp.path().join("packs").exists());
}

#[test]
fn corrupt_source_is_logged_and_the_rest_generated() {
    let (tmp, path) = library("");
    fs::write(tmp.path().join("library/originals/C.jpg"), b"not a jpeg").unwrap();
    let mut config = load(&path);
    config.formats.get_mut("web").unwrap().criteria.clear();

    let report =
        pack::run_with(&RustBackend::new(), &RecordingRunner::default(), &config, RunOptions::default())
            .unwrap();
    assert_eq!(report.photos, 3);
    assert!(!report.is_clean());
    // C has no tags, so only the unconstrained pack picks it up.
    assert_eq!(report.selected, 8);
    assert!(report.log.error.iter().all(|e| e.photo == "C" && e.pack == "everything"));
    assert_eq!(report.log.error.len(), 2);
    assert_eq!(report.log.success.len(), 6);
}

#[cfg(unix)]
mod external_tool {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn tool_is_spawned_with_leading_args() {
        let (tmp, path) = library(r#", "watermarks": ["sign"]"#);
        let calls = tmp.path().join("calls.txt");
        let tool = script(
            tmp.path(),
            "fake-magick",
            &format!("echo \"$@\" >> {}", calls.display()),
        );
        let mut config = load(&path);
        config.image_tool_path = tool;
        config.image_tool_args = vec!["convert".into()];

        let report = pack::run(&config, RunOptions::default()).unwrap();
        assert!(report.is_clean(), "{:?}", report.log.error);
        let text = fs::read_to_string(&calls).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.starts_with("convert ")));
    }

    #[test]
    fn stderr_output_fails_the_step() {
        let (tmp, path) = library(r#", "watermarks": ["sign", "logo"]"#);
        let tool = script(tmp.path(), "noisy-magick", "echo 'font not found' >&2");
        let mut config = load(&path);
        config.image_tool_path = tool;

        let report = pack::run(&config, RunOptions::default()).unwrap();
        assert!(!report.is_clean());
        let web_errors: Vec<_> = report.log.error.iter().filter(|e| e.format == "web").collect();
        assert_eq!(web_errors.len(), 2);
        for entry in web_errors {
            let error = entry.error.as_deref().unwrap();
            assert!(error.contains("sign"), "{error}");
            assert!(error.contains("font not found"), "{error}");
        }
        // Thumbnails carry no watermark and still succeed.
        assert_eq!(report.log.success.len(), 3);
    }

    #[test]
    fn missing_tool_is_an_item_error() {
        let (tmp, path) = library(r#", "watermarks": ["sign"]"#);
        let mut config = load(&path);
        config.image_tool_path = tmp.path().join("no-such-tool");

        let report = pack::run(&config, RunOptions::default()).unwrap();
        assert_eq!(report.log.error.len(), 2);
        assert!(
            report.log.error[0]
                .error
                .as_deref()
                .unwrap()
                .contains("failed to start")
        );
    }
}
