//! Watermark composition through an external compositing tool.
//!
//! Each watermark is one invocation of an ImageMagick-compatible binary that
//! rewrites the rendition in place. Arguments are built as a typed list
//! ([`image_overlay_args`], [`text_overlay_args`]) and handed to a
//! [`ToolRunner`]; nothing is ever interpolated into a shell string.
//!
//! ## Argument grammar
//!
//! Image overlay:
//!
//! ```text
//! <tool> [lead..] IMAGE OVERLAY -gravity G -geometry WxH+X+Y -compose dissolve
//!        -define compose:args=D,100 -composite IMAGE
//! ```
//!
//! Text overlay (black shadow one pixel down-right, white fill with a thin
//! dark stroke, both at `D`% opacity):
//!
//! ```text
//! <tool> [lead..] IMAGE -gravity G [-font F] -pointsize S
//!        -fill rgba(0,0,0,a) -annotate +(X+1)+(Y+1) TEXT
//!        -stroke rgba(0,0,0,a) -strokewidth 1 -fill rgba(255,255,255,a) -annotate +X+Y TEXT
//!        IMAGE
//! ```
//!
//! Steps on the same file run strictly in order; the first failing step
//! aborts the rest of that file's chain.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Error, Debug)]
pub enum WatermarkError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("compositing tool timed out after {0:?}")]
    Timeout(Duration),
    #[error("compositing tool exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("compositing tool wrote to stderr: {0}")]
    Stderr(String),
    #[error("watermark step {index} ({name}) failed: {source}")]
    Step {
        index: usize,
        name: String,
        #[source]
        source: Box<WatermarkError>,
    },
}

// =============================================================================
// Configuration types
// =============================================================================

/// Anchor point an overlay is positioned relative to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Gravity {
    NorthWest,
    North,
    NorthEast,
    West,
    Center,
    East,
    SouthWest,
    South,
    #[default]
    SouthEast,
}

impl Gravity {
    const ALL: [Gravity; 9] = [
        Gravity::NorthWest,
        Gravity::North,
        Gravity::NorthEast,
        Gravity::West,
        Gravity::Center,
        Gravity::East,
        Gravity::SouthWest,
        Gravity::South,
        Gravity::SouthEast,
    ];

    /// Name as the compositing tool spells it.
    pub fn as_str(self) -> &'static str {
        match self {
            Gravity::NorthWest => "NorthWest",
            Gravity::North => "North",
            Gravity::NorthEast => "NorthEast",
            Gravity::West => "West",
            Gravity::Center => "Center",
            Gravity::East => "East",
            Gravity::SouthWest => "SouthWest",
            Gravity::South => "South",
            Gravity::SouthEast => "SouthEast",
        }
    }
}

impl TryFrom<String> for Gravity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let wanted: String = value
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_lowercase();
        Gravity::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| format!("unknown gravity {value:?}"))
    }
}

impl From<Gravity> for String {
    fn from(gravity: Gravity) -> Self {
        gravity.as_str().to_string()
    }
}

impl fmt::Display for Gravity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a watermark draws.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WatermarkSource {
    Image {
        img: PathBuf,
    },
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        font: Option<String>,
        fontsize: u32,
    },
}

/// One configured watermark.
///
/// `kind` may be omitted: it is inferred from whether `img` or `text` is
/// present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWatermark")]
pub struct WatermarkSpec {
    #[serde(flatten)]
    pub source: WatermarkSource,
    pub x: i32,
    pub y: i32,
    /// Overlay box; `0x0` keeps the overlay's own size.
    pub w: u32,
    pub h: u32,
    pub gravity: Gravity,
    /// Opacity percentage, 0–100.
    pub dissolve: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WatermarkKind {
    Image,
    Text,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWatermark {
    kind: Option<WatermarkKind>,
    img: Option<PathBuf>,
    text: Option<String>,
    font: Option<String>,
    #[serde(default = "default_fontsize")]
    fontsize: u32,
    #[serde(default)]
    x: i32,
    #[serde(default)]
    y: i32,
    #[serde(default)]
    w: u32,
    #[serde(default)]
    h: u32,
    #[serde(default)]
    gravity: Gravity,
    #[serde(default = "default_dissolve")]
    dissolve: u32,
}

fn default_fontsize() -> u32 {
    24
}

fn default_dissolve() -> u32 {
    50
}

impl TryFrom<RawWatermark> for WatermarkSpec {
    type Error = String;

    fn try_from(raw: RawWatermark) -> Result<Self, Self::Error> {
        let kind = match (raw.kind, &raw.img, &raw.text) {
            (Some(kind), _, _) => kind,
            (None, Some(_), _) => WatermarkKind::Image,
            (None, None, Some(_)) => WatermarkKind::Text,
            (None, None, None) => return Err("watermark needs either img or text".into()),
        };
        let source = match kind {
            WatermarkKind::Image => WatermarkSource::Image {
                img: raw.img.ok_or("image watermark needs img")?,
            },
            WatermarkKind::Text => WatermarkSource::Text {
                text: raw.text.ok_or("text watermark needs text")?,
                font: raw.font,
                fontsize: raw.fontsize,
            },
        };
        Ok(WatermarkSpec {
            source,
            x: raw.x,
            y: raw.y,
            w: raw.w,
            h: raw.h,
            gravity: raw.gravity,
            dissolve: raw.dissolve,
        })
    }
}

impl WatermarkSpec {
    pub fn image(img: impl Into<PathBuf>) -> Self {
        Self::with_source(WatermarkSource::Image { img: img.into() })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::with_source(WatermarkSource::Text {
            text: text.into(),
            font: None,
            fontsize: default_fontsize(),
        })
    }

    fn with_source(source: WatermarkSource) -> Self {
        Self {
            source,
            x: 0,
            y: 0,
            w: 0,
            h: 0,
            gravity: Gravity::default(),
            dissolve: default_dissolve(),
        }
    }

    /// Arguments (after the leading tool arguments) that apply this
    /// watermark to `image` in place.
    pub fn args(&self, image: &Path) -> Vec<OsString> {
        match &self.source {
            WatermarkSource::Image { img } => image_overlay_args(self, image, img),
            WatermarkSource::Text {
                text,
                font,
                fontsize,
            } => text_overlay_args(self, image, text, font.as_deref(), *fontsize),
        }
    }
}

// =============================================================================
// Argument builders
// =============================================================================

fn offset(x: i32, y: i32) -> String {
    format!("{x:+}{y:+}")
}

fn geometry(spec: &WatermarkSpec) -> String {
    if spec.w == 0 && spec.h == 0 {
        offset(spec.x, spec.y)
    } else {
        format!("{}x{}{}", spec.w, spec.h, offset(spec.x, spec.y))
    }
}

/// Composite an image file over `image` with dissolve.
pub fn image_overlay_args(spec: &WatermarkSpec, image: &Path, overlay: &Path) -> Vec<OsString> {
    vec![
        image.into(),
        overlay.into(),
        "-gravity".into(),
        spec.gravity.as_str().into(),
        "-geometry".into(),
        geometry(spec).into(),
        "-compose".into(),
        "dissolve".into(),
        "-define".into(),
        format!("compose:args={},100", spec.dissolve).into(),
        "-composite".into(),
        image.into(),
    ]
}

/// Draw `text` over `image` with a shadow, a stroke and a white fill.
pub fn text_overlay_args(
    spec: &WatermarkSpec,
    image: &Path,
    text: &str,
    font: Option<&str>,
    fontsize: u32,
) -> Vec<OsString> {
    let alpha = f64::from(spec.dissolve.min(100)) / 100.0;
    let shadow = format!("rgba(0,0,0,{alpha})");
    let fill = format!("rgba(255,255,255,{alpha})");

    let mut args: Vec<OsString> = vec![
        image.into(),
        "-gravity".into(),
        spec.gravity.as_str().into(),
        "-pointsize".into(),
        fontsize.to_string().into(),
        "-fill".into(),
        shadow.clone().into(),
        "-annotate".into(),
        offset(spec.x + 1, spec.y + 1).into(),
        text.into(),
        "-stroke".into(),
        shadow.into(),
        "-strokewidth".into(),
        "1".into(),
        "-fill".into(),
        fill.into(),
        "-annotate".into(),
        offset(spec.x, spec.y).into(),
        text.into(),
        image.into(),
    ];
    if let Some(font) = font {
        args.splice(3..3, [OsString::from("-font"), OsString::from(font)]);
    }
    args
}

// =============================================================================
// Process runner
// =============================================================================

/// Captured outcome of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Spawns the compositing tool. `Sync` so one runner serves the whole pool.
pub trait ToolRunner: Sync {
    fn run(&self, program: &Path, args: &[OsString]) -> Result<ToolOutput, WatermarkError>;
}

/// Runs the tool as a child process with a wall-clock timeout.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    pub timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).to_string()
    })
}

impl ToolRunner for CommandRunner {
    fn run(&self, program: &Path, args: &[OsString]) -> Result<ToolOutput, WatermarkError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| WatermarkError::Spawn {
                program: program.display().to_string(),
                source,
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let start = Instant::now();

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if start.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(WatermarkError::Timeout(self.timeout));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    let _ = child.kill();
                    return Err(WatermarkError::Spawn {
                        program: program.display().to_string(),
                        source,
                    });
                }
            }
        };

        Ok(ToolOutput {
            code: status.code(),
            success: status.success(),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        })
    }
}

// =============================================================================
// Compositor
// =============================================================================

/// Applies ordered watermark chains with one tool binary.
pub struct WatermarkCompositor<'a, R: ToolRunner> {
    runner: &'a R,
    program: &'a Path,
    leading_args: &'a [String],
}

impl<'a, R: ToolRunner> WatermarkCompositor<'a, R> {
    pub fn new(runner: &'a R, program: &'a Path, leading_args: &'a [String]) -> Self {
        Self {
            runner,
            program,
            leading_args,
        }
    }

    /// Run one watermark against `image`.
    pub fn apply_one(&self, image: &Path, spec: &WatermarkSpec) -> Result<(), WatermarkError> {
        let mut args: Vec<OsString> = self.leading_args.iter().map(OsString::from).collect();
        args.extend(spec.args(image));

        let output = self.runner.run(self.program, &args)?;
        if !output.success {
            return Err(WatermarkError::Failed {
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        if !output.stderr.trim().is_empty() {
            return Err(WatermarkError::Stderr(output.stderr.trim().to_string()));
        }
        Ok(())
    }

    /// Run the chain in declaration order, stopping at the first failure.
    /// Returns the number of steps applied.
    pub fn apply(
        &self,
        image: &Path,
        steps: &[(&str, &WatermarkSpec)],
    ) -> Result<usize, WatermarkError> {
        for (index, (name, spec)) in steps.iter().enumerate() {
            self.apply_one(image, spec)
                .map_err(|source| WatermarkError::Step {
                    index,
                    name: name.to_string(),
                    source: Box::new(source),
                })?;
            debug!(image = %image.display(), watermark = name, "watermark applied");
        }
        Ok(steps.len())
    }
}
