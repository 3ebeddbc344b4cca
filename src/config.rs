//! Pack configuration.
//!
//! Loaded from a JSON document, or from TOML when the file ends in `.toml`.
//! Relative paths resolve against `basepath`; a relative `basepath` resolves
//! against the directory holding the config file.
//!
//! ## Example
//!
//! ```json
//! {
//!   "basepath": "/photos/2024",
//!   "originaldir": "originals",
//!   "outputdir": "packs",
//!   "readedfiles": ["jpg", "jpeg"],
//!   "packs": {
//!     "events": { "criteria": [{ "key": "tags", "value": "event" }] }
//!   },
//!   "formats": {
//!     "web":   { "profile": "web", "watermarks": ["logo"] },
//!     "print": { "maxWidth": 4000, "quality": 95,
//!                "criteria": [{ "key": "rating", "value": [4, 5] }],
//!                "criterialogic": "AND" }
//!   },
//!   "watermarks": {
//!     "logo": { "img": "logo.png", "gravity": "southeast", "x": 20, "y": 20, "dissolve": 40 }
//!   },
//!   "imageToolPath": "magick"
//! }
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::criteria::{Criterion, Logic, is_known_key};
use crate::imaging::{Profile, Quality, VersionSpec, named_profile, supported_input_extensions};
use crate::watermark::{WatermarkSource, WatermarkSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// The whole run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackConfig {
    /// Root every other relative path hangs off.
    #[serde(default)]
    pub basepath: PathBuf,
    /// Source photos, relative to `basepath`.
    #[serde(default)]
    pub originaldir: PathBuf,
    /// Pack output tree, relative to `basepath`.
    #[serde(default)]
    pub outputdir: PathBuf,
    /// Metadata index file name, written under `basepath`.
    #[serde(default = "default_exportindex")]
    pub exportindex: String,
    /// Extension allow-list (case-insensitive, without the dot).
    #[serde(default = "default_readedfiles")]
    pub readedfiles: Vec<String>,
    /// Descend into subdirectories of `originaldir`.
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub packs: BTreeMap<String, PackSpec>,
    #[serde(default)]
    pub formats: BTreeMap<String, FormatSpec>,
    #[serde(default)]
    pub watermarks: BTreeMap<String, WatermarkSpec>,
    /// Compositing tool binary.
    #[serde(rename = "imageToolPath", alias = "im", default = "default_tool")]
    pub image_tool_path: PathBuf,
    /// Arguments placed before every watermark invocation.
    #[serde(rename = "imageToolArgs", default)]
    pub image_tool_args: Vec<String>,
    #[serde(rename = "toolTimeoutSecs", default = "default_timeout")]
    pub tool_timeout_secs: u64,
    /// Worker-pool bound. Absent means all cores; larger values are
    /// clamped down to the core count.
    #[serde(rename = "maxProcesses", default)]
    pub max_processes: Option<usize>,
}

fn default_exportindex() -> String {
    "index.json".to_string()
}

fn default_readedfiles() -> Vec<String> {
    vec!["jpg".to_string()]
}

fn default_tool() -> PathBuf {
    PathBuf::from("magick")
}

fn default_timeout() -> u64 {
    120
}

/// A named output bundle and the criteria its photos must meet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackSpec {
    pub criteria: Vec<Criterion>,
    pub criterialogic: Logic,
}

/// A named rendition applied within every pack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatSpec {
    /// Built-in profile name (`web`, `low`, `mob`, `thumb`, `tiny`).
    pub profile: Option<String>,
    #[serde(rename = "maxWidth", alias = "maxwidth", alias = "width")]
    pub max_width: Option<u32>,
    pub quality: Option<u32>,
    /// Watermark names, applied in this order.
    pub watermarks: Vec<String>,
    pub criteria: Vec<Criterion>,
    pub criterialogic: Logic,
}

impl FormatSpec {
    /// The version this format renders, as written.
    pub fn version(&self) -> VersionSpec {
        match &self.profile {
            Some(name) => VersionSpec::Named(name.clone()),
            None => VersionSpec::Explicit(Profile {
                max_width: self.max_width,
                quality: Quality::new(self.quality.unwrap_or(100)),
            }),
        }
    }
}

impl PackConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Structural checks. A config that passes can run without touching
    /// anything it does not describe.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.basepath.as_os_str().is_empty() {
            return Err(ConfigError::Validation("basepath is required".into()));
        }
        if self.packs.is_empty() {
            return Err(ConfigError::Validation(
                "at least one pack must be defined".into(),
            ));
        }
        if self.formats.is_empty() {
            return Err(ConfigError::Validation(
                "at least one format must be defined".into(),
            ));
        }
        if self.readedfiles.is_empty() {
            return Err(ConfigError::Validation(
                "readedfiles must not be empty".into(),
            ));
        }
        if self.tool_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "toolTimeoutSecs must be non-zero".into(),
            ));
        }

        for (name, format) in &self.formats {
            validate_format(name, format, &self.watermarks)?;
        }
        for (name, wm) in &self.watermarks {
            if wm.dissolve > 100 {
                return Err(ConfigError::Validation(format!(
                    "watermarks.{name}.dissolve must be 0-100"
                )));
            }
        }

        let decodable = supported_input_extensions();
        for ext in &self.readedfiles {
            let ext = ext.trim_start_matches('.').to_lowercase();
            if !decodable.contains(&ext.as_str()) {
                warn!(extension = %ext, "no decoder for this extension, its renditions will fail");
            }
        }

        let packs = self.packs.iter().map(|(n, p)| (n, &p.criteria));
        let formats = self.formats.iter().map(|(n, f)| (n, &f.criteria));
        for (owner, criteria) in packs.chain(formats) {
            for c in criteria.iter().filter(|c| !is_known_key(&c.key)) {
                warn!(owner = %owner, key = %c.key, "criterion key is not recognised and will never match");
            }
        }
        Ok(())
    }

    /// Resolve `path` against `basepath` unless it is already absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.basepath.join(path)
        }
    }

    pub fn source_dir(&self) -> PathBuf {
        self.resolve(&self.originaldir)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.outputdir)
    }

    pub fn index_path(&self) -> PathBuf {
        self.basepath.join(&self.exportindex)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// The chain of watermarks a format applies, resolved by name, in order.
    /// Image paths are resolved against `basepath`.
    pub fn watermark_chain(&self, format: &FormatSpec) -> Vec<(String, WatermarkSpec)> {
        format
            .watermarks
            .iter()
            .filter_map(|name| self.watermarks.get(name).map(|wm| (name, wm)))
            .map(|(name, wm)| {
                let mut wm = wm.clone();
                if let WatermarkSource::Image { img } = &mut wm.source {
                    *img = self.resolve(img);
                }
                (name.clone(), wm)
            })
            .collect()
    }

    /// Whether `ext` is on the allow-list.
    pub fn accepts_extension(&self, ext: &str) -> bool {
        self.readedfiles
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

fn validate_format(
    name: &str,
    format: &FormatSpec,
    watermarks: &BTreeMap<String, WatermarkSpec>,
) -> Result<(), ConfigError> {
    if let Some(profile) = &format.profile {
        if format.max_width.is_some() || format.quality.is_some() {
            return Err(ConfigError::Validation(format!(
                "formats.{name}: profile cannot be combined with maxWidth or quality"
            )));
        }
        if named_profile(profile).is_none() {
            return Err(ConfigError::Validation(format!(
                "formats.{name}: unknown profile {profile:?}"
            )));
        }
    }
    if format.quality.is_some_and(|q| q > 100) {
        return Err(ConfigError::Validation(format!(
            "formats.{name}.quality must be 0-100"
        )));
    }
    if format.max_width == Some(0) {
        return Err(ConfigError::Validation(format!(
            "formats.{name}.maxWidth must be non-zero"
        )));
    }
    if let Some(missing) = format.watermarks.iter().find(|w| !watermarks.contains_key(*w)) {
        return Err(ConfigError::Validation(format!(
            "formats.{name}: unknown watermark {missing:?}"
        )));
    }
    Ok(())
}

/// Load, resolve and validate a config file.
pub fn load_config(path: &Path) -> Result<PackConfig, ConfigError> {
    let text = fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    let mut config = if is_toml {
        PackConfig::from_toml(&text)?
    } else {
        PackConfig::from_json(&text)?
    };

    if config.basepath.is_relative() && !config.basepath.as_os_str().is_empty() {
        if let Some(dir) = path.parent() {
            config.basepath = dir.join(&config.basepath);
        }
    }
    config.validate()?;
    Ok(config)
}

/// Resolve the effective thread count.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(max_processes: Option<usize>) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}
