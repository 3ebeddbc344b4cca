//! Shared types used across all pipeline stages.
//!
//! A [`PhotoRecord`] is produced by the metadata stage, read by the criteria
//! engine and the generation stage, and serialized into the exported index.
//! Its open-ended metadata lives in a field dictionary keyed by the canonical
//! export names (`model`, `tags`, `authorrating`, ...), each holding a
//! [`FieldValue`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// The metadata index: photo id → record. Ordered so iteration (and therefore
/// selection output and the exported file) is deterministic.
pub type MetadataIndex = BTreeMap<String, PhotoRecord>;

/// A single metadata value: numeric or text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Equality used by the criteria engine.
    ///
    /// Numbers compare numerically. A number and a text compare numerically
    /// when the text parses as a number. Two texts compare exactly.
    pub fn loosely_eq(&self, other: &Scalar) -> bool {
        match (self, other) {
            (Scalar::Number(a), Scalar::Number(b)) => a == b,
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            (Scalar::Number(n), Scalar::Text(t)) | (Scalar::Text(t), Scalar::Number(n)) => {
                t.trim().parse::<f64>().is_ok_and(|parsed| parsed == *n)
            }
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Text(t) => f.write_str(t),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Scalar::Number(value as f64)
    }
}

/// A field value: one scalar, or an ordered list of scalars.
///
/// Used both for record fields and for criterion values. Repeated XMP
/// values accumulate from `One` into `Many` in encounter order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl FieldValue {
    /// View the value as a slice regardless of arity.
    pub fn as_slice(&self) -> &[Scalar] {
        match self {
            FieldValue::One(s) => std::slice::from_ref(s),
            FieldValue::Many(v) => v,
        }
    }

    /// Add a further occurrence: scalar → 2-element list → appended list.
    pub fn accumulate(self, next: Scalar) -> FieldValue {
        match self {
            FieldValue::One(first) => FieldValue::Many(vec![first, next]),
            FieldValue::Many(mut values) => {
                values.push(next);
                FieldValue::Many(values)
            }
        }
    }
}

impl From<Scalar> for FieldValue {
    fn from(value: Scalar) -> Self {
        FieldValue::One(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::One(value.into())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::One(value.into())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::One(value.into())
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::One(value.into())
    }
}

impl From<Vec<Scalar>> for FieldValue {
    fn from(values: Vec<Scalar>) -> Self {
        FieldValue::Many(values)
    }
}

/// Derived landscape/portrait flag. Serialized as `L` / `P`.
///
/// Square images count as portrait: landscape requires width > height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    #[serde(rename = "L")]
    Landscape,
    #[serde(rename = "P")]
    Portrait,
}

impl Orientation {
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        if width > height {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Orientation::Landscape => "L",
            Orientation::Portrait => "P",
        }
    }
}

/// Everything known about one source photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Stable identity: the filename stem.
    pub id: String,
    /// Full path of the source file (attached by the orchestrator).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<PathBuf>,
    /// Source directory relative to the base path (attached by the orchestrator).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Lower-cased source extension without the dot.
    #[serde(rename = "type")]
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filecreation: Option<DateTime<Utc>>,
    /// Instant the record was produced (attached by the orchestrator).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastscrap: Option<DateTime<Utc>>,
    /// Camera, rights, location and free-form fields keyed by export name.
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl PhotoRecord {
    pub fn new(id: impl Into<String>, file_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            filename: None,
            path: None,
            file_type: file_type.into(),
            width: None,
            height: None,
            orientation: None,
            filecreation: None,
            lastscrap: None,
            fields: BTreeMap::new(),
        }
    }

    /// Look up a field by export name, including the fixed file facts that
    /// criteria may address (`type`, `orientation`, `width`, `height`).
    pub fn get(&self, key: &str) -> Option<FieldValue> {
        match key {
            "id" => Some(FieldValue::from(self.id.as_str())),
            "type" => Some(FieldValue::from(self.file_type.as_str())),
            "orientation" => self.orientation.map(|o| FieldValue::from(o.code())),
            "width" => self.width.map(FieldValue::from),
            "height" => self.height.map(FieldValue::from),
            other => self.fields.get(other).cloned(),
        }
    }

    /// Builder-style field setter, mostly for tests and fixtures.
    pub fn with_field(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}
