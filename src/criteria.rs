//! Criteria engine: decides which photos go into which (pack, format).
//!
//! A pack and a format each carry an independent [`CriteriaGroup`]: a list
//! of [`Criterion`] plus a combinator. A photo is selected for a pair only
//! when **both** groups match. An empty group imposes no constraint.
//!
//! ## Matching a single criterion
//!
//! | Key kind | Matches when |
//! |---|---|
//! | multi-valued (`tags`) | record list ∩ criterion value ≠ ∅ |
//! | scalar (`authorrating`, `label`, …) | record value equals the value, or any element of a list value |
//! | anything else | never |
//!
//! Comparison is [`Scalar::loosely_eq`]: numbers compare numerically,
//! numeric text compares with numbers, other text compares exactly.
//!
//! Everything here is pure; repeated evaluation gives identical results.

use crate::types::{FieldValue, MetadataIndex, PhotoRecord, Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the criteria of one group combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Logic {
    And,
    #[default]
    Or,
}

impl TryFrom<String> for Logic {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "and" => Ok(Logic::And),
            "or" => Ok(Logic::Or),
            other => Err(format!("criterialogic must be AND or OR, got {other:?}")),
        }
    }
}

impl From<Logic> for String {
    fn from(logic: Logic) -> Self {
        logic.to_string()
    }
}

impl fmt::Display for Logic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Logic::And => "AND",
            Logic::Or => "OR",
        })
    }
}

/// One `{key, value}` test against a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Criterion {
    pub key: String,
    pub value: FieldValue,
}

impl Criterion {
    pub fn new(key: &str, value: impl Into<FieldValue>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Multi,
    Scalar,
}

/// Recognised criteria keys: (key, record field, kind).
const KEYS: &[(&str, &str, KeyKind)] = &[
    ("tags", "tags", KeyKind::Multi),
    ("authorrating", "authorrating", KeyKind::Scalar),
    ("rating", "authorrating", KeyKind::Scalar),
    ("label", "label", KeyKind::Scalar),
    ("orientation", "orientation", KeyKind::Scalar),
    ("type", "type", KeyKind::Scalar),
    ("author", "author", KeyKind::Scalar),
    ("city", "city", KeyKind::Scalar),
    ("state", "state", KeyKind::Scalar),
    ("country", "country", KeyKind::Scalar),
    ("countrycode", "countrycode", KeyKind::Scalar),
    ("model", "model", KeyKind::Scalar),
    ("lens", "lens", KeyKind::Scalar),
];

fn resolve_key(key: &str) -> Option<(&'static str, KeyKind)> {
    KEYS.iter()
        .find(|(k, _, _)| *k == key)
        .map(|&(_, field, kind)| (field, kind))
}

/// Whether `key` is one the engine understands. Unknown keys never match.
pub fn is_known_key(key: &str) -> bool {
    resolve_key(key).is_some()
}

fn any_equal(a: &[Scalar], b: &[Scalar]) -> bool {
    a.iter().any(|x| b.iter().any(|y| x.loosely_eq(y)))
}

/// Test a single criterion against a record.
pub fn matches(record: &PhotoRecord, criterion: &Criterion) -> bool {
    let Some((field, kind)) = resolve_key(&criterion.key) else {
        return false;
    };
    let Some(actual) = record.get(field) else {
        return false;
    };
    let wanted = criterion.value.as_slice();

    match (kind, &actual) {
        (KeyKind::Multi, _) => any_equal(actual.as_slice(), wanted),
        (KeyKind::Scalar, FieldValue::One(value)) => wanted.iter().any(|w| value.loosely_eq(w)),
        // A scalar key whose record value repeated (e.g. two labels): any hit counts.
        (KeyKind::Scalar, FieldValue::Many(values)) => any_equal(values, wanted),
    }
}

/// A borrowed view of one group's criteria and combinator.
#[derive(Debug, Clone, Copy)]
pub struct CriteriaGroup<'a> {
    pub criteria: &'a [Criterion],
    pub logic: Logic,
}

impl<'a> CriteriaGroup<'a> {
    pub fn new(criteria: &'a [Criterion], logic: Logic) -> Self {
        Self { criteria, logic }
    }

    /// Evaluate the group. Empty is vacuously true.
    pub fn matches(&self, record: &PhotoRecord) -> bool {
        if self.criteria.is_empty() {
            return true;
        }
        match self.logic {
            Logic::And => self.criteria.iter().all(|c| matches(record, c)),
            Logic::Or => self.criteria.iter().any(|c| matches(record, c)),
        }
    }
}

/// Final selection for one (pack, format): both groups must match.
pub fn selects(record: &PhotoRecord, pack: CriteriaGroup<'_>, format: CriteriaGroup<'_>) -> bool {
    pack.matches(record) && format.matches(record)
}

/// Ids of all records selected for one (pack, format), in index order.
pub fn select(
    index: &MetadataIndex,
    pack: CriteriaGroup<'_>,
    format: CriteriaGroup<'_>,
) -> Vec<String> {
    index
        .values()
        .filter(|record| selects(record, pack, format))
        .map(|record| record.id.clone())
        .collect()
}
