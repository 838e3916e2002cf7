//! Raw case records as returned by the public datasets.
//!
//! A [`CaseRecord`] is a sparse union of up to four sub-records. Whether a
//! sub-record is present at all carries meaning (a disposition row means the
//! case is closed), so each slot is an `Option` and "sub-record present but
//! field absent" stays distinguishable from "sub-record missing".

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Sentinel the datasets (and the rendered context pack) use for "not available".
pub const NOT_AVAILABLE: &str = "N/A";

/// The four public datasets a case can appear in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Intake,
    Initiation,
    Disposition,
    Sentencing,
}

impl Dataset {
    /// All datasets in lookup order.
    pub const ALL: [Dataset; 4] = [
        Dataset::Intake,
        Dataset::Initiation,
        Dataset::Disposition,
        Dataset::Sentencing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Intake => "intake",
            Dataset::Initiation => "initiation",
            Dataset::Disposition => "disposition",
            Dataset::Sentencing => "sentencing",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One untyped dataset row: field name to scalar value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(BTreeMap<String, Value>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from `(field, value)` pairs.
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Field value as text.
    ///
    /// Strings and numbers are returned; null, blank strings and the
    /// [`NOT_AVAILABLE`] sentinel all count as absent.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() || trimmed == NOT_AVAILABLE {
                    None
                } else {
                    Some(s.clone())
                }
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.text(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<BTreeMap<String, Value>> for RawRecord {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

/// Everything the datasets know about one case or participant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intake: Option<RawRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiation: Option<RawRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposition: Option<RawRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentencing: Option<RawRecord>,
}

impl CaseRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter for one sub-record.
    pub fn with(mut self, dataset: Dataset, record: RawRecord) -> Self {
        self.set(dataset, record);
        self
    }

    pub fn set(&mut self, dataset: Dataset, record: RawRecord) {
        let slot = match dataset {
            Dataset::Intake => &mut self.intake,
            Dataset::Initiation => &mut self.initiation,
            Dataset::Disposition => &mut self.disposition,
            Dataset::Sentencing => &mut self.sentencing,
        };
        *slot = Some(record);
    }

    pub fn get(&self, dataset: Dataset) -> Option<&RawRecord> {
        match dataset {
            Dataset::Intake => self.intake.as_ref(),
            Dataset::Initiation => self.initiation.as_ref(),
            Dataset::Disposition => self.disposition.as_ref(),
            Dataset::Sentencing => self.sentencing.as_ref(),
        }
    }

    /// Datasets that contributed a sub-record.
    pub fn present(&self) -> Vec<Dataset> {
        Dataset::ALL
            .into_iter()
            .filter(|d| self.get(*d).is_some())
            .collect()
    }

    /// True when no dataset matched the identifier.
    pub fn is_empty(&self) -> bool {
        self.present().is_empty()
    }

    /// Record used for charge, timeline and bond fields: initiation, then intake.
    pub fn primary(&self) -> Option<&RawRecord> {
        self.initiation.as_ref().or(self.intake.as_ref())
    }
}
