//! Stage classifier: maps a partial case record to a lifecycle stage.
//!
//! The policy is an ordered list of [`StageRule`]s evaluated in fixed
//! priority order. The first rule that returns a result wins, so the most
//! advanced known fact decides the stage:
//!
//! 1. sentencing record present → `CASE_CLOSED`
//! 2. disposition record present → `CASE_CLOSED`
//! 3. initiation record present → arraignment-date branching
//! 4. intake record only → `PENDING_OR_UNKNOWN` (low)
//! 5. nothing at all → `PENDING_OR_UNKNOWN` (low)
//!
//! Classification is total: every record yields one of the five stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::dates::{self, parse_iso};
use crate::record::CaseRecord;

/// Days after arraignment during which a case counts as early pretrial.
pub const EARLY_PRETRIAL_DAYS: i64 = 30;

/// Days after arraignment up to which confidence stays high.
pub const HIGH_CONFIDENCE_DAYS: i64 = 180;

/// The closed set of lifecycle stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageId {
    PreArraignment,
    PostArraignmentEarlyPretrial,
    PostArraignmentPretrial,
    PendingOrUnknown,
    CaseClosed,
}

impl StageId {
    pub const ALL: [StageId; 5] = [
        StageId::PreArraignment,
        StageId::PostArraignmentEarlyPretrial,
        StageId::PostArraignmentPretrial,
        StageId::PendingOrUnknown,
        StageId::CaseClosed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::PreArraignment => "PRE_ARRAIGNMENT",
            StageId::PostArraignmentEarlyPretrial => "POST_ARRAIGNMENT_EARLY_PRETRIAL",
            StageId::PostArraignmentPretrial => "POST_ARRAIGNMENT_PRETRIAL",
            StageId::PendingOrUnknown => "PENDING_OR_UNKNOWN",
            StageId::CaseClosed => "CASE_CLOSED",
        }
    }

    /// Stages for which cohort statistics are supported.
    pub fn supports_cohort_stats(&self) -> bool {
        matches!(
            self,
            StageId::PostArraignmentEarlyPretrial | StageId::PostArraignmentPretrial
        )
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageId::ALL
            .into_iter()
            .find(|id| id.as_str() == s.trim())
            .ok_or_else(|| format!("unknown stage id: {}", s))
    }
}

/// How well-supported a stage inference is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

/// Output of the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: StageId,
    pub stage_label: String,
    pub confidence: Confidence,
    pub reasons: Vec<String>,
}

impl StageResult {
    fn new(stage_id: StageId, label: &str, confidence: Confidence, reasons: &[&str]) -> Self {
        Self {
            stage_id,
            stage_label: label.to_string(),
            confidence,
            reasons: reasons.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// A single rule in the classification policy.
///
/// `evaluate` returns `None` when the rule does not apply, letting the next
/// rule in priority order run.
#[derive(Clone, Copy)]
pub struct StageRule {
    pub name: &'static str,
    pub evaluate: fn(&CaseRecord, DateTime<Utc>) -> Option<StageResult>,
}

impl fmt::Debug for StageRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRule").field("name", &self.name).finish()
    }
}

/// Sentencing record present.
pub fn sentencing_rule(record: &CaseRecord, _now: DateTime<Utc>) -> Option<StageResult> {
    record.sentencing.as_ref()?;
    Some(StageResult::new(
        StageId::CaseClosed,
        "Sentencing Complete",
        Confidence::High,
        &["Sentencing record present", "Case fully resolved"],
    ))
}

/// Disposition record present.
pub fn disposition_rule(record: &CaseRecord, _now: DateTime<Utc>) -> Option<StageResult> {
    record.disposition.as_ref()?;
    Some(StageResult::new(
        StageId::CaseClosed,
        "Case Closed - Disposition Recorded",
        Confidence::High,
        &["Disposition record present", "Case resolved"],
    ))
}

/// Initiation record present: branch on the arraignment date.
///
/// Confidence is high up to 180 days after arraignment and medium after
/// that. Below 30 days that check always yields high.
pub fn initiation_rule(record: &CaseRecord, now: DateTime<Utc>) -> Option<StageResult> {
    let initiation = record.initiation.as_ref()?;
    let mut reasons = Vec::new();

    match initiation.text("arraignment_date") {
        Some(raw) => match parse_iso(&raw) {
            Some(arraigned) => {
                if arraigned > now {
                    return Some(StageResult {
                        stage_id: StageId::PreArraignment,
                        stage_label: "Pre-Arraignment".to_string(),
                        confidence: Confidence::High,
                        reasons: vec![
                            format!(
                                "Arraignment scheduled for {}",
                                dates::format_display(Some(&raw))
                            ),
                            "Arraignment has not occurred yet".to_string(),
                        ],
                    });
                }

                let days_since = (now - arraigned).num_days();
                let confidence = if days_since <= HIGH_CONFIDENCE_DAYS {
                    Confidence::High
                } else {
                    Confidence::Medium
                };
                let (stage_id, label) = if days_since < EARLY_PRETRIAL_DAYS {
                    (StageId::PostArraignmentEarlyPretrial, "Early Pre-Trial")
                } else {
                    (StageId::PostArraignmentPretrial, "Pretrial (post-arraignment)")
                };

                return Some(StageResult::new(
                    stage_id,
                    label,
                    confidence,
                    &[
                        "Arraignment date is present in the dataset",
                        "No disposition is recorded in this dataset",
                    ],
                ));
            }
            None => reasons.push("Arraignment date present but unparseable".to_string()),
        },
        None => {
            reasons.push("Arraignment date not present in dataset".to_string());
            reasons.push(
                "Charges are listed in the record, but key event dates are missing so the stage is unclear"
                    .to_string(),
            );
        }
    }

    Some(StageResult {
        stage_id: StageId::PendingOrUnknown,
        stage_label: "Stage Unclear".to_string(),
        confidence: Confidence::Medium,
        reasons,
    })
}

/// Only an intake record.
pub fn intake_rule(record: &CaseRecord, _now: DateTime<Utc>) -> Option<StageResult> {
    record.intake.as_ref()?;
    Some(StageResult::new(
        StageId::PendingOrUnknown,
        "Intake Stage Only",
        Confidence::Low,
        &["Only intake data present", "Case may not be formally filed"],
    ))
}

fn insufficient_data() -> StageResult {
    StageResult::new(
        StageId::PendingOrUnknown,
        "Unknown",
        Confidence::Low,
        &["Insufficient data"],
    )
}

/// Catch-all for records with no sub-records.
pub fn insufficient_data_rule(_record: &CaseRecord, _now: DateTime<Utc>) -> Option<StageResult> {
    Some(insufficient_data())
}

/// Ordered, first-match-wins stage policy.
#[derive(Debug, Clone)]
pub struct StageClassifier {
    rules: Vec<StageRule>,
}

impl StageClassifier {
    pub fn new() -> Self {
        Self {
            rules: vec![
                StageRule { name: "sentencing_present", evaluate: sentencing_rule },
                StageRule { name: "disposition_present", evaluate: disposition_rule },
                StageRule { name: "initiation_arraignment", evaluate: initiation_rule },
                StageRule { name: "intake_only", evaluate: intake_rule },
                StageRule { name: "insufficient_data", evaluate: insufficient_data_rule },
            ],
        }
    }

    /// The rules in priority order.
    pub fn rules(&self) -> &[StageRule] {
        &self.rules
    }

    /// Classify against the current wall clock.
    pub fn classify(&self, record: &CaseRecord) -> StageResult {
        self.classify_at(record, Utc::now())
    }

    /// Classify against an explicit "now".
    pub fn classify_at(&self, record: &CaseRecord, now: DateTime<Utc>) -> StageResult {
        for rule in &self.rules {
            if let Some(result) = (rule.evaluate)(record, now) {
                debug!(
                    rule = rule.name,
                    stage = %result.stage_id,
                    confidence = result.confidence.as_str(),
                    "stage rule matched"
                );
                return result;
            }
        }

        insufficient_data()
    }
}

impl Default for StageClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Infer the stage of a case using the default policy.
pub fn infer_stage(record: &CaseRecord) -> StageResult {
    StageClassifier::new().classify(record)
}

/// Infer the stage of a case relative to `now`.
pub fn infer_stage_at(record: &CaseRecord, now: DateTime<Utc>) -> StageResult {
    StageClassifier::new().classify_at(record, now)
}
