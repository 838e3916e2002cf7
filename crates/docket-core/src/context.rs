//! Context pack builder.
//!
//! Turns a [`CaseRecord`] into the structured, display-ready payload the
//! explainer works from. Dates are rendered for people (`Dec 17, 2014`),
//! missing values use the [`NOT_AVAILABLE`] sentinel, and the matching
//! stage card is always attached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cohort::ComparisonStats;
use crate::dates::{format_display, format_money, parse_iso};
use crate::record::{CaseRecord, RawRecord, NOT_AVAILABLE};
use crate::stage::{infer_stage_at, StageResult};
use crate::stage_card::{stage_card_for, StageCard};
use crate::timeline::TimelinePayload;

/// Fields checked for the "not available" sentinel, in report order.
pub const TRACKED_MISSING_FIELDS: [&str; 4] = [
    "arraignment_date",
    "felony_review_result",
    "bond_type",
    "bond_amount",
];

const BOND_EXPLANATIONS: &[(&[&str], &str)] = &[
    (
        &["D Bond", "D-Bond"],
        "D-Bond = 10% deposit bond. Defendant pays 10% of bond amount to be released.",
    ),
    (
        &["I Bond", "I-Bond"],
        "I-Bond = Individual Recognizance. Released on promise to appear.",
    ),
    (
        &["No Bail"],
        "No Bail = Held without bond, cannot be released.",
    ),
];

const SENTENCE_EXPLANATIONS: &[(&str, &str)] = &[
    ("Prison", "Prison = Illinois Department of Corrections (state prison)."),
    ("Jail", "Jail = County jail (typically less than 1 year)."),
    ("Probation", "Probation = Supervised release with conditions."),
    (
        "Conditional Discharge",
        "Conditional Discharge = Released with conditions, no probation officer.",
    ),
];

/// Charge details from the primary record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub offense_category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_offense_category: Option<String>,
    pub charge_title: String,
    pub class: String,
    pub statute: String,
}

/// Key case dates, formatted for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub incident_date: String,
    pub arrest_date: String,
    pub received_date: String,
    pub felony_review_date: String,
    pub felony_review_result: String,
    pub arraignment_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposition_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentence_date: Option<String>,
    /// Whole days since arraignment; `None` when unknown or in the future.
    pub days_since_arraignment: Option<i64>,
}

impl Timeline {
    /// Timeline entries as `(key, value)` pairs in a fixed order.
    pub fn fields(&self) -> Vec<(String, Value)> {
        let mut out = vec![
            ("incident_date", Value::from(self.incident_date.clone())),
            ("arrest_date", Value::from(self.arrest_date.clone())),
            ("received_date", Value::from(self.received_date.clone())),
            ("felony_review_date", Value::from(self.felony_review_date.clone())),
            (
                "felony_review_result",
                Value::from(self.felony_review_result.clone()),
            ),
            ("arraignment_date", Value::from(self.arraignment_date.clone())),
        ];
        if let Some(d) = &self.disposition_date {
            out.push(("disposition_date", Value::from(d.clone())));
        }
        if let Some(d) = &self.sentence_date {
            out.push(("sentence_date", Value::from(d.clone())));
        }
        out.push((
            "days_since_arraignment",
            self.days_since_arraignment.map(Value::from).unwrap_or(Value::Null),
        ));

        out.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }
}

/// Current bond, if the record has one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bond {
    pub bond_type: String,
    pub bond_amount: String,
    pub bond_date: String,
    pub bond_explanation: Option<String>,
}

/// How the case was resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispositionInfo {
    pub disposition_type: String,
    pub disposition_date: String,
    pub explanation: Option<String>,
}

/// Sentence imposed, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentencingInfo {
    pub sentence_type: String,
    pub commitment_term: String,
    pub commitment_unit: String,
    pub sentence_date: String,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub case_id: String,
    pub participant_id: String,
    pub charge: Charge,
    pub timeline: Timeline,
    pub bond: Bond,
    pub disposition: Option<DispositionInfo>,
    pub sentencing: Option<SentencingInfo>,
    pub missing_fields: Vec<String>,
}

/// Guardrails the explainer must honor. Always all true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyFlags {
    pub no_legal_advice: bool,
    pub do_not_speculate: bool,
    pub no_outcome_predictions: bool,
}

impl Default for SafetyFlags {
    fn default() -> Self {
        Self {
            no_legal_advice: true,
            do_not_speculate: true,
            no_outcome_predictions: true,
        }
    }
}

/// Everything the explainer knows about one case.
///
/// The trailing optional fields are attached per request by the
/// conversational layer and are absent from a freshly built pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPack {
    pub case_summary: CaseSummary,
    pub stage: StageResult,
    pub stage_card: StageCard,
    pub safety: SafetyFlags,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison_stats: Option<ComparisonStats>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_timeline: Option<TimelinePayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_history: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_case_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_user_message: Option<String>,
}

impl ContextPack {
    /// Offense category and charge class to use for a cohort query.
    ///
    /// Prefers the updated offense category only when the original is absent.
    pub fn cohort_keys(&self) -> (Option<String>, Option<String>) {
        let charge = &self.case_summary.charge;
        let offense = available(&charge.offense_category)
            .or_else(|| charge.updated_offense_category.clone());
        (offense, available(&charge.class))
    }
}

fn available(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() || t == NOT_AVAILABLE {
        None
    } else {
        Some(s.to_string())
    }
}

fn field_or_na(record: &RawRecord, key: &str) -> String {
    record.text(key).unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Build a context pack, using the wall clock for day counts.
pub fn build_context_pack(record: &CaseRecord) -> ContextPack {
    build_context_pack_at(record, Utc::now())
}

/// Build a context pack against a fixed "now".
pub fn build_context_pack_at(record: &CaseRecord, now: DateTime<Utc>) -> ContextPack {
    let empty = RawRecord::new();
    let primary = record.primary().unwrap_or(&empty);

    let charge = Charge {
        offense_category: field_or_na(primary, "offense_category"),
        updated_offense_category: primary.text("updated_offense_category"),
        charge_title: field_or_na(primary, "charge_offense_title"),
        class: field_or_na(primary, "class"),
        statute: statute(primary),
    };

    let arraignment_raw = primary.text("arraignment_date");
    let days_since_arraignment = arraignment_raw
        .as_deref()
        .and_then(parse_iso)
        .filter(|arraigned| *arraigned <= now)
        .map(|arraigned| (now - arraigned).num_days());

    let disposition = record.disposition.as_ref().map(build_disposition);
    let sentencing = record.sentencing.as_ref().map(build_sentencing);

    let timeline = Timeline {
        incident_date: format_display(primary.text("incident_begin_date").as_deref()),
        arrest_date: format_display(primary.text("arrest_date").as_deref()),
        received_date: format_display(primary.text("received_date").as_deref()),
        felony_review_date: format_display(primary.text("felony_review_date").as_deref()),
        felony_review_result: field_or_na(primary, "felony_review_result"),
        arraignment_date: format_display(arraignment_raw.as_deref()),
        disposition_date: disposition
            .as_ref()
            .map(|d| d.disposition_date.clone())
            .filter(|d| d != NOT_AVAILABLE),
        sentence_date: sentencing
            .as_ref()
            .map(|s| s.sentence_date.clone())
            .filter(|d| d != NOT_AVAILABLE),
        days_since_arraignment,
    };

    let bond_type = primary.text("bond_type_current");
    let bond = Bond {
        bond_explanation: bond_type.as_deref().and_then(bond_explanation),
        bond_type: bond_type.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        bond_amount: format_money(primary.text("bond_amount_current").as_deref()),
        bond_date: format_display(primary.text("bond_date_current").as_deref()),
    };

    let missing_fields = TRACKED_MISSING_FIELDS
        .iter()
        .filter(|field| match **field {
            "arraignment_date" => arraignment_raw.is_none(),
            "felony_review_result" => timeline.felony_review_result == NOT_AVAILABLE,
            "bond_type" => bond.bond_type == NOT_AVAILABLE,
            "bond_amount" => bond.bond_amount == NOT_AVAILABLE,
            _ => false,
        })
        .map(|field| field.to_string())
        .collect();

    let stage = infer_stage_at(record, now);
    let stage_card = stage_card_for(stage.stage_id);

    ContextPack {
        case_summary: CaseSummary {
            case_id: field_or_na(primary, "case_id"),
            participant_id: field_or_na(primary, "case_participant_id"),
            charge,
            timeline,
            bond,
            disposition,
            sentencing,
            missing_fields,
        },
        stage,
        stage_card,
        safety: SafetyFlags::default(),
        comparison_stats: None,
        ui_timeline: None,
        chat_history: None,
        active_case_id: None,
        latest_user_message: None,
    }
}

fn statute(primary: &RawRecord) -> String {
    let parts: Vec<String> = ["chapter", "act", "section"]
        .iter()
        .map(|k| primary.text(k).unwrap_or_default())
        .collect();
    if parts.iter().all(|p| p.is_empty()) {
        NOT_AVAILABLE.to_string()
    } else {
        parts.join("/")
    }
}

fn build_disposition(disp: &RawRecord) -> DispositionInfo {
    let disposition_type = disp.text("charge_disposition");
    DispositionInfo {
        explanation: disposition_type
            .as_deref()
            .and_then(disposition_explanation)
            .map(str::to_string),
        disposition_type: disposition_type.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        disposition_date: format_display(disp.text("disposition_date").as_deref()),
    }
}

fn build_sentencing(sent: &RawRecord) -> SentencingInfo {
    let sentence_type = sent.text("sentence_type");
    SentencingInfo {
        explanation: sentence_type
            .as_deref()
            .and_then(sentence_explanation)
            .map(str::to_string),
        sentence_type: sentence_type.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        commitment_term: field_or_na(sent, "commitment_term"),
        commitment_unit: field_or_na(sent, "commitment_unit"),
        sentence_date: format_display(sent.text("sentence_date").as_deref()),
    }
}

/// Plain-language gloss for a bond type, matched case-sensitively.
pub fn bond_explanation(bond_type: &str) -> Option<String> {
    BOND_EXPLANATIONS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| bond_type.contains(n)))
        .map(|(_, text)| text.to_string())
}

/// Plain-language gloss for a disposition, first match wins.
pub fn disposition_explanation(disposition: &str) -> Option<&'static str> {
    let has = |s: &str| disposition.contains(s);

    if has("Plea") && has("Guilty") {
        Some("Defendant pleaded guilty (plea deal, no trial).")
    } else if has("Finding") && has("Guilty") {
        Some("Defendant found guilty at trial.")
    } else if has("Finding") && has("Not Guilty") {
        // Shadowed by the guilty-finding branch above.
        Some("Defendant found not guilty (acquitted).")
    } else if has("Nolle Prosequi") || has("Nol Pros") {
        Some("State's Attorney dropped charges (dismissed).")
    } else {
        None
    }
}

/// Plain-language gloss for a sentence type, first match wins.
pub fn sentence_explanation(sentence_type: &str) -> Option<&'static str> {
    SENTENCE_EXPLANATIONS
        .iter()
        .find(|(needle, _)| sentence_type.contains(needle))
        .map(|(_, text)| *text)
}
