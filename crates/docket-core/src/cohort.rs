//! Cohort statistics: how similar closed cases turned out.
//!
//! This module holds the pure half of the engine: eligibility, cohort
//! keys, the server-side filter expression, client-side cohort filtering
//! and aggregation. Fetching and caching live in `docket-runtime`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::dates::parse_iso;
use crate::record::RawRecord;
use crate::stage::StageId;

/// Number of raw disposition strings reported.
pub const TOP_RAW_DISPOSITIONS: usize = 8;

/// Start-date fields for time-to-disposition, in preference order.
pub const START_DATE_FIELDS: [&str; 4] = [
    "received_date",
    "arrest_date",
    "incident_begin_date",
    "arraignment_date",
];

pub const UNSUPPORTED_STAGE_REASON: &str =
    "Stats are currently supported only for post-arraignment stages.";

pub const MISSING_STAGE_REASON: &str = "Missing stage_id";

pub const RATE_LIMIT_HINT: &str =
    "Public data portals sometimes rate-limit or stall. Try again in a moment.";

/// Coarse outcome category. Variant order is the matching priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeBucket {
    DismissedOrNolle,
    Acquitted,
    Convicted,
    Plea,
    OtherOrUnknown,
}

impl OutcomeBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeBucket::DismissedOrNolle => "dismissed_or_nolle",
            OutcomeBucket::Acquitted => "acquitted",
            OutcomeBucket::Convicted => "convicted",
            OutcomeBucket::Plea => "plea",
            OutcomeBucket::OtherOrUnknown => "other_or_unknown",
        }
    }
}

const BUCKET_NEEDLES: &[(OutcomeBucket, &[&str])] = &[
    (
        OutcomeBucket::DismissedOrNolle,
        &["nolle", "nol pros", "dismiss", "stricken"],
    ),
    (OutcomeBucket::Acquitted, &["not guilty", "acquit"]),
    (OutcomeBucket::Convicted, &["guilty", "convict", "judgment"]),
    (OutcomeBucket::Plea, &["plea"]),
];

/// Map disposition text to its bucket. Case-insensitive; first match wins.
pub fn map_outcome_bucket(disposition: Option<&str>) -> OutcomeBucket {
    let text = normalize(disposition);
    if text.is_empty() {
        return OutcomeBucket::OtherOrUnknown;
    }

    BUCKET_NEEDLES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| text.contains(n)))
        .map(|(bucket, _)| *bucket)
        .unwrap_or(OutcomeBucket::OtherOrUnknown)
}

fn normalize(s: Option<&str>) -> String {
    s.unwrap_or_default().trim().to_lowercase()
}

/// A request for statistics about cases like the user's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortQuery {
    pub stage_id: StageId,
    /// Lowercased and trimmed; `None` when not given.
    pub offense_category: Option<String>,
    /// Trimmed; `None` when not given.
    pub charge_class: Option<String>,
}

/// Cache key: `(stage_id, offense or "", class or "")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CohortKey {
    pub stage_id: StageId,
    pub offense_category: String,
    pub charge_class: String,
}

impl CohortQuery {
    pub fn new(stage_id: StageId, offense_category: Option<&str>, charge_class: Option<&str>) -> Self {
        let offense = normalize(offense_category);
        let class = charge_class.unwrap_or_default().trim().to_string();
        Self {
            stage_id,
            offense_category: (!offense.is_empty()).then_some(offense),
            charge_class: (!class.is_empty()).then_some(class),
        }
    }

    pub fn key(&self) -> CohortKey {
        CohortKey {
            stage_id: self.stage_id,
            offense_category: self.offense_category.clone().unwrap_or_default(),
            charge_class: self.charge_class.clone().unwrap_or_default(),
        }
    }

    pub fn definition(&self) -> CohortDefinition {
        CohortDefinition {
            closed_only: true,
            user_stage_id: self.stage_id,
            require_reached_same_stage: true,
            offense_category: self.offense_category.clone(),
            disposition_charged_class: self.charge_class.clone(),
        }
    }

    /// Server-side filter expression for the disposition endpoint.
    pub fn where_clause(&self) -> String {
        let mut clauses = vec![
            "disposition_date IS NOT NULL".to_string(),
            "arraignment_date IS NOT NULL".to_string(),
        ];
        if let Some(offense) = &self.offense_category {
            let o = escape_literal(offense);
            clauses.push(format!(
                "(lower(offense_category) = lower('{o}') OR lower(updated_offense_category) = lower('{o}'))"
            ));
        }
        if let Some(class) = &self.charge_class {
            clauses.push(format!(
                "disposition_charged_class = '{}'",
                escape_literal(class)
            ));
        }
        clauses.join(" AND ")
    }

    /// Client-side re-check of the cohort rules.
    pub fn matches(&self, row: &RawRecord) -> bool {
        if !row.has("disposition_date") {
            return false;
        }

        if let Some(offense) = &self.offense_category {
            let category = normalize(row.text("offense_category").as_deref());
            let updated = normalize(row.text("updated_offense_category").as_deref());
            if category != *offense && updated != *offense {
                return false;
            }
        }

        if let Some(class) = &self.charge_class {
            let row_class = row.text("disposition_charged_class").unwrap_or_default();
            if row_class.trim() != class {
                return false;
            }
        }

        reached_stage(row, self.stage_id)
    }
}

fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Did this row get at least as far as `stage_id`?
///
/// Only the two post-arraignment stages are modeled, and both just need a
/// recorded arraignment date.
pub fn reached_stage(row: &RawRecord, stage_id: StageId) -> bool {
    match stage_id {
        StageId::PostArraignmentEarlyPretrial | StageId::PostArraignmentPretrial => {
            row.has("arraignment_date")
        }
        _ => false,
    }
}

/// Keep the rows that belong to the cohort.
pub fn filter_similar_closed_rows<'a>(rows: &'a [RawRecord], query: &CohortQuery) -> Vec<&'a RawRecord> {
    rows.iter().filter(|row| query.matches(row)).collect()
}

/// Days from the preferred start date to disposition; `None` when either
/// side is missing or the result is negative.
pub fn time_to_disposition_days(row: &RawRecord) -> Option<i64> {
    let disposed = parse_iso(&row.text("disposition_date")?)?;
    let start = START_DATE_FIELDS
        .iter()
        .find_map(|k| row.text(k).as_deref().and_then(parse_iso))?;

    if disposed < start {
        return None;
    }
    Some((disposed - start).num_days())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortDefinition {
    pub closed_only: bool,
    pub user_stage_id: StageId,
    pub require_reached_same_stage: bool,
    pub offense_category: Option<String>,
    pub disposition_charged_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDispositionCount {
    pub label: String,
    pub count: usize,
}

/// Nearest-rank quartiles of the time-to-disposition sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationQuantiles {
    pub n: usize,
    pub p25: Option<i64>,
    pub median: Option<i64>,
    pub p75: Option<i64>,
}

impl DurationQuantiles {
    pub fn from_days(mut days: Vec<i64>) -> Self {
        days.sort_unstable();
        Self {
            n: days.len(),
            p25: nearest_rank(&days, 0.25),
            median: nearest_rank(&days, 0.50),
            p75: nearest_rank(&days, 0.75),
        }
    }
}

/// `sorted[round(p * (n - 1))]`, rounding half to even.
fn nearest_rank(sorted: &[i64], p: f64) -> Option<i64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = (p * (sorted.len() - 1) as f64).round_ties_even() as usize;
    sorted.get(idx.min(sorted.len() - 1)).copied()
}

/// Aggregated outcome statistics for one cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortStats {
    pub cohort_definition: CohortDefinition,
    pub sample_size: usize,
    pub outcomes_pct: BTreeMap<OutcomeBucket, f64>,
    pub outcomes_counts: BTreeMap<OutcomeBucket, usize>,
    pub top_raw_dispositions: Vec<RawDispositionCount>,
    pub time_to_disposition_days: DurationQuantiles,
}

/// Why statistics were not computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSkipped {
    pub skipped: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_stage_id: Option<String>,
}

/// Either computed statistics or a skip marker. Never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComparisonStats {
    Computed(CohortStats),
    Skipped(StatsSkipped),
}

impl ComparisonStats {
    pub fn skipped(reason: impl Into<String>) -> Self {
        ComparisonStats::Skipped(StatsSkipped {
            skipped: true,
            reason: reason.into(),
            hint: None,
            user_stage_id: None,
        })
    }

    pub fn unsupported_stage(user_stage_id: &str) -> Self {
        ComparisonStats::Skipped(StatsSkipped {
            skipped: true,
            reason: UNSUPPORTED_STAGE_REASON.to_string(),
            hint: None,
            user_stage_id: Some(user_stage_id.to_string()),
        })
    }

    pub fn endpoint_error(detail: impl std::fmt::Display) -> Self {
        ComparisonStats::Skipped(StatsSkipped {
            skipped: true,
            reason: format!("Dispositions endpoint error: {}", detail),
            hint: Some(RATE_LIMIT_HINT.to_string()),
            user_stage_id: None,
        })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ComparisonStats::Skipped(_))
    }

    pub fn sample_size(&self) -> Option<usize> {
        match self {
            ComparisonStats::Computed(stats) => Some(stats.sample_size),
            ComparisonStats::Skipped(_) => None,
        }
    }
}

/// Eligibility check. Returns the parsed stage or the skip result.
pub fn check_eligibility(stage_id: Option<&str>) -> Result<StageId, ComparisonStats> {
    let raw = match stage_id.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => return Err(ComparisonStats::skipped(MISSING_STAGE_REASON)),
    };

    match raw.parse::<StageId>() {
        Ok(id) if id.supports_cohort_stats() => Ok(id),
        _ => Err(ComparisonStats::unsupported_stage(raw)),
    }
}

/// Filter `rows` to the cohort and aggregate.
pub fn compute_comparison_stats(rows: &[RawRecord], query: &CohortQuery) -> CohortStats {
    let cohort = filter_similar_closed_rows(rows, query);
    let total = cohort.len();

    let mut outcomes_counts: BTreeMap<OutcomeBucket, usize> = BTreeMap::new();
    let mut raw_counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut durations = Vec::new();

    for (order, row) in cohort.iter().enumerate() {
        let disposition = row.text("charge_disposition");
        *outcomes_counts
            .entry(map_outcome_bucket(disposition.as_deref()))
            .or_insert(0) += 1;

        let mut label = normalize(disposition.as_deref());
        if label.is_empty() {
            label = "unknown".to_string();
        }
        raw_counts.entry(label).or_insert((0, order)).0 += 1;

        if let Some(days) = time_to_disposition_days(row) {
            durations.push(days);
        }
    }

    let outcomes_pct = if total == 0 {
        BTreeMap::new()
    } else {
        outcomes_counts
            .iter()
            .map(|(bucket, count)| (*bucket, round1(*count as f64 / total as f64 * 100.0)))
            .collect()
    };

    let mut ranked: Vec<(String, usize, usize)> = raw_counts
        .into_iter()
        .map(|(label, (count, first_seen))| (label, count, first_seen))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    CohortStats {
        cohort_definition: query.definition(),
        sample_size: total,
        outcomes_pct,
        outcomes_counts,
        top_raw_dispositions: ranked
            .into_iter()
            .take(TOP_RAW_DISPOSITIONS)
            .map(|(label, count, _)| RawDispositionCount { label, count })
            .collect(),
        time_to_disposition_days: DurationQuantiles::from_days(durations),
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
