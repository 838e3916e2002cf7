//! Record search tool.
//!
//! Lets the explainer look things up in a [`ContextPack`] instead of
//! guessing. The pack is flattened into `{source, key, value}` triples and
//! one query type is applied. Absent data yields empty results, never an
//! error, and every list is capped.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cohort::{map_outcome_bucket, OutcomeBucket};
use crate::context::ContextPack;
use crate::dates::{parse_flexible, parse_text};
use crate::record::NOT_AVAILABLE;
use crate::timeline::{event_label, EVENT_LABELS};

pub const MAX_MATCHES: usize = 40;
pub const MAX_FIND_MATCHES: usize = 30;
pub const MAX_FIND_EVENT_MATCHES: usize = 15;
pub const MAX_RESOLUTION_FIELDS: usize = 25;

pub const FIND_IT_NOTE: &str =
    "contains_text is required for find_it (e.g., 'bond', 'arraignment', 'John', 'Markham')";

/// Field names that identify people or institutions on the case.
pub const ACTOR_KEYS: [&str; 7] = [
    "judge",
    "sentence_judge",
    "court_name",
    "court_facility",
    "law_enforcement_agency",
    "prosecutor",
    "defense_attorney",
];

const ACTOR_FALLBACK_NEEDLES: [&str; 3] = ["judge", "court", "agency"];

fn is_date_key(key: &str) -> bool {
    EVENT_LABELS.iter().any(|(k, _)| *k == key)
}

/// Search arguments, as sent by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub after_date: Option<String>,
    #[serde(default)]
    pub before_date: Option<String>,
    #[serde(default)]
    pub contains_text: Option<String>,
}

impl SearchQuery {
    pub fn of_type(query_type: &str) -> Self {
        Self {
            query_type: Some(query_type.to_string()),
            ..Self::default()
        }
    }

    pub fn containing(mut self, text: &str) -> Self {
        self.contains_text = Some(text.to_string());
        self
    }

    pub fn between(mut self, after: Option<&str>, before: Option<&str>) -> Self {
        self.after_date = after.map(str::to_string);
        self.before_date = before.map(str::to_string);
        self
    }

    fn needle(&self) -> Option<&str> {
        self.contains_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryKind {
    All,
    Dates,
    Charges,
    Disposition,
    Bond,
    Stage,
    EventType,
    ChargeLevel,
    Outcome,
    Actors,
    FindIt,
    Unrecognized,
}

impl QueryKind {
    fn parse(raw: &str) -> Self {
        match raw {
            "all" => QueryKind::All,
            "dates" => QueryKind::Dates,
            "charges" => QueryKind::Charges,
            "disposition" => QueryKind::Disposition,
            "bond" => QueryKind::Bond,
            "stage" => QueryKind::Stage,
            "event_type" => QueryKind::EventType,
            "charge_level" => QueryKind::ChargeLevel,
            "outcome" => QueryKind::Outcome,
            "actors" => QueryKind::Actors,
            "find_it" => QueryKind::FindIt,
            _ => QueryKind::Unrecognized,
        }
    }
}

/// One flattened field of the context pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub source: String,
    pub key: String,
    pub value: Value,
}

impl FieldMatch {
    fn value_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn contains(&self, needle: &str) -> bool {
        let n = needle.to_lowercase();
        self.key.to_lowercase().contains(&n) || self.value_text().to_lowercase().contains(&n)
    }
}

/// A dated event derived from the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub key: String,
    pub date_raw: Value,
    pub dt_iso: String,
}

impl Event {
    fn matches(&self, needle: &str) -> bool {
        let n = needle.to_lowercase();
        self.event_type.to_lowercase().contains(&n) || self.key.to_lowercase().contains(&n)
    }
}

/// Severity reading of an Illinois charge class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeLevel {
    pub raw_class: String,
    pub level_label: String,
    /// 1 is most severe; `None` for codes not in the table.
    pub severity_rank: Option<u8>,
}

/// Map a class code (`X`, `1`-`4`, `M`) to a severity rank.
pub fn charge_level(raw_class: Option<&str>) -> ChargeLevel {
    let raw = raw_class
        .filter(|c| *c != NOT_AVAILABLE)
        .unwrap_or_default()
        .to_string();

    let (label, rank) = match raw.trim().to_uppercase().as_str() {
        "X" => ("Felony Class X (very severe)".to_string(), Some(1)),
        "1" => ("Felony Class 1 (severe)".to_string(), Some(2)),
        "2" => ("Felony Class 2".to_string(), Some(3)),
        "3" => ("Felony Class 3".to_string(), Some(4)),
        "4" => ("Felony Class 4".to_string(), Some(5)),
        "M" => ("Misdemeanor (class not specified here)".to_string(), Some(6)),
        _ if raw.is_empty() => ("Unknown / not provided".to_string(), None),
        _ => (format!("Unknown / not provided ({})", raw), None),
    };

    ChargeLevel {
        raw_class: raw,
        level_label: label,
        severity_rank: rank,
    }
}

/// Tool result. Shape depends on the query type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchResult {
    Events {
        query_type: String,
        match_count: usize,
        events: Vec<Event>,
    },
    ChargeLevel {
        query_type: String,
        charge_title: Option<String>,
        offense_category: Option<String>,
        class_info: ChargeLevel,
    },
    Outcome {
        query_type: String,
        disposition_text: Option<String>,
        outcome_bucket: Option<OutcomeBucket>,
        disposition_date: Option<String>,
        resolution_fields: Vec<FieldMatch>,
    },
    FindIt {
        query_type: String,
        match_count: usize,
        matches: Vec<FieldMatch>,
        #[serde(skip_serializing_if = "Option::is_none")]
        event_matches: Option<Vec<Event>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Fields {
        query_type: String,
        match_count: usize,
        matches: Vec<FieldMatch>,
        events: Option<Vec<Event>>,
    },
}

impl SearchResult {
    pub fn match_count(&self) -> Option<usize> {
        match self {
            SearchResult::Events { match_count, .. }
            | SearchResult::FindIt { match_count, .. }
            | SearchResult::Fields { match_count, .. } => Some(*match_count),
            _ => None,
        }
    }
}

fn push_object(out: &mut Vec<FieldMatch>, source: &str, value: Option<Value>) {
    if let Some(Value::Object(map)) = value {
        for (key, value) in map {
            out.push(FieldMatch {
                source: source.to_string(),
                key,
                value,
            });
        }
    }
}

/// Flatten the searchable parts of a pack into `{source, key, value}` triples.
pub fn flatten_pack(pack: &ContextPack) -> Vec<FieldMatch> {
    let summary = &pack.case_summary;
    let mut fields = Vec::new();

    push_object(&mut fields, "charge", serde_json::to_value(&summary.charge).ok());
    for (key, value) in summary.timeline.fields() {
        fields.push(FieldMatch {
            source: "timeline".to_string(),
            key,
            value,
        });
    }
    push_object(&mut fields, "bond", serde_json::to_value(&summary.bond).ok());
    push_object(&mut fields, "stage", serde_json::to_value(&pack.stage).ok());
    push_object(&mut fields, "stage_card", serde_json::to_value(&pack.stage_card).ok());
    if let Some(disposition) = &summary.disposition {
        push_object(&mut fields, "disposition", serde_json::to_value(disposition).ok());
    }

    fields
}

/// Dated events from the timeline, oldest first.
pub fn timeline_events(pack: &ContextPack) -> Vec<Event> {
    let timeline = pack.case_summary.timeline.fields();
    let mut events: Vec<Event> = EVENT_LABELS
        .iter()
        .filter_map(|(key, _)| {
            let (_, value) = timeline.iter().find(|(k, _)| k == key)?;
            let dt = parse_flexible(value)?;
            Some(Event {
                event_type: event_label(key),
                key: key.to_string(),
                date_raw: value.clone(),
                dt_iso: dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            })
        })
        .collect();
    events.sort_by(|a, b| a.dt_iso.cmp(&b.dt_iso));
    events
}

/// Run one search against a context pack.
pub fn search_case_record(pack: &ContextPack, query: &SearchQuery) -> SearchResult {
    let query_type = query
        .query_type
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| "all".to_string());
    let kind = QueryKind::parse(&query_type);

    let fields = flatten_pack(pack);
    let events = timeline_events(pack);

    match kind {
        QueryKind::EventType => {
            let events: Vec<Event> = match query.needle() {
                Some(n) => events.into_iter().filter(|e| e.matches(n)).collect(),
                None => events,
            };
            SearchResult::Events {
                query_type,
                match_count: events.len(),
                events: events.into_iter().take(MAX_MATCHES).collect(),
            }
        }

        QueryKind::ChargeLevel => {
            let charge = &pack.case_summary.charge;
            SearchResult::ChargeLevel {
                query_type,
                charge_title: known(&charge.charge_title),
                offense_category: known(&charge.offense_category),
                class_info: charge_level(Some(&charge.class)),
            }
        }

        QueryKind::Outcome => outcome(pack, query_type, &fields),

        QueryKind::Actors => {
            let mut actors: Vec<FieldMatch> = fields
                .iter()
                .filter(|f| ACTOR_KEYS.contains(&f.key.as_str()))
                .cloned()
                .collect();
            if actors.is_empty() {
                actors = fields
                    .iter()
                    .filter(|f| {
                        let key = f.key.to_lowercase();
                        ACTOR_FALLBACK_NEEDLES.iter().any(|n| key.contains(n))
                    })
                    .cloned()
                    .collect();
            }
            if let Some(n) = query.needle() {
                actors.retain(|f| f.contains(n));
            }
            SearchResult::Fields {
                query_type,
                match_count: actors.len(),
                matches: actors.into_iter().take(MAX_MATCHES).collect(),
                events: None,
            }
        }

        QueryKind::FindIt => {
            let Some(needle) = query.needle() else {
                return SearchResult::FindIt {
                    query_type,
                    match_count: 0,
                    matches: vec![],
                    event_matches: None,
                    note: Some(FIND_IT_NOTE.to_string()),
                };
            };

            let matches: Vec<FieldMatch> = fields.into_iter().filter(|f| f.contains(needle)).collect();
            let event_matches: Vec<Event> = events.into_iter().filter(|e| e.matches(needle)).collect();
            SearchResult::FindIt {
                query_type,
                match_count: matches.len() + event_matches.len(),
                matches: matches.into_iter().take(MAX_FIND_MATCHES).collect(),
                event_matches: Some(event_matches.into_iter().take(MAX_FIND_EVENT_MATCHES).collect()),
                note: None,
            }
        }

        QueryKind::All
        | QueryKind::Dates
        | QueryKind::Charges
        | QueryKind::Disposition
        | QueryKind::Bond
        | QueryKind::Stage
        | QueryKind::Unrecognized => {
            let mut fields: Vec<FieldMatch> = fields
                .into_iter()
                .filter(|f| match kind {
                    QueryKind::Dates => is_date_key(&f.key),
                    QueryKind::Charges => f.source == "charge",
                    QueryKind::Disposition => f.key.to_lowercase().contains("disposition"),
                    QueryKind::Bond => f.source == "bond",
                    QueryKind::Stage => f.source == "stage" || f.source == "stage_card",
                    _ => true,
                })
                .collect();

            let after = query.after_date.as_deref().and_then(parse_text);
            let before = query.before_date.as_deref().and_then(parse_text);
            if after.is_some() || before.is_some() {
                fields.retain(|f| in_range(f, after, before));
            }
            if let Some(n) = query.needle() {
                fields.retain(|f| f.contains(n));
            }

            SearchResult::Fields {
                match_count: fields.len(),
                matches: fields.into_iter().take(MAX_MATCHES).collect(),
                events: (kind == QueryKind::All)
                    .then(|| events.into_iter().take(MAX_MATCHES).collect()),
                query_type,
            }
        }
    }
}

fn in_range(field: &FieldMatch, after: Option<NaiveDateTime>, before: Option<NaiveDateTime>) -> bool {
    if !is_date_key(&field.key) {
        return false;
    }
    let Some(dt) = parse_flexible(&field.value) else {
        return false;
    };
    after.map_or(true, |a| dt >= a) && before.map_or(true, |b| dt <= b)
}

fn outcome(pack: &ContextPack, query_type: String, fields: &[FieldMatch]) -> SearchResult {
    let resolution: Vec<&FieldMatch> = fields
        .iter()
        .filter(|f| f.key.to_lowercase().contains("disposition"))
        .collect();

    let disposition = pack.case_summary.disposition.as_ref();
    let disposition_text = disposition
        .and_then(|d| known(&d.disposition_type))
        .or_else(|| {
            resolution
                .iter()
                .map(|f| f.value_text())
                .find(|t| known(t).is_some())
        })
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty());

    let disposition_date = pack
        .case_summary
        .timeline
        .disposition_date
        .clone()
        .or_else(|| disposition.and_then(|d| known(&d.disposition_date)));

    SearchResult::Outcome {
        query_type,
        outcome_bucket: disposition_text
            .as_deref()
            .map(|t| map_outcome_bucket(Some(t))),
        disposition_text,
        disposition_date,
        resolution_fields: resolution
            .into_iter()
            .take(MAX_RESOLUTION_FIELDS)
            .cloned()
            .collect(),
    }
}

fn known(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty() && t != NOT_AVAILABLE).then(|| s.to_string())
}
