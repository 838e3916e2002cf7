//! Timeline builder for the UI timeline card.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ContextPack;
use crate::dates::parse_flexible;

pub const DEFAULT_MAX_NODES: usize = 12;

pub const TIMELINE_SOURCE: &str = "case_summary.timeline";

pub const FUTURE_WARNING: &str = "Future steps are general information, not a prediction.";

/// Date keys with a fixed label, in display order.
pub const EVENT_LABELS: [(&str, &str); 8] = [
    ("incident_begin_date", "Incident began"),
    ("incident_date", "Incident"),
    ("arrest_date", "Arrest"),
    ("received_date", "Case received / filed"),
    ("felony_review_date", "Felony review"),
    ("arraignment_date", "Arraignment"),
    ("disposition_date", "Disposition / resolution"),
    ("sentence_date", "Sentencing"),
];

/// Human label for a date key: the fixed table, else `snake_case` to
/// `Title Case`.
pub fn event_label(key: &str) -> String {
    EVENT_LABELS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| title_case(key))
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    /// ISO date, `YYYY-MM-DD`.
    pub date: String,
    pub title: String,
    pub subtitle: String,
    pub source_refs: Vec<SourceRef>,
}

/// Non-dated "what usually comes next" marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuturePlaceholder {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub title: String,
    pub subtitle: String,
    pub kind: String,
}

impl FuturePlaceholder {
    pub fn typical_next() -> Self {
        Self {
            id: "typical_next".to_string(),
            node_type: "TYPICAL_STEP".to_string(),
            title: "Typical next steps at this stage".to_string(),
            subtitle: "General info (not a prediction)".to_string(),
            kind: "future_general".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePayload {
    pub stage: String,
    pub now_node_id: Option<String>,
    pub nodes: Vec<TimelineNode>,
    pub future_placeholders: Vec<FuturePlaceholder>,
    pub warnings: Vec<String>,
}

/// Build the timeline card payload for a context pack.
pub fn build_timeline(pack: &ContextPack, max_nodes: usize) -> TimelinePayload {
    build_timeline_from_fields(
        &pack.stage.stage_label,
        &pack.case_summary.timeline.fields(),
        max_nodes,
    )
}

/// Build a timeline from arbitrary `(key, value)` pairs.
///
/// Only keys ending in `_date` whose value parses become nodes. Nodes are
/// sorted by date and capped at `max_nodes`, keeping the earliest; the last
/// kept node is "now" even when later events were cut.
pub fn build_timeline_from_fields(
    stage_label: &str,
    fields: &[(String, Value)],
    max_nodes: usize,
) -> TimelinePayload {
    let mut nodes: Vec<TimelineNode> = fields
        .iter()
        .filter(|(key, _)| key.ends_with("_date"))
        .filter_map(|(key, value)| {
            let dt = parse_flexible(value)?;
            Some(TimelineNode {
                id: key.clone(),
                node_type: key.to_uppercase(),
                date: dt.date().format("%Y-%m-%d").to_string(),
                title: event_label(key),
                subtitle: String::new(),
                source_refs: vec![SourceRef {
                    source: TIMELINE_SOURCE.to_string(),
                    key: key.clone(),
                    value: value.clone(),
                }],
            })
        })
        .collect();

    nodes.sort_by(|a, b| a.date.cmp(&b.date));
    nodes.truncate(max_nodes);

    TimelinePayload {
        stage: stage_label.to_string(),
        now_node_id: nodes.last().map(|n| n.id.clone()),
        nodes,
        future_placeholders: vec![FuturePlaceholder::typical_next()],
        warnings: vec![FUTURE_WARNING.to_string()],
    }
}
