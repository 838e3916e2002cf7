//! Property-based tests for the deterministic engine.

use chrono::{Duration, TimeZone, Utc};
use docket_core::cohort::{compute_comparison_stats, map_outcome_bucket, CohortQuery, OutcomeBucket};
use docket_core::context::build_context_pack_at;
use docket_core::record::{CaseRecord, Dataset, RawRecord};
use docket_core::search::{search_case_record, SearchQuery, MAX_MATCHES};
use docket_core::stage::{infer_stage_at, Confidence, StageId};
use docket_core::timeline::build_timeline_from_fields;
use proptest::prelude::*;
use serde_json::{json, Value};

fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,24}".prop_map(Value::from),
        (2000i32..2030, 1u32..13, 1u32..29)
            .prop_map(|(y, m, d)| json!(format!("{:04}-{:02}-{:02}T00:00:00.000", y, m, d))),
    ]
}

fn raw_record() -> impl Strategy<Value = RawRecord> {
    let keys = prop::sample::select(vec![
        "case_id",
        "arraignment_date",
        "disposition_date",
        "received_date",
        "arrest_date",
        "charge_disposition",
        "class",
        "offense_category",
        "bond_type_current",
        "bond_amount_current",
    ]);
    prop::collection::vec((keys, scalar()), 0..8).prop_map(RawRecord::from_pairs)
}

fn case_record() -> impl Strategy<Value = CaseRecord> {
    (
        prop::option::of(raw_record()),
        prop::option::of(raw_record()),
        prop::option::of(raw_record()),
        prop::option::of(raw_record()),
    )
        .prop_map(|(intake, initiation, disposition, sentencing)| CaseRecord {
            intake,
            initiation,
            disposition,
            sentencing,
        })
}

#[test]
fn empty_record_is_pending_with_low_confidence() {
    let result = infer_stage_at(&CaseRecord::new(), fixed_now());
    assert_eq!(result.stage_id, StageId::PendingOrUnknown);
    assert_eq!(result.confidence, Confidence::Low);
}

#[test]
fn timeline_orders_incident_before_disposition() {
    let fields = vec![
        ("disposition_date".to_string(), json!("2020-06-01")),
        ("incident_begin_date".to_string(), json!("2020-01-01")),
    ];
    let payload = build_timeline_from_fields("Case Closed", &fields, 12);

    let ids: Vec<&str> = payload.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["incident_begin_date", "disposition_date"]);
    assert_eq!(payload.now_node_id.as_deref(), Some("disposition_date"));
}

#[test]
fn bucket_of_missing_text_is_other() {
    assert_eq!(map_outcome_bucket(None), OutcomeBucket::OtherOrUnknown);
    assert_eq!(map_outcome_bucket(Some("")), OutcomeBucket::OtherOrUnknown);
}

proptest! {
    #[test]
    fn sentencing_always_closes_case(record in case_record(), sentencing in raw_record()) {
        let record = record.with(Dataset::Sentencing, sentencing);
        let result = infer_stage_at(&record, fixed_now());
        prop_assert_eq!(result.stage_id, StageId::CaseClosed);
        prop_assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn future_arraignment_is_pre_arraignment(days_ahead in 1i64..2000, intake in prop::option::of(raw_record())) {
        let when = fixed_now() + Duration::days(days_ahead);
        let initiation = RawRecord::from_pairs([
            ("arraignment_date", json!(when.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())),
        ]);
        let record = CaseRecord { intake, initiation: Some(initiation), disposition: None, sentencing: None };

        prop_assert_eq!(infer_stage_at(&record, fixed_now()).stage_id, StageId::PreArraignment);
    }

    #[test]
    fn days_since_arraignment_never_negative(record in case_record()) {
        let pack = build_context_pack_at(&record, fixed_now());
        if let Some(days) = pack.case_summary.timeline.days_since_arraignment {
            prop_assert!(days >= 0);
        }
    }

    #[test]
    fn cohort_counts_add_up(rows in prop::collection::vec(raw_record(), 0..30)) {
        let query = CohortQuery::new(StageId::PostArraignmentPretrial, None, None);
        let stats = compute_comparison_stats(&rows, &query);

        let counted: usize = stats.outcomes_counts.values().sum();
        prop_assert_eq!(counted, stats.sample_size);
        prop_assert!(stats.top_raw_dispositions.len() <= 8);

        if stats.sample_size == 0 {
            prop_assert!(stats.outcomes_pct.is_empty());
        } else {
            let total: f64 = stats.outcomes_pct.values().sum();
            prop_assert!((total - 100.0).abs() < 0.5);
        }

        let q = &stats.time_to_disposition_days;
        if let (Some(p25), Some(median), Some(p75)) = (q.p25, q.median, q.p75) {
            prop_assert!(p25 <= median && median <= p75);
            prop_assert!(p25 >= 0);
        }
    }

    #[test]
    fn timeline_is_sorted_and_capped(
        fields in prop::collection::vec(("[a-z]{1,8}_date", scalar()), 0..20),
        max_nodes in 0usize..15,
    ) {
        let payload = build_timeline_from_fields("x", &fields, max_nodes);

        prop_assert!(payload.nodes.len() <= max_nodes);
        prop_assert!(payload.nodes.windows(2).all(|w| w[0].date <= w[1].date));
        prop_assert_eq!(payload.now_node_id, payload.nodes.last().map(|n| n.id.clone()));
        prop_assert_eq!(payload.future_placeholders.len(), 1);
        prop_assert_eq!(payload.warnings.len(), 1);
    }

    #[test]
    fn search_never_exceeds_cap(
        record in case_record(),
        query_type in "[a-z_]{0,12}",
        contains in prop::option::of("[a-z ]{0,6}"),
    ) {
        let pack = build_context_pack_at(&record, fixed_now());
        let query = SearchQuery {
            query_type: Some(query_type),
            contains_text: contains,
            ..SearchQuery::default()
        };
        let value = serde_json::to_value(search_case_record(&pack, &query)).unwrap();

        for list in ["matches", "events", "event_matches", "resolution_fields"] {
            if let Some(items) = value.get(list).and_then(Value::as_array) {
                prop_assert!(items.len() <= MAX_MATCHES);
            }
        }
    }
}
