//! Cached "similar closed cases" statistics.

use std::sync::Arc;
use tracing::{info, warn};

use docket_core::{check_eligibility, compute_comparison_stats, CohortQuery, ComparisonStats};

use crate::cache::StatsCache;
use crate::fetch::{fetch_all_dispositions, DispositionSource};

/// Fetches, filters and aggregates disposition rows for a cohort, with a
/// per-instance cache in front.
pub struct ComparisonStatsService {
    source: Arc<dyn DispositionSource>,
    cache: StatsCache,
    page_size: usize,
}

impl ComparisonStatsService {
    pub fn new(source: Arc<dyn DispositionSource>, cache: StatsCache, page_size: usize) -> Self {
        Self {
            source,
            cache,
            page_size,
        }
    }

    pub fn cache(&self) -> &StatsCache {
        &self.cache
    }

    /// Statistics for the user's cohort, or a skip marker. Never fails.
    ///
    /// Unsupported or missing stages are rejected before the cache and the
    /// network are touched. Endpoint failures become a skip, and that skip
    /// is cached like a computed result until the entry expires.
    pub async fn compute_for_user_context(
        &self,
        stage_id: Option<&str>,
        offense_category: Option<&str>,
        charge_class: Option<&str>,
    ) -> ComparisonStats {
        let stage = match check_eligibility(stage_id) {
            Ok(stage) => stage,
            Err(skipped) => return skipped,
        };

        let query = CohortQuery::new(stage, offense_category, charge_class);
        let key = query.key();

        if let Some(hit) = self.cache.get(&key).await {
            info!(stage = %stage, offense = %key.offense_category, class = %key.charge_class, "stats cache hit");
            return hit;
        }

        let rows = match fetch_all_dispositions(
            self.source.as_ref(),
            &query.where_clause(),
            self.page_size,
        )
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(stage = %stage, error = %e, "disposition fetch failed, skipping stats");
                let skipped = ComparisonStats::endpoint_error(e);
                self.cache.insert(key, skipped.clone()).await;
                return skipped;
            }
        };

        let stats = ComparisonStats::Computed(compute_comparison_stats(&rows, &query));
        info!(stage = %stage, sample_size = ?stats.sample_size(), "computed cohort stats");

        self.cache.insert(key, stats.clone()).await;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use crate::testing::FakeDispositions;
    use docket_core::cohort::{MISSING_STAGE_REASON, UNSUPPORTED_STAGE_REASON};
    use docket_core::{OutcomeBucket, RawRecord};
    use serde_json::json;

    fn closed(disposition: &str, offense: &str) -> RawRecord {
        RawRecord::from_pairs([
            ("charge_disposition", json!(disposition)),
            ("offense_category", json!(offense)),
            ("disposition_charged_class", json!("4")),
            ("arraignment_date", json!("2022-01-10T00:00:00.000")),
            ("disposition_date", json!("2022-03-11T00:00:00.000")),
        ])
    }

    fn service(source: Arc<FakeDispositions>) -> ComparisonStatsService {
        ComparisonStatsService::new(source, StatsCache::new(100, None), 1_000)
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let source = Arc::new(FakeDispositions::new(vec![
            closed("Nolle Prosecution", "Narcotics"),
            closed("Plea Of Guilty", "Narcotics"),
        ]));
        let svc = service(source.clone());

        let first = svc
            .compute_for_user_context(Some("POST_ARRAIGNMENT_PRETRIAL"), Some("Narcotics"), Some("4"))
            .await;
        let calls_after_first = source.calls();
        let second = svc
            .compute_for_user_context(Some("POST_ARRAIGNMENT_PRETRIAL"), Some(" narcotics "), Some("4"))
            .await;

        assert_eq!(first, second);
        assert_eq!(source.calls(), calls_after_first);
        assert_eq!(first.sample_size(), Some(2));
    }

    #[tokio::test]
    async fn test_ineligible_stage_never_fetches() {
        let source = Arc::new(FakeDispositions::new(vec![closed("Dismissed", "Theft")]));
        let svc = service(source.clone());

        match svc.compute_for_user_context(Some("CASE_CLOSED"), None, None).await {
            ComparisonStats::Skipped(s) => {
                assert_eq!(s.reason, UNSUPPORTED_STAGE_REASON);
                assert_eq!(s.user_stage_id.as_deref(), Some("CASE_CLOSED"));
            }
            other => panic!("expected skip, got {:?}", other),
        }

        match svc.compute_for_user_context(None, None, None).await {
            ComparisonStats::Skipped(s) => assert_eq!(s.reason, MISSING_STAGE_REASON),
            other => panic!("expected skip, got {:?}", other),
        }

        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_endpoint_error_skip_is_cached() {
        let source = Arc::new(FakeDispositions::failing(FetchError::Status {
            status: 503,
            body: "busy".into(),
        }));
        let svc = service(source.clone());

        let result = svc
            .compute_for_user_context(Some("POST_ARRAIGNMENT_EARLY_PRETRIAL"), None, None)
            .await;
        match &result {
            ComparisonStats::Skipped(s) => {
                assert!(s.reason.starts_with("Dispositions endpoint error"));
                assert!(s.hint.is_some());
            }
            other => panic!("expected skip, got {:?}", other),
        }

        let again = svc
            .compute_for_user_context(Some("POST_ARRAIGNMENT_EARLY_PRETRIAL"), None, None)
            .await;
        assert_eq!(again, result);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_single_dismissal() {
        let source = Arc::new(FakeDispositions::new(vec![closed("Dismissed", "Theft")]));
        let svc = service(source);

        match svc
            .compute_for_user_context(Some("POST_ARRAIGNMENT_EARLY_PRETRIAL"), Some("theft"), None)
            .await
        {
            ComparisonStats::Computed(stats) => {
                assert_eq!(stats.outcomes_counts[&OutcomeBucket::DismissedOrNolle], 1);
                assert_eq!(stats.outcomes_pct[&OutcomeBucket::DismissedOrNolle], 100.0);
                assert_eq!(stats.time_to_disposition_days.median, Some(60));
            }
            other => panic!("expected stats, got {:?}", other),
        }
    }
}
