//! Remote record access.
//!
//! Two seams: [`RecordSource`] looks up rows of one dataset by an
//! identifier field or by recency, and [`DispositionSource`] pages through the disposition
//! dataset under a server-side filter. The Socrata client implements both;
//! tests substitute in-memory fakes.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use docket_core::{CaseRecord, Dataset, RawRecord};

#[cfg(feature = "socrata")]
mod socrata;

#[cfg(feature = "socrata")]
pub use socrata::SocrataClient;

/// Identifier fields tried in order for a case lookup.
pub const ID_FIELDS: [&str; 2] = ["case_participant_id", "case_id"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("Source not configured: {0}")]
    NotConfigured(String),
}

impl FetchError {
    /// Transport failures, timeouts, 429 and the usual gateway errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(_) | FetchError::Timeout(_) => true,
            FetchError::Status { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            FetchError::Parse(_) | FetchError::NotConfigured(_) => false,
        }
    }
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// First row of `dataset` whose `field` equals `value`.
    async fn find_first(
        &self,
        dataset: Dataset,
        field: &str,
        value: &str,
    ) -> Result<Option<RawRecord>, FetchError>;

    /// Up to `limit` rows of `dataset`, `order_field` descending.
    async fn latest(
        &self,
        dataset: Dataset,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<RawRecord>, FetchError>;
}

#[async_trait]
pub trait DispositionSource: Send + Sync {
    /// One page of disposition rows matching a SoQL `$where` expression.
    async fn fetch_page(
        &self,
        where_clause: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RawRecord>, FetchError>;
}

async fn lookup_dataset(
    source: &dyn RecordSource,
    dataset: Dataset,
    id: &str,
) -> Result<Option<RawRecord>, FetchError> {
    for field in ID_FIELDS {
        if let Some(row) = source.find_first(dataset, field, id).await? {
            debug!(dataset = %dataset, field, "matched row");
            return Ok(Some(row));
        }
    }
    Ok(None)
}

/// Assemble a case record from all four datasets.
///
/// A dataset that errors is logged and treated as absent. Returns `None`
/// when no dataset has a row for `id`.
pub async fn fetch_case_record(source: &dyn RecordSource, id: &str) -> Option<CaseRecord> {
    let id = id.trim();
    if id.is_empty() {
        return None;
    }

    let mut record = CaseRecord::new();
    for dataset in Dataset::ALL {
        match lookup_dataset(source, dataset, id).await {
            Ok(Some(row)) => record.set(dataset, row),
            Ok(None) => {}
            Err(e) => warn!(dataset = %dataset, error = %e, "dataset lookup failed, treating as absent"),
        }
    }

    info!(case_id = id, found = ?record.present(), "case lookup finished");
    if record.is_empty() {
        None
    } else {
        Some(record)
    }
}

/// Newest initiated case with no disposition row yet.
///
/// Scans at most `candidates` initiation rows, newest `case_id` first, and
/// returns the first whose participant id has no disposition.
pub async fn find_open_case(
    source: &dyn RecordSource,
    candidates: usize,
) -> Result<Option<RawRecord>, FetchError> {
    let rows = source
        .latest(Dataset::Initiation, "case_id", candidates.max(1))
        .await?;
    let scanned = rows.len();

    for row in rows {
        let Some(participant) = row.text("case_participant_id") else {
            continue;
        };
        if source
            .find_first(Dataset::Disposition, "case_participant_id", &participant)
            .await?
            .is_none()
        {
            info!(case_participant_id = %participant, "found open case");
            return Ok(Some(row));
        }
    }

    info!(scanned, "no open case among recent initiations");
    Ok(None)
}

/// Page through dispositions until a short or empty page.
pub async fn fetch_all_dispositions(
    source: &dyn DispositionSource,
    where_clause: &str,
    page_size: usize,
) -> Result<Vec<RawRecord>, FetchError> {
    let page_size = page_size.max(1);
    let mut rows = Vec::new();
    let mut offset = 0;

    loop {
        let page = source.fetch_page(where_clause, page_size, offset).await?;
        let len = page.len();
        rows.extend(page);
        if len < page_size {
            break;
        }
        offset += page_size;
    }

    info!(rows = rows.len(), "fetched disposition rows");
    Ok(rows)
}
