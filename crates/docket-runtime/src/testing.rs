//! In-memory fakes for the runtime's seams.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use docket_core::{Dataset, RawRecord};

use crate::fetch::{DispositionSource, FetchError, RecordSource};
use crate::providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
    ToolUse,
};

/// Rows per dataset, matched on exact field value.
#[derive(Default)]
pub struct FakeRecords {
    rows: Vec<(Dataset, RawRecord)>,
    failing: BTreeSet<Dataset>,
    calls: AtomicUsize,
}

impl FakeRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row(mut self, dataset: Dataset, row: RawRecord) -> Self {
        self.rows.push((dataset, row));
        self
    }

    pub fn failing(mut self, dataset: Dataset) -> Self {
        self.failing.insert(dataset);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for FakeRecords {
    async fn find_first(
        &self,
        dataset: Dataset,
        field: &str,
        value: &str,
    ) -> Result<Option<RawRecord>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&dataset) {
            return Err(FetchError::Status {
                status: 500,
                body: "boom".to_string(),
            });
        }
        Ok(self
            .rows
            .iter()
            .find(|(d, row)| *d == dataset && row.text(field).as_deref() == Some(value))
            .map(|(_, row)| row.clone()))
    }

    async fn latest(
        &self,
        dataset: Dataset,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<RawRecord>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&dataset) {
            return Err(FetchError::Status {
                status: 500,
                body: "boom".to_string(),
            });
        }
        let mut rows: Vec<RawRecord> = self
            .rows
            .iter()
            .filter(|(d, _)| *d == dataset)
            .map(|(_, row)| row.clone())
            .collect();
        rows.sort_by(|a, b| b.text(order_field).cmp(&a.text(order_field)));
        rows.truncate(limit);
        Ok(rows)
    }
}

/// Pages over a fixed row list, ignoring the filter.
pub struct FakeDispositions {
    rows: Vec<RawRecord>,
    error: Option<FetchError>,
    calls: AtomicUsize,
}

impl FakeDispositions {
    pub fn new(rows: Vec<RawRecord>) -> Self {
        Self {
            rows,
            error: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: FetchError) -> Self {
        Self {
            rows: Vec::new(),
            error: Some(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DispositionSource for FakeDispositions {
    async fn fetch_page(
        &self,
        _where_clause: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RawRecord>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        Ok(self.rows.iter().skip(offset).take(limit).cloned().collect())
    }
}

pub enum Scripted {
    Text(String),
    Tools(Vec<ToolUse>),
    Fail,
}

/// Replays queued responses and records every request.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<(Vec<ChatMessage>, CompletionConfig)>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying<const N: usize>(texts: [&str; N]) -> Self {
        Self::new(texts.iter().map(|t| Scripted::Text(t.to_string())).collect())
    }

    pub fn requests(&self) -> Vec<(Vec<ChatMessage>, CompletionConfig)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.requests.lock().push((messages, config.clone()));

        let (content, tool_calls) = match self.script.lock().pop_front() {
            Some(Scripted::Text(t)) => (t, Vec::new()),
            Some(Scripted::Tools(calls)) => (String::new(), calls),
            Some(Scripted::Fail) | None => {
                return Err(ProviderError::HttpError("scripted failure".to_string()))
            }
        };

        Ok(CompletionResponse {
            content,
            tool_calls,
            usage: TokenUsage::default(),
            model: "scripted".to_string(),
            stop_reason: Some("end_turn".to_string()),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
