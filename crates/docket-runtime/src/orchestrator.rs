//! Conversational orchestrator.
//!
//! Ties the pieces together for one request:
//! - session bookkeeping (active case id, transcript)
//! - case lookup and context pack construction
//! - optional cohort statistics with a stats card
//! - intent routing to the simulator, timeline or plain explanation
//! - LLM explanation with timeout and deterministic fallback
//!
//! Every path returns a well-formed response. Missing case ids, unknown
//! cases, stats failures and model failures all degrade to text.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use docket_core::{
    build_context_pack, build_timeline, route, simulator_tree, wants_stats, ComparisonStats,
    ContextPack, Intent, SimTree, StageResult, DEFAULT_MAX_NODES,
};

use crate::cache::StatsCache;
use crate::config::RuntimeConfig;
use crate::explainer::{fallback_explanation, CaseExplainer};
use crate::fetch::{fetch_case_record, DispositionSource, FetchError, RecordSource};
use crate::prompts::TIMELINE_INSTRUCTION;
use crate::providers::{ChatMessage, LlmProvider, ProviderError};
use crate::session::{Role, SessionStore};
use crate::stats::ComparisonStatsService;

pub const NO_CASE_ID_REPLY: &str =
    "Please enter a case ID first so I can ground the conversation in your case.";

pub const SIMULATOR_REPLY: &str = "Here's a procedural simulator rooted at your current stage. \
Tap any option to explore what's common at that fork (educational, not a prediction).";

const STATS_CARD_TITLE: &str = "Similar case outcomes";
const NO_COHORT_REASON: &str = "No cohort available.";

pub fn case_not_found_reply(case_id: &str) -> String {
    format!(
        "I can't find case ID {} in the public record sources I'm checking right now.",
        case_id
    )
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Record source not configured: {0}")]
    SourceNotConfigured(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    StatsCard,
    SimulatorCard,
    TimelineCard,
}

/// A structured card rendered by the UI next to the reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiCard {
    #[serde(rename = "type")]
    pub card_type: CardType,
    pub payload: Value,
}

impl UiCard {
    pub fn stats(stats: &ComparisonStats) -> Self {
        let payload = match stats {
            ComparisonStats::Computed(s) => json!({
                "title": STATS_CARD_TITLE,
                "subtitle": format!("Sample size: {}", s.sample_size),
                "outcomes_pct": s.outcomes_pct,
                "outcomes_counts": s.outcomes_counts,
                "time_to_disposition_days": s.time_to_disposition_days,
                "top_raw_dispositions": s.top_raw_dispositions,
            }),
            ComparisonStats::Skipped(s) => {
                let reason = if s.reason.trim().is_empty() {
                    NO_COHORT_REASON
                } else {
                    s.reason.as_str()
                };
                json!({
                    "title": STATS_CARD_TITLE,
                    "subtitle": "Stats unavailable right now",
                    "skipped": true,
                    "reason": reason,
                })
            }
        };
        Self {
            card_type: CardType::StatsCard,
            payload,
        }
    }

    pub fn simulator(tree: &SimTree, stage_label: &str) -> Self {
        Self {
            card_type: CardType::SimulatorCard,
            payload: json!({
                "tree": tree,
                "root_id": tree.root_for_stage(stage_label),
                "stage_label": stage_label,
            }),
        }
    }

    pub fn timeline(payload: Value) -> Self {
        Self {
            card_type: CardType::TimelineCard,
            payload,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub case_id: Option<String>,
    pub user_message: String,
    /// Ask for the stats card regardless of wording.
    #[serde(default, alias = "wantsStats")]
    pub wants_stats: Option<bool>,
}

impl ChatRequest {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            ..Self::default()
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn for_case(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub stage_label: Option<String>,
    pub explanation: String,
    pub ui_cards: Vec<UiCard>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExplainResponse {
    Found {
        case_id: String,
        explanation: String,
        stage: StageResult,
    },
    NotFound {
        error: String,
    },
}

pub struct Orchestrator {
    records: Arc<dyn RecordSource>,
    stats: Arc<ComparisonStatsService>,
    explainer: CaseExplainer,
    sessions: SessionStore,
    config: RuntimeConfig,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn stats(&self) -> &ComparisonStatsService {
        &self.stats
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Fetch a case and build its pack. `None` if no dataset has it.
    pub async fn load_pack(&self, case_id: &str) -> Option<ContextPack> {
        let record = fetch_case_record(self.records.as_ref(), case_id).await?;
        let pack = build_context_pack(&record);
        info!(
            case_id = %case_id,
            stage = %pack.stage.stage_id,
            datasets = record.present().len(),
            "context pack built"
        );
        Some(pack)
    }

    /// One-shot explanation of a case, without a session.
    pub async fn explain_case(&self, case_id: &str) -> ExplainResponse {
        let Some(pack) = self.load_pack(case_id).await else {
            return ExplainResponse::NotFound {
                error: "Case not found".to_string(),
            };
        };

        let explanation = self.explain_or_fallback(&pack, &[]).await;
        ExplainResponse::Found {
            case_id: case_id.to_string(),
            explanation,
            stage: pack.stage,
        }
    }

    pub async fn chat(&self, request: ChatRequest) -> ChatResponse {
        let session_id = self.sessions.get_or_create(request.session_id.as_deref());

        if let Some(case_id) = request
            .case_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            self.sessions.set_case_id(&session_id, case_id);
        }
        self.sessions
            .append(&session_id, Role::User, request.user_message.clone());

        let Some(case_id) = self.sessions.case_id(&session_id) else {
            return self.reply(session_id, None, NO_CASE_ID_REPLY.to_string(), Vec::new());
        };

        let Some(mut pack) = self.load_pack(&case_id).await else {
            return self.reply(session_id, None, case_not_found_reply(&case_id), Vec::new());
        };

        let mut cards = Vec::new();

        if wants_stats(&request.user_message, request.wants_stats.unwrap_or(false)) {
            let (offense, class) = pack.cohort_keys();
            let stats = self
                .stats
                .compute_for_user_context(
                    Some(pack.stage.stage_id.as_str()),
                    offense.as_deref(),
                    class.as_deref(),
                )
                .await;
            cards.push(UiCard::stats(&stats));
            pack.comparison_stats = Some(stats);
        }

        let (chat_history, history) = self
            .sessions
            .get(&session_id)
            .map(|s| {
                (
                    s.history_text(self.config.sessions.history_turns),
                    s.llm_history(),
                )
            })
            .unwrap_or_default();
        pack.chat_history = Some(chat_history);
        pack.active_case_id = Some(case_id);
        pack.latest_user_message = Some(request.user_message.clone());

        let stage_label = pack.stage.stage_label.clone();

        let explanation = match route(&request.user_message) {
            Intent::Simulator => match simulator_tree() {
                Ok(tree) => {
                    cards.push(UiCard::simulator(tree, &stage_label));
                    SIMULATOR_REPLY.to_string()
                }
                Err(e) => {
                    warn!(error = %e, "simulator unavailable, answering in chat");
                    self.explain_or_fallback(&pack, &history).await
                }
            },
            Intent::Timeline => {
                let timeline = build_timeline(&pack, DEFAULT_MAX_NODES);
                cards.push(UiCard::timeline(
                    serde_json::to_value(&timeline).unwrap_or_default(),
                ));
                pack.ui_timeline = Some(timeline);
                pack.latest_user_message = Some(TIMELINE_INSTRUCTION.to_string());
                self.explain_or_fallback(&pack, &history).await
            }
            Intent::General => self.explain_or_fallback(&pack, &history).await,
        };

        self.reply(session_id, Some(stage_label), explanation, cards)
    }

    fn reply(
        &self,
        session_id: String,
        stage_label: Option<String>,
        explanation: String,
        ui_cards: Vec<UiCard>,
    ) -> ChatResponse {
        self.sessions
            .append(&session_id, Role::Assistant, explanation.clone());
        ChatResponse {
            session_id,
            stage_label,
            explanation,
            ui_cards,
        }
    }

    /// Two model calls at most, so the deadline covers both.
    fn explain_deadline(&self) -> Duration {
        self.config.llm.timeout * 2
    }

    async fn explain_or_fallback(&self, pack: &ContextPack, history: &[ChatMessage]) -> String {
        let deadline = self.explain_deadline();
        let provider = self.explainer.provider_name();

        match tokio::time::timeout(deadline, self.explainer.explain(pack, history)).await {
            Ok(Ok(text)) if !text.is_empty() => text,
            Ok(Ok(_)) => {
                warn!(provider = %provider, "empty explanation, using fallback");
                fallback_explanation(pack)
            }
            Ok(Err(e)) => {
                warn!(provider = %provider, error = %e, "explanation failed, using fallback");
                fallback_explanation(pack)
            }
            Err(_) => {
                warn!(provider = %provider, timeout = ?deadline, "explanation timed out, using fallback");
                fallback_explanation(pack)
            }
        }
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    records: Option<Arc<dyn RecordSource>>,
    dispositions: Option<Arc<dyn DispositionSource>>,
    config: RuntimeConfig,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            records: None,
            dispositions: None,
            config: RuntimeConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn records(mut self, records: Arc<dyn RecordSource>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn dispositions(mut self, dispositions: Arc<dyn DispositionSource>) -> Self {
        self.dispositions = Some(dispositions);
        self
    }

    /// Use one client for both case lookups and disposition paging.
    pub fn source<S>(self, source: Arc<S>) -> Self
    where
        S: RecordSource + DispositionSource + 'static,
    {
        self.records(source.clone()).dispositions(source)
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Orchestrator, RuntimeError> {
        let provider = self
            .provider
            .ok_or_else(|| RuntimeError::ProviderNotConfigured("no LLM provider".to_string()))?;
        let records = self
            .records
            .ok_or_else(|| RuntimeError::SourceNotConfigured("no record source".to_string()))?;
        let dispositions = self.dispositions.ok_or_else(|| {
            RuntimeError::SourceNotConfigured("no disposition source".to_string())
        })?;

        let stats = Arc::new(ComparisonStatsService::new(
            dispositions,
            StatsCache::from_config(&self.config.stats),
            self.config.socrata.page_size,
        ));
        let explainer = CaseExplainer::new(
            provider,
            stats.clone(),
            self.config.llm.completion_config(),
        );

        Ok(Orchestrator {
            records,
            stats,
            explainer,
            sessions: SessionStore::from_config(&self.config.sessions),
            config: self.config,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionConfig, CompletionResponse};
    use crate::testing::{FakeDispositions, FakeRecords, Scripted, ScriptedProvider};
    use async_trait::async_trait;
    use docket_core::{Dataset, RawRecord};

    fn records() -> FakeRecords {
        FakeRecords::new().with_row(
            Dataset::Initiation,
            RawRecord::from_pairs([
                ("case_id", json!("123")),
                ("offense_category", json!("Narcotics")),
                ("class", json!("4")),
                ("arraignment_date", json!("2023-01-10T00:00:00.000")),
            ]),
        )
    }

    fn closed_row() -> RawRecord {
        RawRecord::from_pairs([
            ("charge_disposition", json!("Nolle Prosecution")),
            ("offense_category", json!("Narcotics")),
            ("disposition_charged_class", json!("4")),
            ("arraignment_date", json!("2022-01-10T00:00:00.000")),
            ("disposition_date", json!("2022-03-11T00:00:00.000")),
        ])
    }

    fn orchestrator(
        provider: Arc<dyn LlmProvider>,
        dispositions: FakeDispositions,
    ) -> Orchestrator {
        Orchestrator::builder()
            .provider(provider)
            .records(Arc::new(records()))
            .dispositions(Arc::new(dispositions))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_builder_requires_sources() {
        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::replying([]));
        let result = Orchestrator::builder().provider(provider).build();
        assert!(matches!(result, Err(RuntimeError::SourceNotConfigured(_))));

        let result = Orchestrator::builder().build();
        assert!(matches!(result, Err(RuntimeError::ProviderNotConfigured(_))));
    }

    #[tokio::test]
    async fn test_asks_for_case_id_first() {
        let provider = Arc::new(ScriptedProvider::replying([]));
        let orch = orchestrator(provider.clone(), FakeDispositions::new(vec![]));

        let response = orch.chat(ChatRequest::new("hello")).await;
        assert_eq!(response.explanation, NO_CASE_ID_REPLY);
        assert!(response.stage_label.is_none());
        assert!(response.ui_cards.is_empty());
        assert!(provider.requests().is_empty());

        let session = orch.sessions().get(&response.session_id).unwrap();
        assert_eq!(session.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_case() {
        let orch = orchestrator(
            Arc::new(ScriptedProvider::replying([])),
            FakeDispositions::new(vec![]),
        );
        let response = orch.chat(ChatRequest::new("hi").for_case("999")).await;
        assert_eq!(response.explanation, case_not_found_reply("999"));
        assert!(response.ui_cards.is_empty());
    }

    #[tokio::test]
    async fn test_general_chat_uses_model_and_remembers_case() {
        let provider = Arc::new(ScriptedProvider::replying([
            "You are early in the case.",
            "A bond is...",
        ]));
        let orch = orchestrator(provider.clone(), FakeDispositions::new(vec![]));

        let first = orch
            .chat(ChatRequest::new("where am I?").for_case(" 123 "))
            .await;
        assert_eq!(first.explanation, "You are early in the case.");
        assert!(first.stage_label.is_some());
        assert!(first.ui_cards.is_empty());

        let second = orch
            .chat(ChatRequest::new("what is a bond?").in_session(first.session_id.clone()))
            .await;
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.explanation, "A bond is...");

        let requests = provider.requests();
        let (messages, _) = &requests[1];
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[1].content, "where am I?");
        assert!(messages[3].content.contains("\"active_case_id\": \"123\""));
    }

    #[tokio::test]
    async fn test_simulator_intent_skips_model() {
        let provider = Arc::new(ScriptedProvider::replying([]));
        let orch = orchestrator(provider.clone(), FakeDispositions::new(vec![]));

        let response = orch
            .chat(ChatRequest::new("What happens next?").for_case("123"))
            .await;
        assert_eq!(response.explanation, SIMULATOR_REPLY);
        assert_eq!(response.ui_cards.len(), 1);

        let card = &response.ui_cards[0];
        assert_eq!(card.card_type, CardType::SimulatorCard);
        assert!(card.payload["tree"]["nodes"].is_object());
        assert_eq!(
            card.payload["stage_label"],
            json!(response.stage_label.unwrap())
        );
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_timeline_intent_adds_card_and_instruction() {
        let provider = Arc::new(ScriptedProvider::replying(["Your timeline shows..."]));
        let orch = orchestrator(provider.clone(), FakeDispositions::new(vec![]));

        let response = orch
            .chat(ChatRequest::new("show my timeline").for_case("123"))
            .await;
        assert_eq!(response.ui_cards.len(), 1);
        assert_eq!(response.ui_cards[0].card_type, CardType::TimelineCard);
        assert!(response.ui_cards[0].payload["nodes"].is_array());

        let (messages, _) = &provider.requests()[0];
        let context = &messages.last().unwrap().content;
        assert!(context.contains("The user asked to see their timeline."));
        assert!(context.contains("\"ui_timeline\""));
    }

    #[tokio::test]
    async fn test_stats_card_when_asked() {
        let orch = orchestrator(
            Arc::new(ScriptedProvider::replying(["ok"])),
            FakeDispositions::new(vec![closed_row()]),
        );

        let response = orch
            .chat(ChatRequest::new("how do similar cases usually turn out? stats please").for_case("123"))
            .await;
        assert_eq!(response.ui_cards.len(), 1);
        let card = &response.ui_cards[0];
        assert_eq!(card.card_type, CardType::StatsCard);
        assert_eq!(card.payload["title"], "Similar case outcomes");
        assert_eq!(card.payload["subtitle"], "Sample size: 1");
        assert_eq!(card.payload["outcomes_counts"]["dismissed_or_nolle"], 1);
    }

    #[tokio::test]
    async fn test_stats_flag_with_failing_endpoint() {
        let orch = orchestrator(
            Arc::new(ScriptedProvider::replying(["ok"])),
            FakeDispositions::failing(FetchError::Timeout(Duration::from_secs(60))),
        );

        let mut request = ChatRequest::new("tell me more").for_case("123");
        request.wants_stats = Some(true);
        let response = orch.chat(request).await;

        let card = &response.ui_cards[0];
        assert_eq!(card.payload["subtitle"], "Stats unavailable right now");
        assert_eq!(card.payload["skipped"], true);
        assert!(card.payload["reason"]
            .as_str()
            .unwrap()
            .starts_with("Dispositions endpoint error"));
    }

    #[test]
    fn test_skipped_card_default_reason() {
        let card = UiCard::stats(&ComparisonStats::skipped(""));
        assert_eq!(card.payload["reason"], NO_COHORT_REASON);
    }

    #[test]
    fn test_request_accepts_camel_case_flag() {
        let req: ChatRequest =
            serde_json::from_value(json!({"user_message": "hi", "wantsStats": true})).unwrap();
        assert_eq!(req.wants_stats, Some(true));
    }

    #[tokio::test]
    async fn test_model_failure_falls_back() {
        let orch = orchestrator(
            Arc::new(ScriptedProvider::new(vec![Scripted::Fail])),
            FakeDispositions::new(vec![]),
        );
        let response = orch.chat(ChatRequest::new("explain").for_case("123")).await;
        assert_eq!(response.explanation.split("\n\n").count(), 3);
        assert!(response.explanation.contains("you"));
    }

    struct StalledProvider;

    #[async_trait]
    impl LlmProvider for StalledProvider {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            Err(ProviderError::Timeout(Duration::from_secs(3_600)))
        }

        async fn health_check(&self) -> bool {
            false
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_timeout_falls_back() {
        let orch = orchestrator(Arc::new(StalledProvider), FakeDispositions::new(vec![]));
        match orch.explain_case("123").await {
            ExplainResponse::Found { explanation, .. } => {
                assert_eq!(explanation.split("\n\n").count(), 3);
            }
            other => panic!("expected explanation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_explain_case() {
        let orch = orchestrator(
            Arc::new(ScriptedProvider::replying(["You are here."])),
            FakeDispositions::new(vec![]),
        );

        match orch.explain_case("123").await {
            ExplainResponse::Found {
                case_id,
                explanation,
                stage,
            } => {
                assert_eq!(case_id, "123");
                assert_eq!(explanation, "You are here.");
                assert!(!stage.stage_label.is_empty());
            }
            other => panic!("expected explanation, got {:?}", other),
        }

        let missing = orch.explain_case("nope").await;
        assert_eq!(
            serde_json::to_value(missing).unwrap(),
            json!({"error": "Case not found"})
        );
    }
}
