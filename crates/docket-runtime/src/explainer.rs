//! LLM explanation with tool use, plus the deterministic fallback text.
//!
//! One explanation is at most two model calls. The first offers the
//! record-search and outcome-stats tools. If the model calls any, they are
//! run locally and the results go back on a second call that may not call
//! tools again.

use std::sync::Arc;
use tracing::{debug, warn};

use docket_core::{search_case_record, tool_specs, ContextPack, ToolCall, ToolError};

use crate::prompts::{render_context_turn, SYSTEM_PROMPT};
use crate::providers::{
    ChatMessage, CompletionConfig, LlmProvider, ProviderError, ToolResult, ToolUse,
};
use crate::stats::ComparisonStatsService;

pub struct CaseExplainer {
    provider: Arc<dyn LlmProvider>,
    stats: Arc<ComparisonStatsService>,
    completion: CompletionConfig,
}

impl CaseExplainer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        stats: Arc<ComparisonStatsService>,
        completion: CompletionConfig,
    ) -> Self {
        Self {
            provider,
            stats,
            completion,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn completion_config(&self) -> &CompletionConfig {
        &self.completion
    }

    /// Explain the pack in the user's terms.
    ///
    /// `history` holds prior user/assistant turns, oldest first; other roles
    /// are dropped.
    pub async fn explain(
        &self,
        pack: &ContextPack,
        history: &[ChatMessage],
    ) -> Result<String, ProviderError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT.trim()));
        messages.extend(
            history
                .iter()
                .filter(|m| m.role == "user" || m.role == "assistant")
                .map(|m| ChatMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                    tool_calls: Vec::new(),
                    tool_results: Vec::new(),
                }),
        );
        messages.push(ChatMessage::user(render_context_turn(pack)));

        let tools = match tool_specs() {
            Ok(specs) => specs.to_vec(),
            Err(e) => {
                warn!(error = %e, "tool schemas unavailable, explaining without tools");
                Vec::new()
            }
        };
        let with_tools = self.completion.clone().with_tools(tools);

        let first = self.provider.complete(messages.clone(), &with_tools).await?;
        debug!(
            provider = self.provider.name(),
            tokens = first.usage.total(),
            tool_calls = first.tool_calls.len(),
            "first completion"
        );

        if !first.wants_tools() {
            return Ok(first.content.trim().to_string());
        }

        let mut results = Vec::with_capacity(first.tool_calls.len());
        for call in &first.tool_calls {
            results.push(self.run_tool(call, pack).await);
        }

        messages.push(ChatMessage::assistant_tool_calls(
            first.content,
            first.tool_calls,
        ));
        messages.push(ChatMessage::tool_results(results));

        let second = self
            .provider
            .complete(messages, &with_tools.without_tool_calls())
            .await?;
        debug!(
            provider = self.provider.name(),
            tokens = second.usage.total(),
            "follow-up completion"
        );

        Ok(second.content.trim().to_string())
    }

    /// Run one tool call. Failures become an error payload for the model.
    async fn run_tool(&self, call: &ToolUse, pack: &ContextPack) -> ToolResult {
        let outcome = match ToolCall::resolve(&call.name, &call.input, pack) {
            Ok(ToolCall::SearchCaseRecord(query)) => {
                serde_json::to_value(search_case_record(pack, &query))
                    .map_err(|e| ToolError::InvalidArguments(vec![e.to_string()]))
            }
            Ok(ToolCall::GetOutcomeStats(args)) => {
                let stats = self
                    .stats
                    .compute_for_user_context(
                        args.stage_id.as_deref(),
                        args.offense_category.as_deref(),
                        args.charge_class.as_deref(),
                    )
                    .await;
                serde_json::to_value(stats)
                    .map_err(|e| ToolError::InvalidArguments(vec![e.to_string()]))
            }
            Err(e) => Err(e),
        };

        let (payload, is_error) = match outcome {
            Ok(value) => (value, false),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool call rejected");
                (e.to_payload(), true)
            }
        };

        ToolResult {
            tool_use_id: call.id.clone(),
            content: payload.to_string(),
            is_error,
        }
    }
}

/// Three short paragraphs built from the stage card alone.
///
/// Used whenever the model is unavailable, slow or failing.
pub fn fallback_explanation(pack: &ContextPack) -> String {
    let card = &pack.stage_card;

    let mut opening = format!(
        "Some parts of this are clear, and some parts aren't, which is probably why this feels confusing to you. \
         From what the public record shows, you are at this point: {}. {}",
        card.title.trim_end_matches('.'),
        card.where_you_are
    );
    if let Some(first) = card.what_this_means.first() {
        opening.push(' ');
        opening.push_str(first);
    }

    let mut middle = String::from("Here is what usually happens next for you, in general terms:");
    for step in &card.what_usually_happens_next {
        middle.push(' ');
        middle.push_str(step);
    }
    if !card.what_not_yet.is_empty() {
        middle.push_str(" What has not happened for you yet:");
        for item in &card.what_not_yet {
            middle.push(' ');
            middle.push_str(item);
        }
    }

    let closing = format!(
        "{} If something you expected is missing, that is a limit of the public record, not something you did wrong. \
         We can stay with this and move through it at your pace.",
        card.data_limits
    );

    format!("{}\n\n{}\n\n{}", opening, middle, closing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StatsCache;
    use crate::providers::ToolChoice;
    use crate::testing::{FakeDispositions, Scripted, ScriptedProvider};
    use chrono::{TimeZone, Utc};
    use docket_core::{build_context_pack_at, CaseRecord, Dataset, RawRecord};
    use serde_json::{json, Value};

    fn pack() -> ContextPack {
        let record = CaseRecord::new().with(
            Dataset::Initiation,
            RawRecord::from_pairs([
                ("case_id", json!("123")),
                ("offense_category", json!("Narcotics")),
                ("class", json!("4")),
                ("arraignment_date", json!("2023-01-10T00:00:00.000")),
            ]),
        );
        build_context_pack_at(&record, Utc.with_ymd_and_hms(2023, 1, 20, 0, 0, 0).unwrap())
    }

    fn explainer(provider: Arc<ScriptedProvider>, rows: Vec<RawRecord>) -> CaseExplainer {
        let stats = ComparisonStatsService::new(
            Arc::new(FakeDispositions::new(rows)),
            StatsCache::new(10, None),
            1_000,
        );
        CaseExplainer::new(provider, Arc::new(stats), CompletionConfig::default())
    }

    fn tool(id: &str, name: &str, input: Value) -> ToolUse {
        ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }

    #[tokio::test]
    async fn test_plain_answer_is_trimmed() {
        let provider = Arc::new(ScriptedProvider::replying(["  You are here.  \n"]));
        let text = explainer(provider.clone(), vec![]).explain(&pack(), &[]).await.unwrap();
        assert_eq!(text, "You are here.");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        let (messages, config) = &requests[0];
        assert_eq!(messages[0].role, "system");
        assert!(messages.last().unwrap().content.contains("CONTEXT_PACK_JSON:"));
        assert_eq!(config.tools.len(), 2);
        assert_eq!(config.tool_choice, ToolChoice::Auto);
    }

    #[tokio::test]
    async fn test_history_sits_between_system_and_context() {
        let provider = Arc::new(ScriptedProvider::replying(["ok"]));
        let history = vec![
            ChatMessage::user("what is a bond?"),
            ChatMessage::assistant("It is..."),
            ChatMessage::system("ignored"),
        ];
        explainer(provider.clone(), vec![])
            .explain(&pack(), &history)
            .await
            .unwrap();

        let (messages, _) = &provider.requests()[0];
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[1].content, "what is a bond?");
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Scripted::Tools(vec![
                tool("t1", "search_case_record", json!({"query_type": "dates"})),
                tool("t2", "get_outcome_stats", json!({})),
                tool("t3", "delete_everything", json!({})),
            ]),
            Scripted::Text("Here is what that means for you.".to_string()),
        ]));
        let rows = vec![RawRecord::from_pairs([
            ("charge_disposition", json!("Nolle Prosecution")),
            ("offense_category", json!("Narcotics")),
            ("disposition_charged_class", json!("4")),
            ("arraignment_date", json!("2022-01-10T00:00:00.000")),
            ("disposition_date", json!("2022-03-11T00:00:00.000")),
        ])];

        let text = explainer(provider.clone(), rows)
            .explain(&pack(), &[])
            .await
            .unwrap();
        assert_eq!(text, "Here is what that means for you.");

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);

        let (messages, config) = &requests[1];
        assert_eq!(config.tool_choice, ToolChoice::None);

        let replay = &messages[messages.len() - 2];
        assert_eq!(replay.role, "assistant");
        assert_eq!(replay.tool_calls.len(), 3);

        let results = &messages[messages.len() - 1].tool_results;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].tool_use_id, "t1");
        assert!(!results[0].is_error);

        let stats: Value = serde_json::from_str(&results[1].content).unwrap();
        assert_eq!(stats["sample_size"], 1);

        assert!(results[2].is_error);
        assert!(results[2].content.contains("Unknown tool: delete_everything"));
    }

    #[tokio::test]
    async fn test_provider_failure_propagates() {
        let provider = Arc::new(ScriptedProvider::new(vec![Scripted::Fail]));
        let result = explainer(provider, vec![]).explain(&pack(), &[]).await;
        assert!(matches!(result, Err(ProviderError::HttpError(_))));
    }

    #[test]
    fn test_fallback_is_three_paragraphs_in_second_person() {
        let text = fallback_explanation(&pack());
        let paragraphs: Vec<&str> = text.split("\n\n").collect();
        assert_eq!(paragraphs.len(), 3);
        for p in &paragraphs {
            assert!(p.contains("you"), "paragraph without 'you': {}", p);
        }
        assert!(!text.to_lowercase().contains("the defendant"));
    }
}
