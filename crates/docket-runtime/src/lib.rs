//! # docket-runtime
//!
//! Everything in docket that touches the network or a language model.
//!
//! `docket-core` stays deterministic and synchronous. This crate supplies
//! the async edges around it:
//! - Socrata lookups for the four court datasets, with retry and backoff
//! - a cached comparison-stats service over the disposition dataset
//! - an LLM provider abstraction with an Anthropic implementation
//! - the case explainer (tool-call loop plus deterministic fallback)
//! - an in-memory session store and the conversational orchestrator
//!
//! ## Features
//!
//! - `socrata`: the HTTP record source
//! - `anthropic`: the Anthropic Messages API provider
//! - `all-sources`: both
//!
//! Without features the crate still builds and tests against in-memory
//! sources and providers.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docket_runtime::{ChatRequest, Orchestrator, ProviderRegistry, RuntimeConfig, SocrataClient};
//!
//! let config = RuntimeConfig::from_file("docket.yaml")?;
//! let provider = ProviderRegistry::with_defaults().create(&config.llm)?;
//! let source = Arc::new(SocrataClient::new(config.socrata.clone())?);
//!
//! let orchestrator = Orchestrator::builder()
//!     .provider(provider)
//!     .source(source)
//!     .config(config)
//!     .build()?;
//!
//! let reply = orchestrator
//!     .chat(ChatRequest::new("Where is my case right now?").for_case("123456"))
//!     .await;
//! println!("{}", reply.explanation);
//! ```

pub mod cache;
pub mod config;
pub mod explainer;
pub mod fetch;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod secrets;
pub mod session;
pub mod stats;

#[cfg(test)]
mod testing;

pub use cache::StatsCache;
pub use config::{ConfigError, LlmConfig, RuntimeConfig, SessionConfig, SocrataConfig, StatsConfig};
pub use explainer::{fallback_explanation, CaseExplainer};
pub use fetch::{
    fetch_all_dispositions, fetch_case_record, find_open_case, DispositionSource, FetchError,
    RecordSource,
};
pub use orchestrator::{
    CardType, ChatRequest, ChatResponse, ExplainResponse, Orchestrator, OrchestratorBuilder,
    RuntimeError, UiCard,
};
pub use providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError,
    ProviderFactory, ProviderRegistry, TokenUsage, ToolChoice,
};
pub use secrets::{ApiCredential, CredentialError, CredentialSource};
pub use session::{Role, Session, SessionStore};
pub use stats::ComparisonStatsService;

#[cfg(feature = "socrata")]
pub use fetch::SocrataClient;

#[cfg(feature = "anthropic")]
pub use providers::AnthropicProvider;
