//! # docket-core
//!
//! Deterministic case explanation engine for public criminal court records.
//!
//! Given the dataset rows for one case, this crate answers:
//! - Where is this case right now?
//! - What does that stage mean, and what usually comes next?
//! - How did similar closed cases turn out?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same record (and same "now") always produces the same output
//! 2. **No I/O**: Fetching, caching and LLM calls live in `docket-runtime`
//! 3. **Never raises on bad data**: Malformed dates and missing fields degrade to "absent"
//! 4. **Not a prediction**: Nothing here estimates the outcome of the user's own case
//!
//! ## Example
//!
//! ```rust,ignore
//! use docket_core::{build_context_pack, build_timeline, CaseRecord, DEFAULT_MAX_NODES};
//!
//! let record: CaseRecord = serde_json::from_str(&json)?;
//! let pack = build_context_pack(&record);
//! println!("{} ({})", pack.stage.stage_label, pack.stage.confidence.as_str());
//!
//! let timeline = build_timeline(&pack, DEFAULT_MAX_NODES);
//! ```

pub mod cohort;
pub mod context;
pub mod dates;
pub mod intent;
pub mod record;
pub mod search;
pub mod simulator;
pub mod stage;
pub mod stage_card;
pub mod timeline;
pub mod tools;

pub use cohort::{
    check_eligibility, compute_comparison_stats, filter_similar_closed_rows, map_outcome_bucket,
    CohortKey, CohortQuery, CohortStats, ComparisonStats, OutcomeBucket, StatsSkipped,
};
pub use context::{build_context_pack, build_context_pack_at, ContextPack};
pub use intent::{route, wants_stats, Intent};
pub use record::{CaseRecord, Dataset, RawRecord, NOT_AVAILABLE};
pub use search::{search_case_record, SearchQuery, SearchResult};
pub use simulator::{pick_root_for_stage, simulator_tree, SimTree};
pub use stage::{infer_stage, infer_stage_at, Confidence, StageClassifier, StageId, StageResult};
pub use stage_card::{stage_card_for, StageCard};
pub use timeline::{build_timeline, TimelinePayload, DEFAULT_MAX_NODES};
pub use tools::{tool_specs, OutcomeStatsArgs, ToolCall, ToolError, ToolSpec};
