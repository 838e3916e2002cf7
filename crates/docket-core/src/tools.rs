//! Tool definitions exposed to the language model, and argument checking.
//!
//! Schemas are embedded from `tool_schemas.json` and compiled once. A tool
//! call is resolved into a typed [`ToolCall`] only after its arguments pass
//! the schema; anything else becomes a [`ToolError`] that the caller hands
//! back to the model as `{"error": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

use crate::context::ContextPack;
use crate::search::SearchQuery;

pub const SEARCH_CASE_RECORD: &str = "search_case_record";
pub const GET_OUTCOME_STATS: &str = "get_outcome_stats";

/// Embedded tool definitions (loaded at compile time).
const TOOL_SCHEMAS_JSON: &str = include_str!("tool_schemas.json");

struct CompiledTools {
    specs: Vec<ToolSpec>,
    validators: BTreeMap<String, jsonschema::Validator>,
}

static COMPILED_TOOLS: OnceLock<Result<CompiledTools, String>> = OnceLock::new();

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Failed to load tool schemas: {0}")]
    LoadError(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {}", .0.join("; "))]
    InvalidArguments(Vec<String>),
}

impl ToolError {
    /// Payload returned to the model in place of a tool result.
    pub fn to_payload(&self) -> Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

fn compiled() -> Result<&'static CompiledTools, ToolError> {
    let result = COMPILED_TOOLS.get_or_init(|| {
        let specs: Vec<ToolSpec> = serde_json::from_str(TOOL_SCHEMAS_JSON)
            .map_err(|e| format!("Invalid tool schema JSON: {}", e))?;

        let mut validators = BTreeMap::new();
        for spec in &specs {
            let validator = jsonschema::options()
                .build(&spec.input_schema)
                .map_err(|e| format!("Failed to compile schema for {}: {}", spec.name, e))?;
            validators.insert(spec.name.clone(), validator);
        }

        Ok(CompiledTools { specs, validators })
    });

    match result {
        Ok(tools) => Ok(tools),
        Err(e) => Err(ToolError::LoadError(e.clone())),
    }
}

/// All tool definitions, in the order they are offered to the model.
pub fn tool_specs() -> Result<&'static [ToolSpec], ToolError> {
    compiled().map(|t| t.specs.as_slice())
}

/// Check arguments against the named tool's schema.
pub fn validate_tool_arguments(name: &str, arguments: &Value) -> Result<(), ToolError> {
    let tools = compiled()?;
    let validator = tools
        .validators
        .get(name)
        .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments(errors))
    }
}

/// Arguments to `get_outcome_stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeStatsArgs {
    #[serde(default)]
    pub stage_id: Option<String>,
    #[serde(default)]
    pub offense_category: Option<String>,
    #[serde(default)]
    pub charge_class: Option<String>,
}

/// A validated tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    SearchCaseRecord(SearchQuery),
    GetOutcomeStats(OutcomeStatsArgs),
}

impl ToolCall {
    /// Validate and type a raw tool call.
    ///
    /// `get_outcome_stats` arguments the model left out are taken from the
    /// pack before validation.
    pub fn resolve(name: &str, arguments: &Value, pack: &ContextPack) -> Result<Self, ToolError> {
        let mut arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };

        if name == GET_OUTCOME_STATS {
            fill_stats_defaults(&mut arguments, pack);
        }

        validate_tool_arguments(name, &arguments)?;

        let invalid = |e: serde_json::Error| ToolError::InvalidArguments(vec![e.to_string()]);
        match name {
            SEARCH_CASE_RECORD => serde_json::from_value(arguments)
                .map(ToolCall::SearchCaseRecord)
                .map_err(invalid),
            GET_OUTCOME_STATS => serde_json::from_value(arguments)
                .map(ToolCall::GetOutcomeStats)
                .map_err(invalid),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::SearchCaseRecord(_) => SEARCH_CASE_RECORD,
            ToolCall::GetOutcomeStats(_) => GET_OUTCOME_STATS,
        }
    }
}

fn fill_stats_defaults(arguments: &mut Value, pack: &ContextPack) {
    let Value::Object(map) = arguments else {
        return;
    };

    let (offense, class) = pack.cohort_keys();
    let defaults = [
        ("stage_id", Some(pack.stage.stage_id.as_str().to_string())),
        ("offense_category", offense),
        ("charge_class", class),
    ];

    for (key, default) in defaults {
        let missing = match map.get(key) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            _ => false,
        };
        if missing {
            match default {
                Some(v) => {
                    map.insert(key.to_string(), Value::String(v));
                }
                None => {
                    map.remove(key);
                }
            }
        }
    }
}
