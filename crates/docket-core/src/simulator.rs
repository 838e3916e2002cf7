//! Procedural simulator tree.
//!
//! A fixed, educational "choose your path" tree of common court procedure,
//! embedded from `simulator_tree.yaml`. The conversational layer ships the
//! whole tree to the UI together with the root that fits the user's stage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

const SIMULATOR_TREE_YAML: &str = include_str!("simulator_tree.yaml");

static TREE: OnceLock<Result<SimTree, String>> = OnceLock::new();

pub const FALLBACK_ROOT_ID: &str = "general_root";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulatorError {
    #[error("Failed to load simulator tree: {0}")]
    LoadError(String),
}

/// Stage-label keywords that select a root. All must appear in the label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootRule {
    #[serde(rename = "match")]
    pub match_terms: Vec<String>,
    pub root_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimChoice {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub back: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimNode {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub body: String,
    pub choices: Vec<SimChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimTree {
    pub version: String,
    pub roots_by_stage: Vec<RootRule>,
    pub default_root_id: String,
    pub nodes: BTreeMap<String, SimNode>,
}

impl SimTree {
    fn from_yaml(yaml: &str) -> Result<Self, String> {
        let mut tree: SimTree =
            serde_yaml::from_str(yaml).map_err(|e| format!("Invalid simulator YAML: {}", e))?;

        for (id, node) in tree.nodes.iter_mut() {
            node.id = id.clone();
        }

        let dangling: Vec<String> = tree
            .nodes
            .values()
            .flat_map(|n| n.choices.iter().filter_map(|c| c.to.as_ref()))
            .chain(tree.roots_by_stage.iter().map(|r| &r.root_id))
            .chain(std::iter::once(&tree.default_root_id))
            .filter(|to| !tree.nodes.contains_key(*to))
            .cloned()
            .collect();
        if !dangling.is_empty() {
            return Err(format!("Unknown node ids: {}", dangling.join(", ")));
        }

        Ok(tree)
    }

    /// Root node for a stage label. First rule whose terms all occur in
    /// the (lowercased) label wins.
    pub fn root_for_stage(&self, stage_label: &str) -> &str {
        let stage = stage_label.to_lowercase();
        self.roots_by_stage
            .iter()
            .find(|rule| {
                !rule.match_terms.is_empty()
                    && rule
                        .match_terms
                        .iter()
                        .all(|m| stage.contains(&m.to_lowercase()))
            })
            .map(|rule| rule.root_id.as_str())
            .unwrap_or(self.default_root_id.as_str())
    }

    pub fn node(&self, id: &str) -> Option<&SimNode> {
        self.nodes.get(id)
    }
}

/// The embedded tree, parsed once.
pub fn simulator_tree() -> Result<&'static SimTree, SimulatorError> {
    let result = TREE.get_or_init(|| SimTree::from_yaml(SIMULATOR_TREE_YAML));
    match result {
        Ok(tree) => Ok(tree),
        Err(e) => Err(SimulatorError::LoadError(e.clone())),
    }
}

/// Root id for a stage label, or [`FALLBACK_ROOT_ID`] if the tree is unavailable.
pub fn pick_root_for_stage(stage_label: &str) -> String {
    simulator_tree()
        .map(|t| t.root_for_stage(stage_label).to_string())
        .unwrap_or_else(|_| FALLBACK_ROOT_ID.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_loads_and_links_resolve() {
        let tree = simulator_tree().unwrap();
        assert_eq!(tree.version, "v1");
        assert!(tree.nodes.len() > 20);
        assert_eq!(tree.node("discovery_root").unwrap().id, "discovery_root");
    }

    #[test]
    fn test_root_selection() {
        assert_eq!(pick_root_for_stage("Pretrial (post-arraignment)"), "pretrial_root");
        assert_eq!(pick_root_for_stage("Pre-Arraignment"), "arraignment_root");
        assert_eq!(pick_root_for_stage("Early Pre-Trial"), "general_root");
        assert_eq!(pick_root_for_stage(""), "general_root");
    }

    #[test]
    fn test_back_choices_have_no_target() {
        let tree = simulator_tree().unwrap();
        let overview = tree.node("pretrial_overview").unwrap();
        let back = overview.choices.iter().find(|c| c.back).unwrap();
        assert!(back.to.is_none());
    }

    #[test]
    fn test_dangling_link_rejected() {
        let yaml = r#"
version: "t"
default_root_id: "a"
roots_by_stage: []
nodes:
  a:
    title: "A"
    body: "a"
    choices:
      - { label: "go", to: "missing" }
"#;
        let err = SimTree::from_yaml(yaml).unwrap_err();
        assert!(err.contains("missing"));
    }
}
