//! Stage card catalog.
//!
//! Fixed, human-readable guidance for each stage. The catalog is embedded
//! at compile time from `stage_cards.yaml`, parsed once, and never mutated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::error;

use crate::stage::StageId;

/// Embedded stage card catalog (loaded at compile time).
const STAGE_CARDS_YAML: &str = include_str!("stage_cards.yaml");

/// Parsed catalog (initialized once, reused).
static CATALOG: OnceLock<Result<BTreeMap<StageId, StageCard>, String>> = OnceLock::new();

/// Errors from loading the catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to load stage cards: {0}")]
    LoadError(String),

    #[error("No stage card for {0}")]
    MissingCard(StageId),
}

/// Guidance text for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCard {
    pub title: String,
    pub where_you_are: String,
    pub what_this_means: Vec<String>,
    pub what_usually_happens_next: Vec<String>,
    pub what_not_yet: Vec<String>,
    pub data_limits: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub common_questions: Vec<String>,
}

impl StageCard {
    /// Minimal card used only if the embedded catalog cannot be read.
    fn unavailable() -> Self {
        Self {
            title: "Stage Unclear".to_string(),
            where_you_are: "Stage guidance is not available right now.".to_string(),
            what_this_means: vec![],
            what_usually_happens_next: vec![],
            what_not_yet: vec![],
            data_limits: "Stage guidance could not be loaded.".to_string(),
            common_questions: vec![],
        }
    }
}

/// Get or initialize the parsed catalog.
pub fn catalog() -> Result<&'static BTreeMap<StageId, StageCard>, CatalogError> {
    let result = CATALOG.get_or_init(|| {
        serde_yaml::from_str::<BTreeMap<StageId, StageCard>>(STAGE_CARDS_YAML)
            .map_err(|e| format!("Invalid stage card YAML: {}", e))
    });

    match result {
        Ok(cards) => Ok(cards),
        Err(e) => Err(CatalogError::LoadError(e.clone())),
    }
}

/// Look up the card for a stage, without fallback.
pub fn lookup(stage_id: StageId) -> Result<&'static StageCard, CatalogError> {
    catalog()?
        .get(&stage_id)
        .ok_or(CatalogError::MissingCard(stage_id))
}

/// Card for a stage, falling back to the `PENDING_OR_UNKNOWN` card.
pub fn stage_card_for(stage_id: StageId) -> StageCard {
    match lookup(stage_id).or_else(|_| lookup(StageId::PendingOrUnknown)) {
        Ok(card) => card.clone(),
        Err(e) => {
            error!(error = %e, stage = %stage_id, "stage card catalog unavailable");
            StageCard::unavailable()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_covers_every_stage() {
        let cards = catalog().unwrap();
        for id in StageId::ALL {
            assert!(cards.contains_key(&id), "missing card for {}", id);
        }
    }

    #[test]
    fn test_cards_have_guidance() {
        for id in StageId::ALL {
            let card = lookup(id).unwrap();
            assert!(!card.title.is_empty());
            assert!(!card.where_you_are.is_empty());
            assert!(!card.what_this_means.is_empty());
            assert!(!card.what_usually_happens_next.is_empty());
            assert!(!card.data_limits.is_empty());
        }
    }

    #[test]
    fn test_only_pretrial_has_common_questions() {
        assert!(!lookup(StageId::PostArraignmentPretrial)
            .unwrap()
            .common_questions
            .is_empty());
        assert!(lookup(StageId::CaseClosed).unwrap().common_questions.is_empty());
    }

    #[test]
    fn test_stage_card_for_returns_matching_title() {
        assert_eq!(stage_card_for(StageId::CaseClosed).title, "Case Closed");
        assert_eq!(stage_card_for(StageId::PendingOrUnknown).title, "Stage Unclear");
    }
}
