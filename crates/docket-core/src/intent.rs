//! Keyword routing for chat messages.
//!
//! Matching is case-insensitive substring search over fixed phrase lists.
//! Simulator intent wins over timeline intent, which wins over plain chat.
//! Stats intent is independent and can accompany any of them.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

const STATS_PHRASES: &[&str] = &[
    "similar cases",
    "cases like mine",
    "how do cases like",
    "how do similar",
    "outcome stats",
    "statistics",
    "stats",
    "how often",
    "rate of",
    "usually turn out",
    "what do outcomes look like",
];

const SIMULATOR_PHRASES: &[&str] = &[
    "procedural simulator",
    "simulator",
    "choose your own adventure",
    "choose-your-own-adventure",
    "what happens next",
    "what usually happens next",
    "what comes next",
    "next steps",
    "what usually comes next",
    "plea discussion",
    "plea discussions",
    "motions",
    "motion to suppress",
    "motion to dismiss",
    "discovery",
    "trial-setting",
    "trial setting",
];

const TIMELINE_PHRASES: &[&str] = &[
    "timeline",
    "show my timeline",
    "show timeline",
    "court dates",
    "next court date",
    "chronological",
    "in order",
    "sequence of events",
    "what happened so far",
    "what has happened so far",
];

fn phrase_pattern(phrases: &[&str]) -> String {
    let alternation = phrases
        .iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    format!("(?i)(?:{})", alternation)
}

lazy_static! {
    static ref STATS_RE: Regex = Regex::new(&phrase_pattern(STATS_PHRASES)).unwrap();
    static ref SIMULATOR_RE: Regex = Regex::new(&phrase_pattern(SIMULATOR_PHRASES)).unwrap();
    static ref TIMELINE_RE: Regex = Regex::new(&phrase_pattern(TIMELINE_PHRASES)).unwrap();
}

/// What the conversational layer should do with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Simulator,
    Timeline,
    General,
}

pub fn is_simulator_intent(message: &str) -> bool {
    SIMULATOR_RE.is_match(message)
}

pub fn is_timeline_intent(message: &str) -> bool {
    TIMELINE_RE.is_match(message)
}

/// Stats are wanted when the client asks explicitly or the message says so.
pub fn wants_stats(message: &str, requested: bool) -> bool {
    requested || STATS_RE.is_match(message)
}

pub fn route(message: &str) -> Intent {
    if is_simulator_intent(message) {
        Intent::Simulator
    } else if is_timeline_intent(message) {
        Intent::Timeline
    } else {
        Intent::General
    }
}
