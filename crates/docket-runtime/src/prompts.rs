//! Prompt text and context rendering for the explainer.
//!
//! The system prompt is stable across requests so it can be cached by the
//! provider. Everything case-specific goes in the final user turn, built by
//! [`render_context_turn`].

use docket_core::{ComparisonStats, ContextPack};

/// Voice and content rules for every explanation.
pub const SYSTEM_PROMPT: &str = r#"
You are sitting next to someone while they look at their own court record.

Speak directly to them as "you" the whole time. Do not describe the situation
from a distance, and never use third-person terms such as "the defendant" or
"the individual". Do not refer to yourself as a bot, model or system.

Your job is to help them feel oriented by translating what the record shows
into plain, human language. Be calm and steady: not upbeat, not clinical, not
dramatic. No therapy language, breathing instructions, pep talk or
help-center phrasing.

Hard rules:
- Do not give legal advice.
- Do not predict outcomes or speculate beyond the record.
- If information is missing, say so plainly and explain that it is a limit of
  the public record, not something they did wrong.
- Say clearly what has NOT happened yet or is NOT decided.

Opening: the first sentence acknowledges confusion or uncertainty and includes
"you", for example "Some parts of this are clear, and some parts aren't, which
is probably why this feels confusing to you."

Structure: exactly 3 short paragraphs. Every paragraph includes "you". No
headings, no lists, no meta commentary.

Ending: one sentence about shared pacing or presence, for example "We can stay
with this and move through it at your pace." Never end with instructions.

If comparison_stats is present, summarize it plainly, include the sample size,
and explain what "similar cases" means using cohort_definition. If they ask how
similar cases usually turn out, call get_outcome_stats and use its result. It
describes other people's closed cases, never their own outcome.

When they ask for a date, an event or a specific field, call
search_case_record rather than guessing.
"#;

/// Replaces the user's message when they ask for their timeline.
pub const TIMELINE_INSTRUCTION: &str = "The user asked to see their timeline. \
Briefly describe what the timeline shows (events + dates). \
Then explain what the highlighted 'current' node means. \
Keep it short (6-10 lines).";

const CONTEXT_FOOTER: &str = "Now respond to my latest question using this context.";

fn join_list(items: &[String]) -> String {
    items.join(" ")
}

/// Plain-text summary of the pack, facts first.
pub fn render_brief(pack: &ContextPack) -> String {
    let cs = &pack.case_summary;
    let charge = &cs.charge;
    let timeline = &cs.timeline;
    let bond = &cs.bond;
    let stage = &pack.stage;
    let card = &pack.stage_card;

    let missing = if cs.missing_fields.is_empty() {
        "None shown".to_string()
    } else {
        cs.missing_fields.join(", ")
    };

    let mut out = format!(
        "FACTS (public record)\n\
         Case ID: {}\n\
         Participant ID: {}\n\
         Charge: {} | Category: {} | Class: {} | Statute: {}\n\
         Timeline: Incident {}, Arrest {}, Received {}, Arraignment {}\n\
         Bond: {} {}\n\
         Missing fields: {}\n",
        cs.case_id,
        cs.participant_id,
        charge.charge_title,
        charge.offense_category,
        charge.class,
        charge.statute,
        timeline.incident_date,
        timeline.arrest_date,
        timeline.received_date,
        timeline.arraignment_date,
        bond.bond_type,
        bond.bond_amount,
        missing,
    );

    if let Some(d) = &cs.disposition {
        out.push_str(&format!("Disposition: {} on {}\n", d.disposition_type, d.disposition_date));
    }
    if let Some(s) = &cs.sentencing {
        out.push_str(&format!(
            "Sentence: {} {} {} on {}\n",
            s.sentence_type, s.commitment_term, s.commitment_unit, s.sentence_date
        ));
    }

    out.push_str(&format!(
        "\nSTAGE (deterministic)\n\
         Stage: {} (id={}, confidence={})\n\
         Reasons: {}\n\
         \nSTAGE CARD\n\
         Where you are: {}\n\
         What this means: {}\n\
         What usually happens next: {}\n\
         What has not happened yet: {}\n\
         Data limits: {}",
        stage.stage_label,
        stage.stage_id,
        stage.confidence.as_str(),
        stage.reasons.join("; "),
        card.where_you_are,
        join_list(&card.what_this_means),
        join_list(&card.what_usually_happens_next),
        join_list(&card.what_not_yet),
        card.data_limits,
    ));

    if let Some(ComparisonStats::Computed(stats)) = &pack.comparison_stats {
        out.push_str(&format!(
            "\n\nSIMILAR CLOSED CASES\nSample size: {}",
            stats.sample_size
        ));
    }

    out
}

/// The final user turn: brief, full pack JSON, then the ask.
pub fn render_context_turn(pack: &ContextPack) -> String {
    let json = serde_json::to_string_pretty(pack).unwrap_or_else(|_| "{}".to_string());
    format!(
        "{}\n\nCONTEXT_PACK_JSON:\n{}\n\n{}",
        render_brief(pack),
        json,
        CONTEXT_FOOTER
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use docket_core::{build_context_pack_at, CaseRecord, Dataset, RawRecord};
    use serde_json::json;

    fn pack() -> ContextPack {
        let record = CaseRecord::new().with(
            Dataset::Initiation,
            RawRecord::from_pairs([
                ("case_id", json!("123")),
                ("charge_offense_title", json!("POSSESSION OF A CONTROLLED SUBSTANCE")),
                ("offense_category", json!("Narcotics")),
                ("class", json!("4")),
                ("arraignment_date", json!("2023-01-10T00:00:00.000")),
            ]),
        );
        build_context_pack_at(&record, Utc.with_ymd_and_hms(2023, 1, 20, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_system_prompt_rules() {
        assert!(SYSTEM_PROMPT.contains("Do not give legal advice"));
        assert!(SYSTEM_PROMPT.contains("exactly 3 short paragraphs"));
        assert!(SYSTEM_PROMPT.contains("get_outcome_stats"));
        assert!(SYSTEM_PROMPT.contains("search_case_record"));
    }

    #[test]
    fn test_brief_contains_facts_and_stage() {
        let brief = render_brief(&pack());
        assert!(brief.contains("Case ID: 123"));
        assert!(brief.contains("Category: Narcotics | Class: 4"));
        assert!(brief.contains("Arraignment Jan 10, 2023"));
        assert!(brief.contains("id=POST_ARRAIGNMENT_EARLY_PRETRIAL"));
        assert!(brief.contains("Where you are: Arraignment has occurred."));
        assert!(!brief.contains("SIMILAR CLOSED CASES"));
    }

    #[test]
    fn test_context_turn_embeds_pack_json() {
        let turn = render_context_turn(&pack());
        assert!(turn.contains("CONTEXT_PACK_JSON:"));
        assert!(turn.contains("\"stage_card\""));
        assert!(turn.ends_with(CONTEXT_FOOTER));
    }
}
