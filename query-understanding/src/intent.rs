//! Rule-based intent classification. Keyword hits are counted per intent;
//! the highest count wins and ties resolve in a fixed priority order, so
//! classification is fully deterministic.

use serde::{Deserialize, Serialize};

use common::utils::text::tokenize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryIntent {
    RetrieveMedications,
    RetrieveCarePlans,
    RetrieveNotes,
    RetrieveAll,
    Summary,
    Comparison,
    Unknown,
}

impl QueryIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RetrieveMedications => "RETRIEVE_MEDICATIONS",
            Self::RetrieveCarePlans => "RETRIEVE_CARE_PLANS",
            Self::RetrieveNotes => "RETRIEVE_NOTES",
            Self::RetrieveAll => "RETRIEVE_ALL",
            Self::Summary => "SUMMARY",
            Self::Comparison => "COMPARISON",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Tie-break priority. Earlier entries win on equal keyword counts.
const PRIORITY: [QueryIntent; 6] = [
    QueryIntent::RetrieveMedications,
    QueryIntent::RetrieveCarePlans,
    QueryIntent::RetrieveNotes,
    QueryIntent::Summary,
    QueryIntent::Comparison,
    QueryIntent::RetrieveAll,
];

const MEDICATION_WORDS: &[&str] = &[
    "medication",
    "medications",
    "med",
    "meds",
    "prescription",
    "prescriptions",
    "prescribed",
    "drug",
    "drugs",
    "dose",
    "dosage",
    "pill",
    "pills",
    "refill",
];

const CARE_PLAN_PHRASES: &[&str] = &["care plan", "plan of care", "treatment plan"];
const CARE_PLAN_WORDS: &[&str] = &["goal", "goals", "regimen", "plan", "plans"];

const NOTE_WORDS: &[&str] = &[
    "note",
    "notes",
    "visit",
    "visits",
    "encounter",
    "appointment",
    "documented",
    "wrote",
];

const SUMMARY_WORDS: &[&str] = &["summary", "summarize", "summarise", "overview", "recap"];

const COMPARISON_PHRASES: &[&str] = &["compared to", "change over", "over time"];
const COMPARISON_WORDS: &[&str] = &[
    "compare",
    "comparison",
    "difference",
    "differences",
    "versus",
    "vs",
    "changed",
    "trend",
];

const ALL_PHRASES: &[&str] = &["all records", "everything", "full record", "entire record"];
const ALL_WORDS: &[&str] = &["history", "records"];

fn score(tokens: &[String], lowered: &str, words: &[&str], phrases: &[&str]) -> usize {
    let word_hits = tokens
        .iter()
        .filter(|token| words.contains(&token.as_str()))
        .count();
    let phrase_hits = phrases
        .iter()
        .filter(|phrase| lowered.contains(*phrase))
        .count();
    word_hits.saturating_add(phrase_hits)
}

pub fn classify(query: &str) -> QueryIntent {
    let lowered = query.to_lowercase();
    let tokens = tokenize(&lowered);

    let scores = [
        (
            QueryIntent::RetrieveMedications,
            score(&tokens, &lowered, MEDICATION_WORDS, &[]),
        ),
        (
            QueryIntent::RetrieveCarePlans,
            score(&tokens, &lowered, CARE_PLAN_WORDS, CARE_PLAN_PHRASES),
        ),
        (
            QueryIntent::RetrieveNotes,
            score(&tokens, &lowered, NOTE_WORDS, &[]),
        ),
        (
            QueryIntent::Summary,
            score(&tokens, &lowered, SUMMARY_WORDS, &[]),
        ),
        (
            QueryIntent::Comparison,
            score(&tokens, &lowered, COMPARISON_WORDS, COMPARISON_PHRASES),
        ),
        (
            QueryIntent::RetrieveAll,
            score(&tokens, &lowered, ALL_WORDS, ALL_PHRASES),
        ),
    ];

    let best = scores.iter().map(|&(_, count)| count).max().unwrap_or(0);
    if best == 0 {
        return QueryIntent::Unknown;
    }

    PRIORITY
        .into_iter()
        .find(|intent| {
            scores
                .iter()
                .any(|&(candidate, count)| candidate == *intent && count == best)
        })
        .unwrap_or(QueryIntent::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn medication_queries_classify_as_medications() {
        assert_eq!(classify("What medications?"), QueryIntent::RetrieveMedications);
        assert_eq!(
            classify("what was the patient prescribed"),
            QueryIntent::RetrieveMedications
        );
        assert_eq!(classify("current drug dosage"), QueryIntent::RetrieveMedications);
    }

    #[test]
    fn care_plan_queries_classify_as_care_plans() {
        assert_eq!(
            classify("show the care plan goals"),
            QueryIntent::RetrieveCarePlans
        );
        assert_eq!(
            classify("what is the treatment plan"),
            QueryIntent::RetrieveCarePlans
        );
    }

    #[test]
    fn note_and_summary_and_comparison() {
        assert_eq!(classify("notes from the last visit"), QueryIntent::RetrieveNotes);
        assert_eq!(classify("summarize the chart"), QueryIntent::Summary);
        assert_eq!(
            classify("compare blood pressure over time"),
            QueryIntent::Comparison
        );
    }

    #[test]
    fn unmatched_queries_are_unknown() {
        assert_eq!(classify("hello there"), QueryIntent::Unknown);
        assert_eq!(classify(""), QueryIntent::Unknown);
    }

    #[test]
    fn ties_resolve_in_priority_order() {
        // "medication" and "note" each score one hit; medications outrank
        // notes in the priority table.
        assert_eq!(
            classify("medication note"),
            QueryIntent::RetrieveMedications
        );
        // "plan" and "visit" tie; care plans outrank notes.
        assert_eq!(classify("plan for the visit"), QueryIntent::RetrieveCarePlans);
    }

    #[test]
    fn classification_is_deterministic() {
        for _ in 0..10 {
            assert_eq!(
                classify("summarize medication history"),
                classify("summarize medication history")
            );
        }
    }
}
