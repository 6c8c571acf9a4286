//! Intent- and entity-driven query expansion. Expansion terms feed the
//! lexical leg of hybrid search; each carries a weight of at most 1.0 that
//! scales its contribution there.

use serde::{Deserialize, Serialize};

use crate::{
    entities::{Entity, EntityType},
    intent::QueryIntent,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpansionTerm {
    pub term: String,
    pub weight: f32,
}

const MEDICATION_EXPANSIONS: &[(&str, f32)] = &[
    ("medication", 1.0),
    ("prescription", 0.9),
    ("prescribed", 0.9),
    ("drug", 0.8),
    ("dose", 0.7),
    ("dosage", 0.7),
];

const CARE_PLAN_EXPANSIONS: &[(&str, f32)] = &[
    ("care plan", 1.0),
    ("treatment", 0.9),
    ("plan", 0.8),
    ("goal", 0.7),
];

const NOTE_EXPANSIONS: &[(&str, f32)] = &[
    ("note", 1.0),
    ("visit", 0.8),
    ("encounter", 0.7),
    ("assessment", 0.6),
];

/// Synonyms for frequently queried conditions and symptoms.
const ENTITY_SYNONYMS: &[(&str, &[(&str, f32)])] = &[
    (
        "hypertension",
        &[("high blood pressure", 0.9), ("blood pressure", 0.7)],
    ),
    (
        "diabet",
        &[("type 2 diabetes", 0.8), ("blood sugar", 0.7), ("glucose", 0.6)],
    ),
    ("hyperlipidemia", &[("cholesterol", 0.8), ("lipid", 0.7)]),
    ("asthma", &[("inhaler", 0.7), ("wheezing", 0.6)]),
    (
        "shortness of breath",
        &[("dyspnea", 0.8), ("breathing difficulty", 0.7)],
    ),
    ("chest pain", &[("angina", 0.7)]),
    ("metformin", &[("glucophage", 0.8)]),
    ("atorvastatin", &[("lipitor", 0.8)]),
    ("levothyroxine", &[("synthroid", 0.8)]),
];

fn push_unique(terms: &mut Vec<ExpansionTerm>, term: &str, weight: f32) {
    let weight = weight.min(1.0);
    if let Some(existing) = terms.iter_mut().find(|t| t.term == term) {
        existing.weight = existing.weight.max(weight);
    } else {
        terms.push(ExpansionTerm {
            term: term.to_string(),
            weight,
        });
    }
}

pub fn expand(intent: QueryIntent, entities: &[Entity]) -> Vec<ExpansionTerm> {
    let mut terms = Vec::new();

    let intent_expansions: &[(&str, f32)] = match intent {
        QueryIntent::RetrieveMedications => MEDICATION_EXPANSIONS,
        QueryIntent::RetrieveCarePlans => CARE_PLAN_EXPANSIONS,
        QueryIntent::RetrieveNotes => NOTE_EXPANSIONS,
        _ => &[],
    };
    for &(term, weight) in intent_expansions {
        push_unique(&mut terms, term, weight);
    }

    for entity in entities {
        if matches!(entity.entity_type, EntityType::Date | EntityType::Person) {
            continue;
        }
        for &(key, synonyms) in ENTITY_SYNONYMS {
            if entity.normalized == key || entity.normalized.contains(key) {
                for &(synonym, weight) in synonyms {
                    push_unique(&mut terms, synonym, weight);
                }
            }
        }
    }

    terms
}
