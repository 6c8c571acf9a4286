//! Dictionary- and regex-based clinical entity extraction. Date phrases are
//! delegated to the temporal parser; the remaining entity kinds come from
//! fixed dictionaries so extraction stays deterministic and offline.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::temporal::TemporalFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Medication,
    Condition,
    Symptom,
    Date,
    Person,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub text: String,
    pub entity_type: EntityType,
    pub normalized: String,
    pub confidence: f32,
    /// Byte offset of the match in the query, when known.
    pub position: Option<usize>,
}

const MEDICATIONS: &[&str] = &[
    "acetaminophen",
    "albuterol",
    "amlodipine",
    "amoxicillin",
    "apixaban",
    "aspirin",
    "atorvastatin",
    "azithromycin",
    "citalopram",
    "clopidogrel",
    "doxycycline",
    "duloxetine",
    "escitalopram",
    "fluoxetine",
    "fluticasone",
    "furosemide",
    "gabapentin",
    "hydrochlorothiazide",
    "ibuprofen",
    "insulin",
    "levothyroxine",
    "lisinopril",
    "losartan",
    "metformin",
    "metoprolol",
    "montelukast",
    "omeprazole",
    "oxycodone",
    "pantoprazole",
    "prednisone",
    "sertraline",
    "simvastatin",
    "tramadol",
    "warfarin",
];

const CONDITIONS: &[&str] = &[
    "anemia",
    "anxiety",
    "arthritis",
    "asthma",
    "atrial fibrillation",
    "cancer",
    "chronic kidney disease",
    "copd",
    "coronary artery disease",
    "depression",
    "diabetes",
    "heart failure",
    "hyperlipidemia",
    "hypertension",
    "hypothyroidism",
    "migraine",
    "obesity",
    "osteoporosis",
    "pneumonia",
    "stroke",
    "type 2 diabetes",
];

const SYMPTOMS: &[&str] = &[
    "chest pain",
    "constipation",
    "cough",
    "diarrhea",
    "dizziness",
    "fatigue",
    "fever",
    "headache",
    "insomnia",
    "nausea",
    "pain",
    "palpitations",
    "rash",
    "shortness of breath",
    "swelling",
    "vomiting",
];

/// Fixed medical abbreviation expansions applied during normalization.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("bid", "twice daily"),
    ("tid", "three times daily"),
    ("qid", "four times daily"),
    ("qd", "daily"),
    ("prn", "as needed"),
    ("po", "by mouth"),
    ("htn", "hypertension"),
    ("dm", "diabetes mellitus"),
    ("t2dm", "type 2 diabetes mellitus"),
    ("hld", "hyperlipidemia"),
    ("cad", "coronary artery disease"),
    ("chf", "congestive heart failure"),
    ("ckd", "chronic kidney disease"),
    ("copd", "chronic obstructive pulmonary disease"),
    ("uti", "urinary tract infection"),
    ("sob", "shortness of breath"),
    ("bp", "blood pressure"),
];

/// Inflection suffixes stripped during normalization, longest first.
const SUFFIXES: &[&str] = &["ness", "ment", "ing", "ed", "es", "ly", "s"];

static PERSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:Dr\.?|Doctor|Nurse)\s+([A-Z][a-z]+)").expect("valid person regex")
});

/// Normalize an entity surface form: lowercase and trim, expand a known
/// abbreviation, otherwise strip one inflection suffix when the remaining
/// stem keeps at least three characters.
pub fn normalize(text: &str) -> String {
    let lowered = text.trim().to_lowercase();

    if let Some(&(_, expansion)) = ABBREVIATIONS
        .iter()
        .find(|&&(abbrev, _)| abbrev == lowered)
    {
        return expansion.to_string();
    }

    for suffix in SUFFIXES {
        if let Some(stem) = lowered.strip_suffix(suffix) {
            if stem.chars().count() >= 3 {
                return stem.to_string();
            }
        }
    }

    lowered
}

fn dictionary_matches(
    lowered: &str,
    terms: &[&str],
    entity_type: EntityType,
    confidence: f32,
    out: &mut Vec<Entity>,
) {
    for term in terms {
        let mut search_from = 0usize;
        while let Some(found) = lowered.get(search_from..).and_then(|rest| rest.find(term)) {
            let start = search_from.saturating_add(found);
            let end = start.saturating_add(term.len());

            let boundary_before = start == 0
                || lowered[..start]
                    .chars()
                    .next_back()
                    .is_none_or(|c| !c.is_alphanumeric());
            let boundary_after = lowered[end..]
                .chars()
                .next()
                .is_none_or(|c| !c.is_alphanumeric());

            if boundary_before && boundary_after {
                out.push(Entity {
                    text: term.to_string(),
                    entity_type,
                    normalized: normalize(term),
                    confidence,
                    position: Some(start),
                });
            }
            search_from = end;
        }
    }
}

fn overlaps(a: &Entity, b: &Entity) -> bool {
    match (a.position, b.position) {
        (Some(a_start), Some(b_start)) => {
            let a_end = a_start.saturating_add(a.text.len());
            let b_end = b_start.saturating_add(b.text.len());
            a_start < b_end && b_start < a_end
        }
        _ => false,
    }
}

/// Extract entities from a query. Overlapping matches resolve to the
/// higher-confidence entity, with the longer surface form breaking ties so
/// "type 2 diabetes" wins over "diabetes".
pub fn extract(query: &str, temporal: Option<&TemporalFilter>) -> Vec<Entity> {
    let lowered = query.to_lowercase();
    let mut entities = Vec::new();

    dictionary_matches(&lowered, MEDICATIONS, EntityType::Medication, 0.9, &mut entities);
    dictionary_matches(&lowered, CONDITIONS, EntityType::Condition, 0.85, &mut entities);
    dictionary_matches(&lowered, SYMPTOMS, EntityType::Symptom, 0.8, &mut entities);

    for caps in PERSON.captures_iter(query) {
        if let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) {
            entities.push(Entity {
                text: whole.as_str().to_string(),
                entity_type: EntityType::Person,
                normalized: name.as_str().to_lowercase(),
                confidence: 0.8,
                position: Some(whole.start()),
            });
        }
    }

    if let Some(filter) = temporal {
        entities.push(Entity {
            text: filter.time_reference.clone(),
            entity_type: EntityType::Date,
            normalized: filter.time_reference.clone(),
            confidence: 0.95,
            position: lowered
                .find(&filter.time_reference.to_lowercase()),
        });
    }

    // Overlap resolution: prefer confidence, then surface length.
    entities.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.text.len().cmp(&a.text.len()))
            .then_with(|| a.position.cmp(&b.position))
    });
    let mut resolved: Vec<Entity> = Vec::new();
    for entity in entities {
        if !resolved.iter().any(|kept| overlaps(kept, &entity)) {
            resolved.push(entity);
        }
    }
    resolved.sort_by(|a, b| a.position.cmp(&b.position));

    resolved
}
