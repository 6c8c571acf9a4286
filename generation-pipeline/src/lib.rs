//! Extraction and answer assembly: prompt construction for the local
//! generation model, strict parsing of its JSON extractions, citation
//! validation against source chunks, confidence scoring and provenance
//! formatting. Apart from the generator call itself (owned by the
//! orchestrator) everything here is pure.

pub mod citation;
pub mod confidence;
pub mod dates;
pub mod extraction;
pub mod prompt;
pub mod provenance;

pub use citation::{validate_extractions, CitationIssue, IssueSeverity, ValidatedExtraction};
pub use confidence::{score_confidence, ConfidenceLabel, ConfidenceReport};
pub use extraction::{parse_extractions, Extraction, ExtractionContent, Provenance};
pub use prompt::{build_prompt, PromptMode, PromptPlan};
pub use provenance::{format_provenance, provenance_from_candidates, ProvenanceEntry, SortOrder};
