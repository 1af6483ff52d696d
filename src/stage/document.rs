// ==============================================================================
// stage/document.rs - Stage Documents
// ==============================================================================
// Description: Staged variant document keyed by position and alleles
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::Variant;

/// Document key: `"{chrom:<2}:{start:010}:{ref}:{alt}"`
///
/// Keys sort by chromosome (lexicographic) then by start (numeric).
pub fn stage_id(chromosome: &str, start: u64, reference: &str, alternate: &str) -> String {
    format!("{:<2}:{:010}:{}:{}", chromosome, start, reference, alternate)
}

/// Tag recorded for every (study, file) that contributed to a document
pub fn study_file_tag(study: &str, file: &str) -> String {
    format!("{}_{}", study, file)
}

/// Per-study content of a stage document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyStage {
    /// Study not yet merged for this variant
    pub new_study: bool,

    /// Binary variant payloads per file. `None` once merged and cleaned.
    pub files: BTreeMap<String, Option<Vec<Vec<u8>>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDocument {
    pub id: String,
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
    pub reference: String,
    pub alternate: String,
    pub study_files: BTreeSet<String>,
    pub studies: BTreeMap<String, StudyStage>,
}

impl StageDocument {
    /// Empty document for a variant, as created by the first insert
    pub fn new(variant: &Variant) -> Self {
        Self {
            id: stage_id(
                &variant.chromosome,
                variant.start,
                &variant.reference,
                &variant.alternate,
            ),
            chromosome: variant.chromosome.clone(),
            start: variant.start,
            end: variant.end,
            reference: variant.reference.clone(),
            alternate: variant.alternate.clone(),
            study_files: BTreeSet::new(),
            studies: BTreeMap::new(),
        }
    }

    pub fn variant(&self) -> Variant {
        let mut variant = Variant::new(
            self.chromosome.clone(),
            self.start,
            self.reference.clone(),
            self.alternate.clone(),
        );
        variant.end = self.end;
        variant
    }

    /// Same chromosome and intersecting coordinates
    pub fn overlaps(&self, other: &StageDocument) -> bool {
        self.chromosome == other.chromosome
            && self.start <= other.end.max(other.start)
            && other.start <= self.end.max(self.start)
    }

    /// Payloads of one study/file, empty if absent or cleaned
    pub fn payloads(&self, study: &str, file: &str) -> &[Vec<u8>] {
        self.studies
            .get(study)
            .and_then(|s| s.files.get(file))
            .and_then(|f| f.as_deref())
            .unwrap_or(&[])
    }

    pub fn has_study(&self, study: &str) -> bool {
        self.studies.contains_key(study)
    }
}
