// ==============================================================================
// models.rs - Variant Data Models
// ==============================================================================
// Description: Variants, regions, trios and annotations shared across the engine
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::IndexError;

/// Numeric sample identifier assigned by the metadata store
pub type SampleId = u32;

/// Variant classification used for stage skip rules and position keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantType {
    Snv,
    Mnv,
    Indel,
    Symbolic,
    NoVariation,
}

impl VariantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantType::Snv => "SNV",
            VariantType::Mnv => "MNV",
            VariantType::Indel => "INDEL",
            VariantType::Symbolic => "SYMBOLIC",
            VariantType::NoVariation => "NO_VARIATION",
        }
    }

    /// Infer the type from the reference and alternate alleles
    pub fn infer(reference: &str, alternate: &str) -> Self {
        if alternate.is_empty() && reference.is_empty() {
            return VariantType::NoVariation;
        }
        if alternate == "." || alternate == reference {
            return VariantType::NoVariation;
        }
        if alternate.starts_with('<')
            || alternate.contains('[')
            || alternate.contains(']')
            || alternate == "*"
        {
            return VariantType::Symbolic;
        }
        match (reference.len(), alternate.len()) {
            (1, 1) => VariantType::Snv,
            (r, a) if r == a => VariantType::Mnv,
            _ => VariantType::Indel,
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariantType {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SNV" | "SNP" => Ok(VariantType::Snv),
            "MNV" | "MNP" => Ok(VariantType::Mnv),
            "INDEL" => Ok(VariantType::Indel),
            "SYMBOLIC" => Ok(VariantType::Symbolic),
            "NO_VARIATION" => Ok(VariantType::NoVariation),
            other => Err(IndexError::InvalidInput(format!("Unknown variant type: {}", other))),
        }
    }
}

/// A single genomic variant (1-based, inclusive coordinates)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
    pub reference: String,
    pub alternate: String,
    #[serde(rename = "type")]
    pub variant_type: VariantType,
}

impl Variant {
    /// Build a variant, deriving end and type from the alleles
    ///
    /// An insertion (empty reference) ends one base before its start.
    pub fn new(
        chromosome: impl Into<String>,
        start: u64,
        reference: impl Into<String>,
        alternate: impl Into<String>,
    ) -> Self {
        let reference = reference.into();
        let alternate = alternate.into();
        let end = (start + reference.len() as u64).saturating_sub(1);
        let variant_type = VariantType::infer(&reference, &alternate);
        Self {
            chromosome: chromosome.into(),
            start,
            end,
            reference,
            alternate,
            variant_type,
        }
    }

    /// End coordinate used for overlap checks (never before start)
    pub fn inclusive_end(&self) -> u64 {
        self.end.max(self.start)
    }

    pub fn overlaps(&self, other: &Variant) -> bool {
        self.chromosome == other.chromosome
            && self.start <= other.inclusive_end()
            && other.start <= self.inclusive_end()
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.chromosome,
            self.start,
            if self.reference.is_empty() { "-" } else { &self.reference },
            if self.alternate.is_empty() { "-" } else { &self.alternate },
        )
    }
}

/// Genomic region, 1-based inclusive
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Region {
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn new(chromosome: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            chromosome: chromosome.into(),
            start,
            end,
        }
    }

    /// Whole chromosome
    pub fn chromosome(chromosome: impl Into<String>) -> Self {
        Self::new(chromosome, 0, u64::MAX)
    }

    pub fn contains(&self, chromosome: &str, position: u64) -> bool {
        self.chromosome == chromosome && self.start <= position && position <= self.end
    }

    pub fn overlaps_range(&self, chromosome: &str, start: u64, end: u64) -> bool {
        self.chromosome == chromosome && self.start <= end && start <= self.end
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == 0 && self.end == u64::MAX {
            write!(f, "{}", self.chromosome)
        } else {
            write!(f, "{}:{}-{}", self.chromosome, self.start, self.end)
        }
    }
}

impl FromStr for Region {
    type Err = IndexError;

    /// Parse "chr", "chr:pos" or "chr:start-end"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IndexError::InvalidInput(format!("Invalid region: {}", s));
        match s.split_once(':') {
            None if !s.is_empty() => Ok(Region::chromosome(s)),
            None => Err(invalid()),
            Some((chromosome, range)) => {
                let (start, end) = match range.split_once('-') {
                    Some((a, b)) => (
                        a.trim().parse::<u64>().map_err(|_| invalid())?,
                        b.trim().parse::<u64>().map_err(|_| invalid())?,
                    ),
                    None => {
                        let pos = range.trim().parse::<u64>().map_err(|_| invalid())?;
                        (pos, pos)
                    }
                };
                if chromosome.is_empty() || start > end {
                    return Err(invalid());
                }
                Ok(Region::new(chromosome, start, end))
            }
        }
    }
}

/// Child with up to two parents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trio {
    pub child: SampleId,
    pub father: Option<SampleId>,
    pub mother: Option<SampleId>,
}

impl Trio {
    pub fn new(child: SampleId, father: Option<SampleId>, mother: Option<SampleId>) -> Self {
        Self { child, father, mother }
    }
}

/// Consequence of a variant on one transcript
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsequenceType {
    #[serde(default)]
    pub gene_name: Option<String>,
    #[serde(default)]
    pub biotype: Option<String>,
    #[serde(default)]
    pub sequence_ontology_terms: Vec<String>,
}

/// Alternate allele frequency in one population
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationFrequency {
    pub study: String,
    pub population: String,
    pub alt_allele_freq: f64,
}

/// Clinical assertion from an external source (ClinVar, COSMIC, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalEvidence {
    pub source: String,
    pub significance: String,
}

/// Full annotation of a variant, condensed by the schema into index bits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantAnnotation {
    #[serde(default)]
    pub consequence_types: Vec<ConsequenceType>,
    #[serde(default)]
    pub population_frequencies: Vec<PopulationFrequency>,
    #[serde(default)]
    pub clinical: Vec<ClinicalEvidence>,
}

/// Variant as delivered by the annotated-variant stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedVariant {
    pub variant: Variant,

    /// Genotype string per sample ("0/1", "1|1", "./.")
    #[serde(default)]
    pub genotypes: BTreeMap<SampleId, String>,

    #[serde(default)]
    pub annotation: Option<VariantAnnotation>,
}

impl AnnotatedVariant {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            genotypes: BTreeMap::new(),
            annotation: None,
        }
    }

    pub fn with_genotype(mut self, sample: SampleId, genotype: impl Into<String>) -> Self {
        self.genotypes.insert(sample, genotype.into());
        self
    }

    pub fn with_annotation(mut self, annotation: VariantAnnotation) -> Self {
        self.annotation = Some(annotation);
        self
    }
}

/// Raw variant record from an input file, before staging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub variant: Variant,
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub quality: Option<f32>,
    #[serde(default)]
    pub filter: Option<String>,

    /// Genotype string per sample name, in file column order
    #[serde(default)]
    pub genotypes: Vec<(String, String)>,
}

impl VariantRecord {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            ids: Vec::new(),
            quality: None,
            filter: None,
            genotypes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_type_inference() {
        assert_eq!(VariantType::infer("A", "G"), VariantType::Snv);
        assert_eq!(VariantType::infer("AC", "GT"), VariantType::Mnv);
        assert_eq!(VariantType::infer("A", "AT"), VariantType::Indel);
        assert_eq!(VariantType::infer("", "T"), VariantType::Indel);
        assert_eq!(VariantType::infer("A", "<DEL>"), VariantType::Symbolic);
        assert_eq!(VariantType::infer("A", "."), VariantType::NoVariation);
    }

    #[test]
    fn test_variant_end_and_overlap() {
        let snv = Variant::new("1", 100, "A", "G");
        assert_eq!(snv.end, 100);

        let deletion = Variant::new("1", 98, "ACGT", "A");
        assert_eq!(deletion.end, 101);
        assert!(deletion.overlaps(&snv));

        // Insertion ends before its start but still overlaps its anchor position
        let insertion = Variant::new("1", 100, "", "TT");
        assert_eq!(insertion.end, 99);
        assert!(insertion.overlaps(&snv));

        let other_chrom = Variant::new("2", 100, "A", "G");
        assert!(!other_chrom.overlaps(&snv));
        assert!(!Variant::new("1", 102, "C", "T").overlaps(&snv));
    }

    #[test]
    fn test_region_parse() {
        assert_eq!("1:10-20".parse::<Region>().unwrap(), Region::new("1", 10, 20));
        assert_eq!("X:5".parse::<Region>().unwrap(), Region::new("X", 5, 5));
        assert_eq!("22".parse::<Region>().unwrap(), Region::chromosome("22"));
        assert!("1:20-10".parse::<Region>().is_err());
        assert!(":1-2".parse::<Region>().is_err());
    }

    #[test]
    fn test_variant_type_str() {
        assert_eq!(VariantType::NoVariation.as_str(), "NO_VARIATION");
        assert_eq!("symbolic".parse::<VariantType>().unwrap(), VariantType::Symbolic);
        assert!("bogus".parse::<VariantType>().is_err());
    }
}
