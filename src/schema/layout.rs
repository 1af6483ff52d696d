// ==============================================================================
// schema/layout.rs - Annotation Bit Layout
// ==============================================================================
// Description: Computes per-version bit offsets and condenses annotations into them
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Layout (low bits first):
//   [summary:8][consequence_type:N][biotype:N][clinical_significance:N]
//   [clinical_source:N][population_frequency one-hot buckets per population]
//
// Every field is a bitmask, so merging two encoded annotations is a bitwise
// OR. The merge is commutative, associative and idempotent.
// ==============================================================================

use serde::{Deserialize, Serialize};

use super::bits::mask;
use super::configuration::{CategoricalField, SampleIndexConfiguration};
use crate::error::{IndexError, Result};
use crate::models::VariantAnnotation;

pub const SUMMARY_WIDTH: u32 = 8;

/// Summary flags, always in the lowest byte
pub mod summary {
    pub const INTERGENIC: u64 = 1 << 0;
    pub const MISSENSE: u64 = 1 << 1;
    pub const LOF: u64 = 1 << 2;
    pub const PROTEIN_CODING: u64 = 1 << 3;
    pub const RARE: u64 = 1 << 4;
    pub const CLINICAL: u64 = 1 << 5;
    pub const SPLICE: u64 = 1 << 6;
    pub const UTR: u64 = 1 << 7;

    pub const NAMES: [&str; 8] = [
        "intergenic",
        "missense",
        "lof",
        "protein_coding",
        "rare",
        "clinical",
        "splice",
        "utr",
    ];
}

/// Population frequency below which a variant counts as rare
const RARE_FREQUENCY: f64 = 0.01;

const LOF_TERMS: [&str; 11] = [
    "frameshift_variant",
    "stop_gained",
    "stop_lost",
    "start_lost",
    "splice_acceptor_variant",
    "splice_donor_variant",
    "transcript_ablation",
    "transcript_amplification",
    "initiator_codon_variant",
    "incomplete_terminal_codon_variant",
    "feature_truncation",
];

const SPLICE_TERMS: [&str; 3] = [
    "splice_region_variant",
    "splice_acceptor_variant",
    "splice_donor_variant",
];

const UTR_TERMS: [&str; 2] = ["3_prime_UTR_variant", "5_prime_UTR_variant"];

/// Bit range of one field inside the annotation word
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpan {
    pub name: String,
    pub offset: u32,
    pub width: u32,
}

impl FieldSpan {
    pub fn extract(&self, bits: u64) -> u64 {
        (bits >> self.offset) & mask(self.width)
    }

    fn bit(&self, index: usize) -> u64 {
        1u64 << (self.offset + index as u32)
    }
}

/// Bit layout derived from a [`SampleIndexConfiguration`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLayout {
    fields: Vec<FieldSpan>,
    width: u32,
}

impl FieldLayout {
    /// Assign sequential offsets to every configured field
    ///
    /// # Returns
    /// * `Err(IndexError::Schema)` - Layout wider than 64 bits
    pub fn from_configuration(config: &SampleIndexConfiguration) -> Result<Self> {
        let mut fields = Vec::new();
        let mut offset = 0u32;
        let mut push = |name: String, width: u32| {
            fields.push(FieldSpan { name, offset, width });
            offset += width;
        };

        push("summary".to_string(), SUMMARY_WIDTH);
        for (name, field) in categorical_fields(config) {
            push(name.to_string(), field.width());
        }
        if let Some(pf) = &config.population_frequency {
            for population in &pf.populations {
                push(format!("pop_freq:{}", population.key()), pf.buckets() as u32);
            }
        }

        if offset > 64 {
            return Err(IndexError::Schema(format!(
                "Annotation layout needs {} bits, at most 64 supported",
                offset
            )));
        }
        Ok(Self { fields, width: offset })
    }

    /// Total bits per variant
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn fields(&self) -> &[FieldSpan] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpan> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Condense a full annotation into the layout's bit word
    pub fn encode(&self, config: &SampleIndexConfiguration, annotation: &VariantAnnotation) -> u64 {
        let mut bits = summary_bits(config, annotation);

        let terms: Vec<&str> = annotation
            .consequence_types
            .iter()
            .flat_map(|ct| ct.sequence_ontology_terms.iter().map(String::as_str))
            .collect();
        let biotypes: Vec<&str> = annotation
            .consequence_types
            .iter()
            .filter_map(|ct| ct.biotype.as_deref())
            .collect();
        let significances: Vec<&str> =
            annotation.clinical.iter().map(|c| c.significance.as_str()).collect();
        let sources: Vec<&str> = annotation.clinical.iter().map(|c| c.source.as_str()).collect();

        for (name, field) in categorical_fields(config) {
            let values = match name {
                "consequence_type" => &terms,
                "biotype" => &biotypes,
                "clinical_significance" => &significances,
                _ => &sources,
            };
            if let Some(span) = self.field(name) {
                for value in values {
                    if let Some(index) = field.index_of(value) {
                        bits |= span.bit(index);
                    }
                }
            }
        }

        if let Some(pf) = &config.population_frequency {
            for population in &pf.populations {
                let Some(span) = self.field(&format!("pop_freq:{}", population.key())) else {
                    continue;
                };
                // Absent population counts as frequency 0
                let frequency = annotation
                    .population_frequencies
                    .iter()
                    .find(|f| f.study == population.study && f.population == population.population)
                    .map(|f| f.alt_allele_freq)
                    .unwrap_or(0.0);
                bits |= span.bit(pf.bucket(frequency));
            }
        }

        bits
    }
}

/// Merge two encoded annotations
pub fn merge(a: u64, b: u64) -> u64 {
    a | b
}

fn categorical_fields(
    config: &SampleIndexConfiguration,
) -> impl Iterator<Item = (&'static str, &CategoricalField)> {
    [
        ("consequence_type", config.consequence_type.as_ref()),
        ("biotype", config.biotype.as_ref()),
        ("clinical_significance", config.clinical_significance.as_ref()),
        ("clinical_source", config.clinical_source.as_ref()),
    ]
    .into_iter()
    .filter_map(|(name, field)| field.map(|f| (name, f)))
}

fn summary_bits(config: &SampleIndexConfiguration, annotation: &VariantAnnotation) -> u64 {
    let mut bits = 0u64;
    let has_term = |set: &[&str]| {
        annotation.consequence_types.iter().any(|ct| {
            ct.sequence_ontology_terms
                .iter()
                .any(|t| set.iter().any(|s| s.eq_ignore_ascii_case(t)))
        })
    };

    let genic = annotation
        .consequence_types
        .iter()
        .any(|ct| ct.gene_name.is_some() || ct.biotype.is_some());
    if !genic {
        bits |= summary::INTERGENIC;
    }
    if has_term(&["missense_variant"]) {
        bits |= summary::MISSENSE;
    }
    if has_term(&LOF_TERMS) {
        bits |= summary::LOF;
    }
    if annotation
        .consequence_types
        .iter()
        .any(|ct| ct.biotype.as_deref() == Some("protein_coding"))
    {
        bits |= summary::PROTEIN_CODING;
    }
    if has_term(&SPLICE_TERMS) {
        bits |= summary::SPLICE;
    }
    if has_term(&UTR_TERMS) {
        bits |= summary::UTR;
    }
    if !annotation.clinical.is_empty() {
        bits |= summary::CLINICAL;
    }

    let rare = match &config.population_frequency {
        Some(pf) => pf.populations.iter().all(|population| {
            annotation
                .population_frequencies
                .iter()
                .filter(|f| f.study == population.study && f.population == population.population)
                .all(|f| f.alt_allele_freq < RARE_FREQUENCY)
        }),
        None => false,
    };
    if rare {
        bits |= summary::RARE;
    }

    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClinicalEvidence, ConsequenceType, PopulationFrequency};

    fn missense_annotation(freq: f64) -> VariantAnnotation {
        VariantAnnotation {
            consequence_types: vec![ConsequenceType {
                gene_name: Some("BRCA2".into()),
                biotype: Some("protein_coding".into()),
                sequence_ontology_terms: vec!["missense_variant".into()],
            }],
            population_frequencies: vec![PopulationFrequency {
                study: "GNOMAD_GENOMES".into(),
                population: "ALL".into(),
                alt_allele_freq: freq,
            }],
            clinical: vec![ClinicalEvidence {
                source: "clinvar".into(),
                significance: "pathogenic".into(),
            }],
        }
    }

    #[test]
    fn test_default_layout_fits() {
        let config = SampleIndexConfiguration::default_configuration();
        let layout = FieldLayout::from_configuration(&config).unwrap();
        // 8 summary + 24 ct + 8 biotype + 5 clinsig + 2 source + 2 * 8 buckets
        assert_eq!(layout.width(), 63);
        assert_eq!(layout.field("consequence_type").unwrap().offset, 8);
    }

    #[test]
    fn test_layout_too_wide() {
        let mut config = SampleIndexConfiguration::default_configuration();
        config
            .population_frequency
            .as_mut()
            .unwrap()
            .thresholds
            .push(0.5);
        assert!(FieldLayout::from_configuration(&config).is_err());
    }

    #[test]
    fn test_encode_missense() {
        let config = SampleIndexConfiguration::default_configuration();
        let layout = FieldLayout::from_configuration(&config).unwrap();
        let bits = layout.encode(&config, &missense_annotation(0.0003));

        let summary_bits = layout.field("summary").unwrap().extract(bits);
        assert_ne!(summary_bits & summary::MISSENSE, 0);
        assert_ne!(summary_bits & summary::PROTEIN_CODING, 0);
        assert_ne!(summary_bits & summary::RARE, 0);
        assert_ne!(summary_bits & summary::CLINICAL, 0);
        assert_eq!(summary_bits & summary::INTERGENIC, 0);
        assert_eq!(summary_bits & summary::LOF, 0);

        // missense_variant is the first consequence value
        assert_eq!(layout.field("consequence_type").unwrap().extract(bits), 1);
        // pathogenic is the fifth clinical significance value
        assert_eq!(layout.field("clinical_significance").unwrap().extract(bits), 1 << 4);

        // 0.0003 falls in bucket 2 of the default thresholds; 1kG absent -> bucket 0
        let gnomad = layout.field("pop_freq:GNOMAD_GENOMES:ALL").unwrap();
        assert_eq!(gnomad.extract(bits), 1 << 2);
        let kg = layout.field("pop_freq:1kG_phase3:ALL").unwrap();
        assert_eq!(kg.extract(bits), 1);
    }

    #[test]
    fn test_common_variant_not_rare() {
        let config = SampleIndexConfiguration::default_configuration();
        let layout = FieldLayout::from_configuration(&config).unwrap();
        let bits = layout.encode(&config, &missense_annotation(0.2));
        assert_eq!(bits & summary::RARE, 0);
    }

    #[test]
    fn test_intergenic() {
        let config = SampleIndexConfiguration::default_configuration();
        let layout = FieldLayout::from_configuration(&config).unwrap();
        let bits = layout.encode(&config, &VariantAnnotation::default());
        assert_ne!(bits & summary::INTERGENIC, 0);
    }

    #[test]
    fn test_merge_is_idempotent_and_commutative() {
        let a = 0b1010_0001u64;
        let b = 0b0110_0000u64;
        assert_eq!(merge(a, b), merge(b, a));
        assert_eq!(merge(merge(a, b), b), merge(a, b));
    }
}
