// ==============================================================================
// schema/configuration.rs - Sample Index Configuration
// ==============================================================================
// Description: Configurable value tables and thresholds behind the index layout
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{IndexError, Result};

/// Default chunk size (bases per index entry)
pub const DEFAULT_CHUNK_SIZE: u64 = 1_000_000;

/// Largest chunk size a position key can address (24-bit relative start)
pub const MAX_CHUNK_SIZE: u64 = 1 << 24;

const DEFAULT_THRESHOLDS: [f64; 7] = [0.0000001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05];
const BACKWARD_COMPATIBLE_THRESHOLDS: [f64; 3] = [0.001, 0.005, 0.01];

/// Population whose allele frequency is bucketed into the index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Population {
    pub study: String,
    pub population: String,
}

impl Population {
    pub fn new(study: &str, population: &str) -> Self {
        Self {
            study: study.to_string(),
            population: population.to_string(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.study, self.population)
    }
}

/// Population-frequency ranges shared by every configured population
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationFrequencyConfiguration {
    #[serde(default)]
    pub populations: Vec<Population>,

    /// Ascending upper bounds; N thresholds give N + 1 buckets
    #[serde(default)]
    pub thresholds: Vec<f64>,
}

impl PopulationFrequencyConfiguration {
    pub fn buckets(&self) -> usize {
        self.thresholds.len() + 1
    }

    /// Bucket index of a frequency: first threshold strictly above it
    pub fn bucket(&self, frequency: f64) -> usize {
        self.thresholds
            .iter()
            .position(|t| frequency < *t)
            .unwrap_or(self.thresholds.len())
    }
}

/// Multi-valued categorical field: one bit per value
///
/// `value_mapping` folds several raw terms into one indexed value
/// (e.g. "utr" <- 3_prime_UTR_variant, 5_prime_UTR_variant).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoricalField {
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub value_mapping: BTreeMap<String, Vec<String>>,
}

impl CategoricalField {
    pub fn new(values: &[&str]) -> Self {
        Self {
            values: values.iter().map(|v| v.to_string()).collect(),
            value_mapping: BTreeMap::new(),
        }
    }

    pub fn with_mapping(mut self, value: &str, terms: &[&str]) -> Self {
        self.value_mapping
            .insert(value.to_string(), terms.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn width(&self) -> u32 {
        self.values.len() as u32
    }

    /// Bit index of a raw term, if indexed
    pub fn index_of(&self, term: &str) -> Option<usize> {
        self.values.iter().position(|value| {
            value.eq_ignore_ascii_case(term)
                || self
                    .value_mapping
                    .get(value)
                    .map(|terms| terms.iter().any(|t| t.eq_ignore_ascii_case(term)))
                    .unwrap_or(false)
        })
    }

    fn validate(&self, name: &str) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for value in &self.values {
            if !seen.insert(value.to_lowercase()) {
                return Err(IndexError::Schema(format!(
                    "Duplicate value '{}' in field '{}'",
                    value, name
                )));
            }
        }
        for key in self.value_mapping.keys() {
            if !self.values.contains(key) {
                return Err(IndexError::Schema(format!(
                    "Mapping for unknown value '{}' in field '{}'",
                    key, name
                )));
            }
        }
        Ok(())
    }
}

/// Versioned configuration of the sample index layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleIndexConfiguration {
    pub chunk_size: u64,
    pub population_frequency: Option<PopulationFrequencyConfiguration>,
    pub consequence_type: Option<CategoricalField>,
    pub biotype: Option<CategoricalField>,
    pub clinical_significance: Option<CategoricalField>,
    pub clinical_source: Option<CategoricalField>,

    /// Genotype strings never indexed, in addition to fully missing calls
    pub excluded_genotypes: Vec<String>,

    pub annotation_index_enabled: bool,
    pub family_index_enabled: bool,
}

impl Default for SampleIndexConfiguration {
    fn default() -> Self {
        Self::default_configuration()
    }
}

impl SampleIndexConfiguration {
    /// Configuration used for new studies
    pub fn default_configuration() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            population_frequency: Some(PopulationFrequencyConfiguration {
                populations: default_populations(),
                thresholds: DEFAULT_THRESHOLDS.to_vec(),
            }),
            consequence_type: Some(CategoricalField::new(&[
                "missense_variant",
                "frameshift_variant",
                "inframe_deletion",
                "inframe_insertion",
                "start_lost",
                "stop_gained",
                "stop_lost",
                "splice_acceptor_variant",
                "splice_donor_variant",
                "transcript_ablation",
                "transcript_amplification",
                "initiator_codon_variant",
                "splice_region_variant",
                "incomplete_terminal_codon_variant",
                "feature_truncation",
                "synonymous_variant",
                "regulatory_region_variant",
                "TF_binding_site_variant",
                "mature_miRNA_variant",
                "upstream_gene_variant",
                "downstream_gene_variant",
                "3_prime_UTR_variant",
                "5_prime_UTR_variant",
                "intron_variant",
            ])),
            biotype: Some(default_biotype()),
            clinical_significance: Some(CategoricalField::new(&[
                "benign",
                "likely_benign",
                "uncertain_significance",
                "likely_pathogenic",
                "pathogenic",
            ])),
            clinical_source: Some(CategoricalField::new(&["clinvar", "cosmic"])),
            excluded_genotypes: Vec::new(),
            annotation_index_enabled: true,
            family_index_enabled: true,
        }
    }

    /// Layout of the first schema version, kept decodable for old entries
    pub fn backward_compatible_configuration() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            population_frequency: Some(PopulationFrequencyConfiguration {
                populations: default_populations(),
                thresholds: BACKWARD_COMPATIBLE_THRESHOLDS.to_vec(),
            }),
            consequence_type: Some(
                CategoricalField::new(&[
                    "splice_donor_variant",
                    "transcript_ablation",
                    "transcript_amplification",
                    "initiator_codon_variant",
                    "splice_region_variant",
                    "incomplete_terminal_codon_variant",
                    "utr",
                    "mirna_tfbs",
                    "missense_variant",
                    "frameshift_variant",
                    "inframe_deletion",
                    "inframe_insertion",
                    "start_lost",
                    "stop_gained",
                    "stop_lost",
                    "splice_acceptor_variant",
                ])
                .with_mapping("mirna_tfbs", &["TF_binding_site_variant", "mature_miRNA_variant"])
                .with_mapping("utr", &["3_prime_UTR_variant", "5_prime_UTR_variant"]),
            ),
            biotype: Some(default_biotype()),
            clinical_significance: Some(CategoricalField::new(&[
                "likely_benign",
                "uncertain_significance",
                "likely_pathogenic",
                "pathogenic",
                "unused_target_drug",
                "unused_pgx",
                "unused_bit8",
            ])),
            clinical_source: Some(CategoricalField::new(&["cosmic"])),
            excluded_genotypes: Vec::new(),
            annotation_index_enabled: true,
            family_index_enabled: true,
        }
    }

    /// Fill every unset field from `defaults`
    pub fn add_missing_values(&mut self, defaults: &SampleIndexConfiguration) {
        if self.chunk_size == 0 {
            self.chunk_size = defaults.chunk_size;
        }
        if self.population_frequency.is_none() {
            self.population_frequency = defaults.population_frequency.clone();
        }
        if let (Some(pf), Some(d)) = (
            self.population_frequency.as_mut(),
            defaults.population_frequency.as_ref(),
        ) {
            if pf.populations.is_empty() {
                pf.populations = d.populations.clone();
            }
            if pf.thresholds.is_empty() {
                pf.thresholds = d.thresholds.clone();
            }
        }
        if self.consequence_type.is_none() {
            self.consequence_type = defaults.consequence_type.clone();
        }
        if self.biotype.is_none() {
            self.biotype = defaults.biotype.clone();
        }
        if self.clinical_significance.is_none() {
            self.clinical_significance = defaults.clinical_significance.clone();
        }
        if self.clinical_source.is_none() {
            self.clinical_source = defaults.clinical_source.clone();
        }
    }

    /// Validate thresholds and value tables (layout width is checked by FieldLayout)
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(IndexError::Schema(format!(
                "Chunk size {} outside 1..={}",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }
        if let Some(pf) = &self.population_frequency {
            if pf.thresholds.is_empty() {
                return Err(IndexError::Schema("Population frequency thresholds are empty".into()));
            }
            if pf.thresholds.windows(2).any(|w| w[0] >= w[1]) {
                return Err(IndexError::Schema(format!(
                    "Population frequency thresholds must be strictly ascending: {:?}",
                    pf.thresholds
                )));
            }
        }
        for (name, field) in [
            ("consequence_type", &self.consequence_type),
            ("biotype", &self.biotype),
            ("clinical_significance", &self.clinical_significance),
            ("clinical_source", &self.clinical_source),
        ] {
            if let Some(field) = field {
                field.validate(name)?;
            }
        }
        Ok(())
    }

    /// Read a configuration from JSON and complete it with the defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let mut configuration: SampleIndexConfiguration = serde_json::from_str(&data)?;
        configuration.add_missing_values(&Self::default_configuration());
        configuration.validate()?;
        Ok(configuration)
    }
}

fn default_populations() -> Vec<Population> {
    vec![
        Population::new("1kG_phase3", "ALL"),
        Population::new("GNOMAD_GENOMES", "ALL"),
    ]
}

fn default_biotype() -> CategoricalField {
    CategoricalField::new(&[
        "nonsense_mediated_decay",
        "lincRNA",
        "miRNA",
        "retained_intron",
        "snRNA",
        "snoRNA",
        "other_non_pseudo_gene",
        "protein_coding",
    ])
    .with_mapping(
        "lincRNA",
        &[
            "lncRNA",
            "non_coding",
            "lincRNA",
            "macro_lncRNA",
            "antisense",
            "sense_intronic",
            "sense_overlapping",
            "3prime_overlapping_ncrna",
            "bidirectional_promoter_lncRNA",
        ],
    )
    .with_mapping(
        "other_non_pseudo_gene",
        &[
            "processed_transcript",
            "non_stop_decay",
            "misc_RNA",
            "rRNA",
            "Mt_rRNA",
            "Mt_tRNA",
            "IG_C_gene",
            "IG_D_gene",
            "IG_J_gene",
            "IG_V_gene",
            "TR_C_gene",
            "TR_D_gene",
            "TR_J_gene",
            "TR_V_gene",
            "nmd_transcript_variant",
            "transcribed_unprocessed_pseudogene",
            "ambiguous_orf",
            "known_ncrna",
            "retrotransposed",
            "LRG_gene",
        ],
    )
}
