// ==============================================================================
// schema/mod.rs - Sample Index Schema
// ==============================================================================
// Description: Immutable, versioned description of the sample index layout
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

pub mod bits;
pub mod configuration;
pub mod layout;
pub mod registry;

use serde::{Deserialize, Serialize};

pub use configuration::{
    CategoricalField, Population, PopulationFrequencyConfiguration, SampleIndexConfiguration,
};
pub use layout::{FieldLayout, FieldSpan};
pub use registry::{SchemaRegistry, SchemaStatus};

use crate::error::Result;
use crate::genotype;
use crate::models::{Region, VariantAnnotation};

/// One version of the index layout. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleIndexSchema {
    version: u32,
    configuration: SampleIndexConfiguration,
    layout: FieldLayout,
}

impl SampleIndexSchema {
    pub fn new(version: u32, configuration: SampleIndexConfiguration) -> Result<Self> {
        configuration.validate()?;
        let layout = FieldLayout::from_configuration(&configuration)?;
        Ok(Self {
            version,
            configuration,
            layout,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn configuration(&self) -> &SampleIndexConfiguration {
        &self.configuration
    }

    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    pub fn chunk_size(&self) -> u64 {
        self.configuration.chunk_size
    }

    /// Bits per variant in the annotation column
    pub fn annotation_width(&self) -> u32 {
        self.layout.width()
    }

    pub fn annotation_index_enabled(&self) -> bool {
        self.configuration.annotation_index_enabled
    }

    pub fn family_index_enabled(&self) -> bool {
        self.configuration.family_index_enabled
    }

    /// Start of the chunk containing `position`
    pub fn chunk_start(&self, position: u64) -> u64 {
        position / self.chunk_size() * self.chunk_size()
    }

    pub fn chunk_region(&self, chromosome: &str, chunk_start: u64) -> Region {
        Region::new(chromosome, chunk_start, chunk_start + self.chunk_size() - 1)
    }

    pub fn is_valid_genotype(&self, gt: &str) -> bool {
        genotype::is_indexable(gt, &self.configuration.excluded_genotypes)
    }

    pub fn annotation_bits(&self, annotation: &VariantAnnotation) -> u64 {
        self.layout.encode(&self.configuration, annotation)
    }
}
