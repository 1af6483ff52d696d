// ==============================================================================
// parsers/mod.rs - File parser modules
// ==============================================================================
// Description: Parsers for variant, pedigree and annotation input files
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

pub mod annotation;
pub mod pedigree;
pub mod vcf;

pub use annotation::AnnotationParser;
pub use pedigree::{PedigreeEntry, PedigreeParser};
pub use vcf::{recode_genotype, VcfContents, VcfVariantReader};
