// ==============================================================================
// error.rs - Sample Index Error Types
// ==============================================================================
// Description: Error taxonomy shared by the indexers, stores and stage pipeline
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

use thiserror::Error;

use crate::metadata::TaskStatus;
use crate::models::SampleId;

/// Errors raised by the sample index and staging engine
#[derive(Error, Debug)]
pub enum IndexError {
    /// Variant stream delivered a position lower than one already seen
    #[error("Variants out of order on {chromosome}: position {current} after {previous}")]
    OrderingViolation {
        chromosome: String,
        previous: u64,
        current: u64,
    },

    /// Variant stream went back to a chromosome it had already left
    #[error("Chromosome {chromosome} appeared again after the stream moved past it")]
    ChromosomeRevisited { chromosome: String },

    /// Duplicate-key conflict persisted through the targeted retry
    #[error("Stage write conflict persisted after retry on {} key(s): {keys:?}", keys.len())]
    StageWriteConflict { keys: Vec<String> },

    #[error("Not supported yet: {0}")]
    NotSupported(String),

    /// A single unit of work failed; carries enough context to retry it alone
    #[error("Sample {sample} chunk {chromosome}:{chunk_start} (schema version {schema_version}): {source}")]
    Entry {
        sample: SampleId,
        chromosome: String,
        chunk_start: u64,
        schema_version: u32,
        #[source]
        source: Box<IndexError>,
    },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Schema version {version} not registered for study '{study}'")]
    SchemaNotFound { study: String, version: u32 },

    #[error("Invalid schema: {0}")]
    Schema(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invalid genotype '{0}'")]
    InvalidGenotype(String),

    #[error("Unknown sample {sample} in study '{study}'")]
    UnknownSample { study: String, sample: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Variant source error: {0}")]
    Source(String),

    #[error("VCF error: {0}")]
    Vcf(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// Attach the (sample, chunk, schema version) a failure belongs to
    pub fn for_entry(
        self,
        sample: SampleId,
        chromosome: &str,
        chunk_start: u64,
        schema_version: u32,
    ) -> Self {
        match self {
            // Already scoped
            IndexError::Entry { .. } => self,
            other => IndexError::Entry {
                sample,
                chromosome: chromosome.to_string(),
                chunk_start,
                schema_version,
                source: Box::new(other),
            },
        }
    }

    /// True when the failure is an unimplemented capability rather than a fault
    pub fn is_not_supported(&self) -> bool {
        match self {
            IndexError::NotSupported(_) => true,
            IndexError::Entry { source, .. } => source.is_not_supported(),
            _ => false,
        }
    }
}
