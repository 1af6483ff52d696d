// ==============================================================================
// stage/converter.rs - Stage Converter
// ==============================================================================
// Description: Filters raw variant records and encodes them as stage payloads
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use super::document::stage_id;
use crate::error::Result;
use crate::models::{Variant, VariantRecord, VariantType};

/// One record ready for staging
#[derive(Debug, Clone, PartialEq)]
pub struct StagedVariant {
    pub id: String,
    pub variant: Variant,
    pub payload: Vec<u8>,
}

/// Converted batch plus the records dropped by the skip set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertedBatch {
    pub variants: Vec<StagedVariant>,
    pub skipped: u64,
    pub skipped_by_type: BTreeMap<VariantType, u64>,
}

#[derive(Debug, Clone)]
pub struct StageConverter {
    skip: HashSet<VariantType>,
}

impl Default for StageConverter {
    fn default() -> Self {
        Self::new([VariantType::NoVariation, VariantType::Symbolic])
    }
}

impl StageConverter {
    pub fn new(skip: impl IntoIterator<Item = VariantType>) -> Self {
        Self {
            skip: skip.into_iter().collect(),
        }
    }

    pub fn skips(&self, variant_type: VariantType) -> bool {
        self.skip.contains(&variant_type)
    }

    /// Convert a batch, dropping skipped types before encoding
    pub fn convert(&self, records: &[VariantRecord]) -> Result<ConvertedBatch> {
        let mut batch = ConvertedBatch {
            variants: Vec::with_capacity(records.len()),
            ..Default::default()
        };

        for record in records {
            let variant = &record.variant;
            if self.skips(variant.variant_type) {
                batch.skipped += 1;
                *batch.skipped_by_type.entry(variant.variant_type).or_insert(0) += 1;
                continue;
            }
            batch.variants.push(StagedVariant {
                id: stage_id(&variant.chromosome, variant.start, &variant.reference, &variant.alternate),
                variant: variant.clone(),
                payload: encode_payload(record)?,
            });
        }

        if batch.skipped > 0 {
            debug!("Skipped {} records by type: {:?}", batch.skipped, batch.skipped_by_type);
        }
        Ok(batch)
    }
}

pub fn encode_payload(record: &VariantRecord) -> Result<Vec<u8>> {
    Ok(bincode::serialize(record)?)
}

pub fn decode_payload(bytes: &[u8]) -> Result<VariantRecord> {
    Ok(bincode::deserialize(bytes)?)
}
