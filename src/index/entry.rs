// ==============================================================================
// index/entry.rs - Sample Index Entries
// ==============================================================================
// Description: Per (sample, chunk) index entry and its reusable builder
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::codec;
use crate::error::Result;
use crate::models::{SampleId, Variant};
use crate::schema::layout::SUMMARY_WIDTH;

/// Storage key of an entry within one (study, schema version)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub sample_id: SampleId,
    pub chromosome: String,
    pub chunk_start: u64,
}

impl ChunkKey {
    pub fn new(sample_id: SampleId, chromosome: impl Into<String>, chunk_start: u64) -> Self {
        Self {
            sample_id,
            chromosome: chromosome.into(),
            chunk_start,
        }
    }

    /// Same chunk for a different sample
    pub fn with_sample(&self, sample_id: SampleId) -> Self {
        Self {
            sample_id,
            chromosome: self.chromosome.clone(),
            chunk_start: self.chunk_start,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleIndexVariant {
    pub position_key: Vec<u8>,
    #[serde(default)]
    pub annotation_bits: u64,
}

impl SampleIndexVariant {
    pub fn new(position_key: Vec<u8>) -> Self {
        Self {
            position_key,
            annotation_bits: 0,
        }
    }

    fn sort_key(&self) -> (u32, &[u8]) {
        let relative = codec::relative_start(&self.position_key).unwrap_or(u32::MAX);
        (relative, &self.position_key)
    }
}

/// Variants sharing one genotype within an entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleIndexGtEntry {
    /// Position order; never reordered after the genotype pass
    pub variants: Vec<SampleIndexVariant>,

    /// OR of every variant's annotation bits
    #[serde(default)]
    pub annotation_summary: u64,

    /// Variants per summary flag
    #[serde(default)]
    pub annotation_counts: Vec<u32>,

    /// One father/mother code per variant, empty until the family pass
    #[serde(default)]
    pub parents_codes: Vec<u8>,

    /// Indices into `variants` with a Mendelian error
    #[serde(default)]
    pub mendelian_flags: Vec<u32>,
}

impl SampleIndexGtEntry {
    /// Recompute summary and counts from the variant bits
    pub fn recompute_annotation(&mut self) {
        self.annotation_summary = self
            .variants
            .iter()
            .fold(0, |acc, v| acc | v.annotation_bits);
        let mut counts = vec![0u32; SUMMARY_WIDTH as usize];
        for variant in &self.variants {
            for (bit, count) in counts.iter_mut().enumerate() {
                if variant.annotation_bits & (1 << bit) != 0 {
                    *count += 1;
                }
            }
        }
        self.annotation_counts = counts;
    }

    pub fn is_annotated(&self) -> bool {
        !self.annotation_counts.is_empty()
    }
}

/// Unit of storage: one sample, one chunk, one schema version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleIndexEntry {
    pub sample_id: SampleId,
    pub chromosome: String,
    pub chunk_start: u64,
    pub schema_version: u32,

    /// Mendelian errors across all genotypes
    #[serde(default)]
    pub discrepancies: u32,

    pub gts: BTreeMap<String, SampleIndexGtEntry>,
}

impl SampleIndexEntry {
    pub fn new(key: &ChunkKey, schema_version: u32) -> Self {
        Self {
            sample_id: key.sample_id,
            chromosome: key.chromosome.clone(),
            chunk_start: key.chunk_start,
            schema_version,
            discrepancies: 0,
            gts: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> ChunkKey {
        ChunkKey::new(self.sample_id, self.chromosome.clone(), self.chunk_start)
    }

    pub fn variant_count(&self) -> usize {
        self.gts.values().map(|g| g.variants.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.gts.values().all(|g| g.variants.is_empty())
    }

    /// Decode every variant of one genotype bucket
    pub fn variants(&self, gt: &str) -> Result<Vec<Variant>> {
        self.gts
            .get(gt)
            .map(|g| {
                g.variants
                    .iter()
                    .map(|v| codec::decode_position_key(&self.chromosome, self.chunk_start, &v.position_key))
                    .collect()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    /// Map of position key to genotype, across all buckets
    pub fn genotype_lookup(&self) -> std::collections::HashMap<&[u8], &str> {
        let mut lookup = std::collections::HashMap::with_capacity(self.variant_count());
        for (gt, gt_entry) in &self.gts {
            for variant in &gt_entry.variants {
                lookup.insert(variant.position_key.as_slice(), gt.as_str());
            }
        }
        lookup
    }
}

/// Accumulates one sample's chunk, then freezes it with [`build`](Self::build)
///
/// Buffers are kept across `build`/`reset` cycles so a builder can be reused
/// for every chunk of a sample.
#[derive(Debug)]
pub struct SampleIndexEntryBuilder {
    sample_id: SampleId,
    schema_version: u32,
    chromosome: String,
    chunk_start: u64,
    gts: BTreeMap<String, Vec<SampleIndexVariant>>,
}

impl SampleIndexEntryBuilder {
    pub fn new(sample_id: SampleId, schema_version: u32, chromosome: &str, chunk_start: u64) -> Self {
        Self {
            sample_id,
            schema_version,
            chromosome: chromosome.to_string(),
            chunk_start,
            gts: BTreeMap::new(),
        }
    }

    pub fn chromosome(&self) -> &str {
        &self.chromosome
    }

    pub fn chunk_start(&self) -> u64 {
        self.chunk_start
    }

    pub fn is_open_for(&self, chromosome: &str, chunk_start: u64) -> bool {
        self.chromosome == chromosome && self.chunk_start == chunk_start
    }

    pub fn is_empty(&self) -> bool {
        self.gts.values().all(Vec::is_empty)
    }

    pub fn add(&mut self, gt: &str, variant: SampleIndexVariant) {
        match self.gts.get_mut(gt) {
            Some(bucket) => bucket.push(variant),
            None => {
                self.gts.insert(gt.to_string(), vec![variant]);
            }
        }
    }

    /// Seed the builder with a previously stored entry of the same chunk
    ///
    /// Annotation bits of existing variants are kept; family fields are
    /// dropped since the merged entry needs a new family pass.
    pub fn load_existing(&mut self, entry: SampleIndexEntry) {
        for (gt, gt_entry) in entry.gts {
            for variant in gt_entry.variants {
                self.add(&gt, variant);
            }
        }
    }

    /// Freeze the accumulated variants into an entry
    ///
    /// Buckets are sorted by position and de-duplicated by key. The builder
    /// is left empty for the same chunk.
    pub fn build(&mut self) -> SampleIndexEntry {
        let key = ChunkKey::new(self.sample_id, self.chromosome.clone(), self.chunk_start);
        let mut entry = SampleIndexEntry::new(&key, self.schema_version);

        for (gt, bucket) in self.gts.iter_mut() {
            if bucket.is_empty() {
                continue;
            }
            bucket.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
            let mut variants: Vec<SampleIndexVariant> = Vec::with_capacity(bucket.len());
            for variant in bucket.drain(..) {
                match variants.last_mut() {
                    Some(last) if last.position_key == variant.position_key => {
                        last.annotation_bits |= variant.annotation_bits;
                    }
                    _ => variants.push(variant),
                }
            }
            let mut gt_entry = SampleIndexGtEntry {
                variants,
                ..Default::default()
            };
            if gt_entry.variants.iter().any(|v| v.annotation_bits != 0) {
                gt_entry.recompute_annotation();
            }
            entry.gts.insert(gt.clone(), gt_entry);
        }
        entry
    }

    /// Move to another chunk, discarding anything not built
    pub fn reset(&mut self, chromosome: &str, chunk_start: u64) {
        if self.chromosome != chromosome {
            self.chromosome.clear();
            self.chromosome.push_str(chromosome);
        }
        self.chunk_start = chunk_start;
        for bucket in self.gts.values_mut() {
            bucket.clear();
        }
    }
}
