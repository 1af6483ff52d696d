// ==============================================================================
// index/genotype_indexer.rs - Sample Genotype Indexer
// ==============================================================================
// Description: Buckets a sorted variant stream into per-sample chunk entries
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Algorithm:
//   For each variant (sorted within each chromosome):
//     1. Reject positions lower than the previous one, or a chromosome seen
//        before the current one (ordering violation, fatal)
//     2. chunk = floor(start / chunk_size) * chunk_size
//     3. For each sample with an indexable call, flush its builder if the
//        chunk changed, then append the position key under the GT string
//   Flushed entries are written in batches; everything left is written at
//   end of stream.
// ==============================================================================

use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::codec::encode_position_key;
use super::entry::{ChunkKey, SampleIndexEntry, SampleIndexEntryBuilder, SampleIndexVariant};
use super::store::SampleIndexStore;
use crate::error::{IndexError, Result};
use crate::metadata::{IndexKind, MetadataStore, TaskStatus};
use crate::models::{AnnotatedVariant, SampleId};
use crate::schema::SampleIndexSchema;
use crate::source::{VariantQuery, VariantSource};

#[derive(Debug, Clone)]
pub struct GenotypeIndexOptions {
    /// Merge with entries already stored for the same chunk
    pub merge_existing: bool,

    /// Entries buffered before a store write
    pub write_batch_size: usize,
}

impl Default for GenotypeIndexOptions {
    fn default() -> Self {
        Self {
            merge_existing: false,
            write_batch_size: 256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenotypeIndexReport {
    pub run_id: Option<Uuid>,
    pub variants_read: u64,
    pub calls_indexed: u64,
    pub entries_written: usize,
    /// Entries written per sample
    pub per_sample: BTreeMap<SampleId, usize>,
}

/// Tracks stream order across chromosomes
#[derive(Debug, Default)]
struct OrderGuard {
    chromosome: Option<String>,
    position: u64,
    finished: HashSet<String>,
}

impl OrderGuard {
    fn check(&mut self, chromosome: &str, position: u64) -> Result<()> {
        match &self.chromosome {
            Some(current) if current == chromosome => {
                if position < self.position {
                    return Err(IndexError::OrderingViolation {
                        chromosome: chromosome.to_string(),
                        previous: self.position,
                        current: position,
                    });
                }
            }
            _ => {
                if self.finished.contains(chromosome) {
                    return Err(IndexError::ChromosomeRevisited {
                        chromosome: chromosome.to_string(),
                    });
                }
                if let Some(previous) = self.chromosome.take() {
                    self.finished.insert(previous);
                }
                self.chromosome = Some(chromosome.to_string());
            }
        }
        self.position = position;
        Ok(())
    }
}

/// Per-run builder arena, owned by one indexing task
struct BuilderArena<'a> {
    study: &'a str,
    schema: &'a SampleIndexSchema,
    store: &'a dyn SampleIndexStore,
    options: &'a GenotypeIndexOptions,
    builders: HashMap<SampleId, SampleIndexEntryBuilder>,
    pending: Vec<SampleIndexEntry>,
    report: GenotypeIndexReport,
}

impl<'a> BuilderArena<'a> {
    /// Builder of `sample` positioned on the given chunk, flushing the previous one
    async fn open(
        &mut self,
        sample: SampleId,
        chromosome: &str,
        chunk_start: u64,
    ) -> Result<&mut SampleIndexEntryBuilder> {
        let needs_open = match self.builders.get_mut(&sample) {
            Some(builder) if builder.is_open_for(chromosome, chunk_start) => false,
            Some(builder) => {
                if !builder.is_empty() {
                    let entry = builder.build();
                    self.queue(entry).await?;
                }
                true
            }
            None => true,
        };

        if needs_open {
            let builder = self.builders.entry(sample).or_insert_with(|| {
                SampleIndexEntryBuilder::new(sample, self.schema.version(), chromosome, chunk_start)
            });
            builder.reset(chromosome, chunk_start);

            if self.options.merge_existing {
                let key = ChunkKey::new(sample, chromosome, chunk_start);
                let existing = self
                    .store
                    .read_entry(self.study, self.schema, &key)
                    .await
                    .map_err(|e| e.for_entry(sample, chromosome, chunk_start, self.schema.version()))?;
                if let Some(existing) = existing {
                    debug!(
                        "Merging existing entry for sample {} at {}:{}",
                        sample, chromosome, chunk_start
                    );
                    if let Some(builder) = self.builders.get_mut(&sample) {
                        builder.load_existing(existing);
                    }
                }
            }
        }

        self.builders
            .get_mut(&sample)
            .ok_or_else(|| IndexError::Source(format!("No builder for sample {}", sample)))
    }

    async fn queue(&mut self, entry: SampleIndexEntry) -> Result<()> {
        *self.report.per_sample.entry(entry.sample_id).or_default() += 1;
        self.pending.push(entry);
        if self.pending.len() >= self.options.write_batch_size.max(1) {
            self.write_pending().await?;
        }
        Ok(())
    }

    async fn write_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        let count = batch.len();
        self.store.write_entries(self.study, self.schema, batch).await?;
        self.report.entries_written += count;
        debug!("Wrote {} sample index entries", count);
        Ok(())
    }

    async fn add(&mut self, annotated: &AnnotatedVariant, samples: &HashSet<SampleId>) -> Result<()> {
        let variant = &annotated.variant;
        let chunk_start = self.schema.chunk_start(variant.start);
        let mut key: Option<Vec<u8>> = None;

        for (sample, gt) in &annotated.genotypes {
            if !samples.contains(sample) || !self.schema.is_valid_genotype(gt) {
                continue;
            }
            let position_key = match &key {
                Some(k) => k.clone(),
                None => {
                    let k = encode_position_key(variant, chunk_start)?;
                    key = Some(k.clone());
                    k
                }
            };
            let builder = self.open(*sample, &variant.chromosome, chunk_start).await?;
            builder.add(gt, SampleIndexVariant::new(position_key));
            self.report.calls_indexed += 1;
        }
        Ok(())
    }

    async fn finish(mut self) -> Result<GenotypeIndexReport> {
        let mut remaining: Vec<SampleId> = self.builders.keys().copied().collect();
        remaining.sort_unstable();
        for sample in remaining {
            let entry = match self.builders.get_mut(&sample) {
                Some(builder) if !builder.is_empty() => builder.build(),
                _ => continue,
            };
            self.queue(entry).await?;
        }
        self.write_pending().await?;
        Ok(self.report)
    }
}

/// Builds the genotype index of a set of samples
pub struct SampleGenotypeIndexer {
    store: Arc<dyn SampleIndexStore>,
    metadata: Arc<dyn MetadataStore>,
    options: GenotypeIndexOptions,
}

impl SampleGenotypeIndexer {
    pub fn new(
        store: Arc<dyn SampleIndexStore>,
        metadata: Arc<dyn MetadataStore>,
        options: GenotypeIndexOptions,
    ) -> Self {
        Self {
            store,
            metadata,
            options,
        }
    }

    /// Index `samples` from `source`
    ///
    /// Sample statuses move to RUNNING before the stream is read, then READY
    /// on success or ERROR on failure.
    ///
    /// # Returns
    /// * `Ok(GenotypeIndexReport)` - Counts of calls and entries written
    /// * `Err(IndexError::OrderingViolation)` - Unsorted stream, run aborted
    pub async fn run(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        samples: &[SampleId],
        source: &dyn VariantSource,
    ) -> Result<GenotypeIndexReport> {
        let run_id = Uuid::new_v4();
        let version = schema.version();
        info!(
            "Genotype index run {} for {} samples of study {} (schema v{})",
            run_id,
            samples.len(),
            study,
            version
        );

        self.metadata
            .begin_index_run(study, samples, IndexKind::Genotype, version)
            .await?;

        let outcome = async {
            for sample in samples {
                self.metadata.set_last_run(study, *sample, run_id).await?;
            }
            self.index(study, schema, samples, source).await
        }
        .await;

        match outcome {
            Ok(mut report) => {
                report.run_id = Some(run_id);
                for sample in samples {
                    self.metadata
                        .set_index_status(study, *sample, IndexKind::Genotype, version, TaskStatus::Ready)
                        .await?;
                }
                info!(
                    "Genotype index run {} complete: {} variants, {} calls, {} entries",
                    run_id, report.variants_read, report.calls_indexed, report.entries_written
                );
                Ok(report)
            }
            Err(e) => {
                error!("Genotype index run {} failed: {}", run_id, e);
                for sample in samples {
                    if let Err(status_err) = self
                        .metadata
                        .set_index_status(study, *sample, IndexKind::Genotype, version, TaskStatus::Error)
                        .await
                    {
                        error!("Failed to mark sample {} as ERROR: {}", sample, status_err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn index(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        samples: &[SampleId],
        source: &dyn VariantSource,
    ) -> Result<GenotypeIndexReport> {
        let wanted: HashSet<SampleId> = samples.iter().copied().collect();
        let query = VariantQuery::new(study).samples(samples);
        let mut stream = source.query(&query)?;

        let mut arena = BuilderArena {
            study,
            schema,
            store: self.store.as_ref(),
            options: &self.options,
            builders: HashMap::with_capacity(samples.len()),
            pending: Vec::new(),
            report: GenotypeIndexReport::default(),
        };
        let mut order = OrderGuard::default();

        while let Some(item) = stream.next().await {
            let annotated = item?;
            order.check(&annotated.variant.chromosome, annotated.variant.start)?;
            arena.report.variants_read += 1;
            arena.add(&annotated, &wanted).await?;
        }

        arena.finish().await
    }
}
