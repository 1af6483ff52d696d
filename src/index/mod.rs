// ==============================================================================
// index/mod.rs - Sample Index
// ==============================================================================
// Description: Per-sample chunk entries, their codec, stores and indexers
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

pub mod annotation_indexer;
pub mod codec;
pub mod entry;
pub mod family_indexer;
pub mod genotype_indexer;
pub mod local;
pub mod mendelian;
pub mod store;

pub use annotation_indexer::{AnnotationIndexReport, SampleAnnotationIndexer};
pub use entry::{ChunkKey, SampleIndexEntry, SampleIndexEntryBuilder, SampleIndexGtEntry, SampleIndexVariant};
pub use family_indexer::{FamilyIndexReport, SampleFamilyIndexer, TrioReport};
pub use genotype_indexer::{GenotypeIndexOptions, GenotypeIndexReport, SampleGenotypeIndexer};
pub use local::{EntryFormat, LocalSampleIndexStore};
pub use mendelian::{GenotypeCode, MendelianClass, ParentCall};
pub use store::{MemorySampleIndexStore, SampleIndexStore};
