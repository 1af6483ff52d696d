// ==============================================================================
// stage/mod.rs - Variant Staging
// ==============================================================================
// Description: Deduplicating, conflict-safe staging of raw variant records
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

pub mod converter;
pub mod document;
pub mod loader;
pub mod postgres;
pub mod reader;
pub mod store;

pub use converter::{ConvertedBatch, StageConverter, StagedVariant};
pub use document::{stage_id, StageDocument, StudyStage};
pub use loader::{StageLoader, StageWriteResult};
pub use postgres::PgStageStore;
pub use reader::StageReader;
pub use store::{MemoryStageStore, StageFilter, StageStore, StageUpsert, UpsertMode, UpsertOutcome, UpsertReport};
