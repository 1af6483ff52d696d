// ==============================================================================
// stage/postgres.rs - PostgreSQL Staging Store
// ==============================================================================
// Description: sqlx-backed staging store with real duplicate-key detection
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Tables:
//   variant_stage        one row per document (immutable variant fields + tags)
//   variant_stage_study  (id, study) with the new_study flag
//   variant_stage_file   (id, study, file) with the payload array (NULL = cleaned)
//
// Document ids compare bytewise (COLLATE "C"): locale collations ignore the
// padding space and ':' and would interleave chromosomes.
//
// Each operation runs in its own transaction. A plain INSERT of a missing
// document surfaces a concurrent insert as a unique violation, which is
// reported as a conflict for that key.
// ==============================================================================

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::document::{study_file_tag, StageDocument, StudyStage};
use super::store::{StageFilter, StageStore, StageUpsert, UpsertMode, UpsertOutcome, UpsertReport};
use crate::error::Result;

const SCHEMA_SQL: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS variant_stage (
         id TEXT COLLATE \"C\" PRIMARY KEY,
         chromosome TEXT NOT NULL,
         start_pos BIGINT NOT NULL,
         end_pos BIGINT NOT NULL,
         reference TEXT NOT NULL,
         alternate TEXT NOT NULL,
         study_files TEXT[] NOT NULL DEFAULT '{}'
     )",
    "CREATE TABLE IF NOT EXISTS variant_stage_study (
         id TEXT NOT NULL REFERENCES variant_stage(id) ON DELETE CASCADE,
         study TEXT NOT NULL,
         new_study BOOLEAN NOT NULL DEFAULT TRUE,
         PRIMARY KEY (id, study)
     )",
    "CREATE TABLE IF NOT EXISTS variant_stage_file (
         id TEXT NOT NULL,
         study TEXT NOT NULL,
         file TEXT NOT NULL,
         data BYTEA[],
         PRIMARY KEY (id, study, file),
         FOREIGN KEY (id, study) REFERENCES variant_stage_study(id, study) ON DELETE CASCADE
     )",
    "CREATE INDEX IF NOT EXISTS variant_stage_chromosome_idx ON variant_stage (chromosome, id)",
];

type DocumentRow = (String, String, i64, i64, String, String, Vec<String>);

pub struct PgStageStore {
    pool: PgPool,
}

impl PgStageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the staging tables exist
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA_SQL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Staging tables ready");
        Ok(())
    }

    /// Apply one operation; `Ok(None)` means the key conflicted
    async fn upsert_one(&self, op: &StageUpsert, mode: UpsertMode, resume: bool) -> Result<Option<UpsertOutcome>> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM variant_stage WHERE id = $1 FOR UPDATE")
            .bind(&op.id)
            .fetch_optional(&mut *tx)
            .await?;

        let inserted = match (exists, mode) {
            (Some(_), _) => false,
            (None, UpsertMode::UpdateOnly) => return Ok(None),
            (None, UpsertMode::Upsert) => {
                let insert = sqlx::query(
                    "INSERT INTO variant_stage (id, chromosome, start_pos, end_pos, reference, alternate)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(&op.id)
                .bind(&op.variant.chromosome)
                .bind(op.variant.start as i64)
                .bind(op.variant.end as i64)
                .bind(&op.variant.reference)
                .bind(&op.variant.alternate)
                .execute(&mut *tx)
                .await;
                match insert {
                    Ok(_) => true,
                    Err(e) if is_unique_violation(&e) => {
                        debug!("Insert race on stage document {}", op.id);
                        return Ok(None);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let (previous, appended) = append_payloads(&mut tx, op, resume).await?;
        tx.commit().await?;

        Ok(Some(if inserted {
            UpsertOutcome::Inserted { appended }
        } else {
            UpsertOutcome::Updated {
                previous_file_entries: previous,
                appended,
            }
        }))
    }

    async fn load_document(&self, row: DocumentRow) -> Result<StageDocument> {
        let (id, chromosome, start, end, reference, alternate, study_files) = row;

        let studies: Vec<(String, bool)> =
            sqlx::query_as("SELECT study, new_study FROM variant_stage_study WHERE id = $1")
                .bind(&id)
                .fetch_all(&self.pool)
                .await?;
        let files: Vec<(String, String, Option<Vec<Vec<u8>>>)> =
            sqlx::query_as("SELECT study, file, data FROM variant_stage_file WHERE id = $1")
                .bind(&id)
                .fetch_all(&self.pool)
                .await?;

        let mut stages: BTreeMap<String, StudyStage> = studies
            .into_iter()
            .map(|(study, new_study)| {
                (
                    study,
                    StudyStage {
                        new_study,
                        files: BTreeMap::new(),
                    },
                )
            })
            .collect();
        for (study, file, data) in files {
            stages.entry(study).or_default().files.insert(file, data);
        }

        Ok(StageDocument {
            id,
            chromosome,
            start: start as u64,
            end: end as u64,
            reference,
            alternate,
            study_files: study_files.into_iter().collect::<BTreeSet<_>>(),
            studies: stages,
        })
    }
}

/// Tag the document and append the payloads
///
/// # Returns
/// * `(previous, appended)` - Payloads stored before the call and payloads added
async fn append_payloads(
    tx: &mut Transaction<'_, Postgres>,
    op: &StageUpsert,
    resume: bool,
) -> Result<(usize, usize)> {
    sqlx::query(
        "UPDATE variant_stage SET study_files = array_append(study_files, $2)
         WHERE id = $1 AND NOT ($2 = ANY(study_files))",
    )
    .bind(&op.id)
    .bind(study_file_tag(&op.study, &op.file))
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO variant_stage_study (id, study, new_study) VALUES ($1, $2, TRUE)
         ON CONFLICT (id, study) DO NOTHING",
    )
    .bind(&op.id)
    .bind(&op.study)
    .execute(&mut **tx)
    .await?;

    let existing: Option<(Option<Vec<Vec<u8>>>,)> = sqlx::query_as(
        "SELECT data FROM variant_stage_file WHERE id = $1 AND study = $2 AND file = $3",
    )
    .bind(&op.id)
    .bind(&op.study)
    .bind(&op.file)
    .fetch_optional(&mut **tx)
    .await?;

    let mut data = existing.and_then(|(data,)| data).unwrap_or_default();
    let previous = data.len();
    for payload in &op.payloads {
        if resume && data.contains(payload) {
            continue;
        }
        data.push(payload.clone());
    }

    sqlx::query(
        "INSERT INTO variant_stage_file (id, study, file, data) VALUES ($1, $2, $3, $4)
         ON CONFLICT (id, study, file) DO UPDATE SET data = EXCLUDED.data",
    )
    .bind(&op.id)
    .bind(&op.study)
    .bind(&op.file)
    .bind(&data)
    .execute(&mut **tx)
    .await?;

    Ok((previous, data.len() - previous))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

/// Tags of a filter, empty when every file is accepted
fn filter_tags(filter: &StageFilter) -> Vec<String> {
    filter
        .files
        .iter()
        .map(|f| study_file_tag(&filter.study, f))
        .collect()
}

const FILTER_SQL: &str = "EXISTS (SELECT 1 FROM variant_stage_study s WHERE s.id = variant_stage.id AND s.study = $1)
     AND (cardinality($2::text[]) = 0 OR study_files && $2::text[])
     AND (cardinality($3::text[]) = 0 OR chromosome = ANY($3::text[]))";

/// Page query: cursor comparison and ordering both bytewise
fn scan_sql() -> String {
    format!(
        "SELECT id, chromosome, start_pos, end_pos, reference, alternate, study_files
         FROM variant_stage
         WHERE {} AND ($4::text IS NULL OR id > $4 COLLATE \"C\")
         ORDER BY id COLLATE \"C\"
         LIMIT $5",
        FILTER_SQL
    )
}

#[async_trait]
impl StageStore for PgStageStore {
    async fn upsert_batch(&self, ops: &[StageUpsert], mode: UpsertMode, resume: bool) -> Result<UpsertReport> {
        let mut report = UpsertReport::default();
        for op in ops {
            match self.upsert_one(op, mode, resume).await? {
                Some(outcome) => report.outcomes.push((op.id.clone(), outcome)),
                None => report.conflicts.push(op.id.clone()),
            }
        }
        Ok(report)
    }

    async fn get(&self, id: &str) -> Result<Option<StageDocument>> {
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT id, chromosome, start_pos, end_pos, reference, alternate, study_files
             FROM variant_stage WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.load_document(row).await?)),
            None => Ok(None),
        }
    }

    async fn scan(&self, filter: &StageFilter, after: Option<&str>, limit: usize) -> Result<Vec<StageDocument>> {
        let sql = scan_sql();
        let rows: Vec<DocumentRow> = sqlx::query_as(&sql)
            .bind(&filter.study)
            .bind(filter_tags(filter))
            .bind(&filter.chromosomes)
            .bind(after)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            documents.push(self.load_document(row).await?);
        }
        Ok(documents)
    }

    async fn count(&self, filter: &StageFilter) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM variant_stage WHERE {}", FILTER_SQL);
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(&filter.study)
            .bind(filter_tags(filter))
            .bind(&filter.chromosomes)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn clean_files(&self, study: &str, files: &[String], chromosomes: &[String]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let cleaned: Vec<(String,)> = sqlx::query_as(
            "UPDATE variant_stage_file f SET data = NULL
             FROM variant_stage v
             WHERE f.id = v.id AND f.study = $1 AND f.file = ANY($2::text[]) AND f.data IS NOT NULL
               AND (cardinality($3::text[]) = 0 OR v.chromosome = ANY($3::text[]))
             RETURNING f.id",
        )
        .bind(study)
        .bind(files)
        .bind(chromosomes)
        .fetch_all(&mut *tx)
        .await?;

        let ids: BTreeSet<String> = cleaned.into_iter().map(|(id,)| id).collect();
        let ids: Vec<String> = ids.into_iter().collect();
        sqlx::query("UPDATE variant_stage_study SET new_study = FALSE WHERE study = $1 AND id = ANY($2::text[])")
            .bind(study)
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("Cleaned {} stage documents of study {}", ids.len(), study);
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::document::stage_id;

    #[test]
    fn test_ids_sort_bytewise() {
        assert!(SCHEMA_SQL[0].contains("id TEXT COLLATE \"C\" PRIMARY KEY"));
        let sql = scan_sql();
        assert!(sql.contains("id > $4 COLLATE \"C\""));
        assert!(sql.contains("ORDER BY id COLLATE \"C\""));

        // Byte order of the keys is chromosome then position
        let mut ids = vec![
            stage_id("10", 1000, "T", "C"),
            stage_id("1", 102, "G", "T"),
            stage_id("1", 100, "ACGTA", "A"),
            stage_id("2", 5, "T", "C"),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                stage_id("1", 100, "ACGTA", "A"),
                stage_id("1", 102, "G", "T"),
                stage_id("10", 1000, "T", "C"),
                stage_id("2", 5, "T", "C"),
            ]
        );
    }
}
