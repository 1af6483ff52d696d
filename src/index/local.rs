// ==============================================================================
// index/local.rs - Local Filesystem Sample Index Store
// ==============================================================================
// Description: One file per entry under a study/version/sample directory tree
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Layout:
//   <base>/<study>_<version>/<sample>/<chromosome>_<chunk_start>.json|.bin
//
// Chromosome names are percent-escaped (anything except [A-Za-z0-9.-]).
// Region bounds come from file names alone; no entry is read to compute them.
// ==============================================================================

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use super::codec;
use super::entry::{ChunkKey, SampleIndexEntry};
use super::store::{chunk_in_region, merge_chunk_bounds, SampleIndexStore};
use crate::error::{IndexError, Result};
use crate::models::{Region, SampleId};
use crate::schema::SampleIndexSchema;

/// On-disk encoding of entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFormat {
    Json,
    Binary,
}

impl EntryFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            EntryFormat::Json => "json",
            EntryFormat::Binary => "bin",
        }
    }
}

impl FromStr for EntryFormat {
    type Err = IndexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(EntryFormat::Json),
            "binary" | "bin" => Ok(EntryFormat::Binary),
            other => Err(IndexError::InvalidInput(format!("Unknown entry format: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalSampleIndexStore {
    base: PathBuf,
    format: EntryFormat,
}

fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn unescape(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

impl LocalSampleIndexStore {
    pub fn new(base: impl Into<PathBuf>, format: EntryFormat) -> Self {
        Self {
            base: base.into(),
            format,
        }
    }

    fn version_dir(&self, study: &str, version: u32) -> PathBuf {
        self.base.join(format!("{}_{}", escape(study), version))
    }

    fn sample_dir(&self, study: &str, version: u32, sample: SampleId) -> PathBuf {
        self.version_dir(study, version).join(sample.to_string())
    }

    fn entry_path(&self, study: &str, version: u32, key: &ChunkKey) -> PathBuf {
        self.sample_dir(study, version, key.sample_id).join(format!(
            "{}_{}.{}",
            escape(&key.chromosome),
            key.chunk_start,
            self.format.extension()
        ))
    }

    /// (chromosome, chunk start) encoded in a file name of this store's format
    fn parse_file_name(&self, file_name: &str) -> Option<(String, u64)> {
        let stem = file_name.strip_suffix(&format!(".{}", self.format.extension()))?;
        let (chromosome, chunk_start) = stem.rsplit_once('_')?;
        Some((unescape(chromosome)?, chunk_start.parse().ok()?))
    }

    /// Chunks present for one sample, sorted
    async fn list_chunks(
        &self,
        study: &str,
        version: u32,
        sample: SampleId,
    ) -> Result<Vec<(String, u64)>> {
        let dir = self.sample_dir(study, version, sample);
        let mut chunks = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(chunks),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            match file_name.to_str().and_then(|n| self.parse_file_name(n)) {
                Some(chunk) => chunks.push(chunk),
                None => debug!("Ignoring unrecognised file {:?} in {}", file_name, dir.display()),
            }
        }
        chunks.sort();
        Ok(chunks)
    }

    async fn read_path(&self, path: &Path, schema: &SampleIndexSchema) -> Result<Option<SampleIndexEntry>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry = match self.format {
            EntryFormat::Json => {
                let entry: SampleIndexEntry = serde_json::from_slice(&bytes)?;
                if entry.schema_version != schema.version() {
                    return Err(IndexError::Codec(format!(
                        "Entry written with schema version {}, expected {}",
                        entry.schema_version,
                        schema.version()
                    )));
                }
                entry
            }
            EntryFormat::Binary => codec::decode_entry(&bytes, schema.version())?,
        };
        Ok(Some(entry))
    }
}

#[async_trait]
impl SampleIndexStore for LocalSampleIndexStore {
    async fn read_entry(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        key: &ChunkKey,
    ) -> Result<Option<SampleIndexEntry>> {
        let path = self.entry_path(study, schema.version(), key);
        self.read_path(&path, schema)
            .await
            .map_err(|e| e.for_entry(key.sample_id, &key.chromosome, key.chunk_start, schema.version()))
    }

    async fn write_entries(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        entries: Vec<SampleIndexEntry>,
    ) -> Result<()> {
        for entry in entries {
            let key = entry.key();
            let path = self.entry_path(study, schema.version(), &key);
            let write = async {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let bytes = match self.format {
                    EntryFormat::Json => serde_json::to_vec(&entry)?,
                    EntryFormat::Binary => codec::encode_entry(&entry, schema.annotation_width())?,
                };
                // Write then rename so readers never see a partial entry
                let tmp = path.with_extension("tmp");
                tokio::fs::write(&tmp, bytes).await?;
                tokio::fs::rename(&tmp, &path).await?;
                Ok::<(), IndexError>(())
            };
            write
                .await
                .map_err(|e| e.for_entry(key.sample_id, &key.chromosome, key.chunk_start, schema.version()))?;
        }
        Ok(())
    }

    async fn scan(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        sample: SampleId,
        region: Option<&Region>,
    ) -> Result<Vec<SampleIndexEntry>> {
        let mut entries = Vec::new();
        for (chromosome, chunk_start) in self.list_chunks(study, schema.version(), sample).await? {
            if !chunk_in_region(schema, &chromosome, chunk_start, region) {
                continue;
            }
            let key = ChunkKey::new(sample, chromosome, chunk_start);
            if let Some(entry) = self.read_entry(study, schema, &key).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn region_bounds(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        samples: &[SampleId],
    ) -> Result<Vec<Region>> {
        let mut chunks = Vec::new();
        for sample in samples {
            chunks.extend(self.list_chunks(study, schema.version(), *sample).await?);
        }
        Ok(merge_chunk_bounds(
            schema,
            chunks.iter().map(|(c, s)| (c.as_str(), *s)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::codec::encode_position_key;
    use crate::index::entry::{SampleIndexEntryBuilder, SampleIndexVariant};
    use crate::models::Variant;
    use crate::schema::SampleIndexConfiguration;

    fn schema() -> SampleIndexSchema {
        SampleIndexSchema::new(1, SampleIndexConfiguration::default()).unwrap()
    }

    fn entry(sample: SampleId, chromosome: &str, position: u64, bits: u64) -> SampleIndexEntry {
        let chunk = position / 1_000_000 * 1_000_000;
        let mut builder = SampleIndexEntryBuilder::new(sample, 1, chromosome, chunk);
        let mut variant = SampleIndexVariant::new(
            encode_position_key(&Variant::new(chromosome, position, "A", "AT"), chunk).unwrap(),
        );
        variant.annotation_bits = bits;
        builder.add("0/1", variant);
        builder.build()
    }

    #[test]
    fn test_escape_round_trip() {
        for name in ["1", "chrUn_KI270302v1", "HLA-A*01:01", "chr1/alt"] {
            let escaped = escape(name);
            assert!(!escaped.contains('_'));
            assert!(!escaped.contains('/'));
            assert_eq!(unescape(&escaped).unwrap(), name);
        }
    }

    #[tokio::test]
    async fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalSampleIndexStore::new(dir.path(), EntryFormat::Json);
        let schema = schema();
        let written = entry(3, "chrUn_KI270302v1", 1_500_000, 0b101);
        store
            .write_entries("study", &schema, vec![written.clone()])
            .await
            .unwrap();

        let read = store
            .read_entry("study", &schema, &written.key())
            .await
            .unwrap();
        assert_eq!(read, Some(written));
        assert!(dir
            .path()
            .join("study_1/3/chrUn%5FKI270302v1_1000000.json")
            .exists());
    }

    #[tokio::test]
    async fn test_binary_store_scan_and_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalSampleIndexStore::new(dir.path(), EntryFormat::Binary);
        let schema = schema();
        store
            .write_entries(
                "study",
                &schema,
                vec![
                    entry(1, "1", 10, 1),
                    entry(1, "1", 1_000_010, 2),
                    entry(2, "2", 5_000_000, 0),
                ],
            )
            .await
            .unwrap();

        let scanned = store.scan("study", &schema, 1, None).await.unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[1].gts["0/1"].variants[0].annotation_bits, 2);

        let bounds = store.region_bounds("study", &schema, &[1, 2]).await.unwrap();
        assert_eq!(
            bounds,
            vec![Region::new("1", 0, 1_999_999), Region::new("2", 5_000_000, 5_999_999)]
        );
    }

    #[tokio::test]
    async fn test_missing_entry_and_sample() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalSampleIndexStore::new(dir.path(), EntryFormat::Json);
        let schema = schema();
        assert!(store
            .read_entry("study", &schema, &ChunkKey::new(1, "1", 0))
            .await
            .unwrap()
            .is_none());
        assert!(store.scan("study", &schema, 1, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_version_mismatch_reports_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalSampleIndexStore::new(dir.path(), EntryFormat::Binary);
        let v1 = schema();
        let written = entry(1, "1", 10, 0);
        store.write_entries("study", &v1, vec![written.clone()]).await.unwrap();

        // Copy the v1 file into the v2 directory to simulate a mislabelled entry
        let v1_path = store.entry_path("study", 1, &written.key());
        let v2_path = store.entry_path("study", 2, &written.key());
        std::fs::create_dir_all(v2_path.parent().unwrap()).unwrap();
        std::fs::copy(&v1_path, &v2_path).unwrap();

        let v2 = SampleIndexSchema::new(2, SampleIndexConfiguration::default()).unwrap();
        let err = store.read_entry("study", &v2, &written.key()).await.unwrap_err();
        assert!(matches!(err, IndexError::Entry { schema_version: 2, .. }));
    }
}
