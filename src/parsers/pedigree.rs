// ==============================================================================
// parsers/pedigree.rs - Pedigree file parser
// ==============================================================================
// Description: Reads child/father/mother relationships from tab-delimited text
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Format: one family per line, tab-delimited
//   child  father  mother  [extra columns ignored]
// "0", "." or an empty field marks an absent parent. Lines starting with '#'
// are comments; a first row whose child column reads "child" is a header.
// ==============================================================================

use csv::ReaderBuilder;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{IndexError, Result};
use crate::metadata::MetadataStore;
use crate::models::Trio;

/// One pedigree line with sample names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PedigreeEntry {
    pub child: String,
    pub father: Option<String>,
    pub mother: Option<String>,
}

fn parent(field: Option<&str>) -> Option<String> {
    match field.map(str::trim) {
        None | Some("") | Some("0") | Some(".") => None,
        Some(name) => Some(name.to_string()),
    }
}

pub struct PedigreeParser;

impl PedigreeParser {
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Vec<PedigreeEntry>> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::parse(file)
    }

    /// Parse pedigree lines
    ///
    /// # Returns
    /// * `Ok(Vec<PedigreeEntry>)` - Families with at least one parent
    /// * `Err(IndexError::InvalidInput)` - Duplicate child or a self-parent
    pub fn parse<R: Read>(input: R) -> Result<Vec<PedigreeEntry>> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .from_reader(input);

        let mut entries = Vec::new();
        let mut children = BTreeSet::new();

        for (idx, result) in reader.records().enumerate() {
            let record = result?;
            let Some(child) = record.get(0).map(str::trim).filter(|c| !c.is_empty()) else {
                continue;
            };
            if idx == 0 && child.eq_ignore_ascii_case("child") {
                continue;
            }

            let entry = PedigreeEntry {
                child: child.to_string(),
                father: parent(record.get(1)),
                mother: parent(record.get(2)),
            };
            if entry.father.is_none() && entry.mother.is_none() {
                debug!("Sample {} has no parents, skipping", entry.child);
                continue;
            }
            if entry.father.as_deref() == Some(child) || entry.mother.as_deref() == Some(child) {
                return Err(IndexError::InvalidInput(format!(
                    "Sample {} is listed as its own parent",
                    child
                )));
            }
            if !children.insert(entry.child.clone()) {
                return Err(IndexError::InvalidInput(format!(
                    "Sample {} appears as child more than once",
                    child
                )));
            }
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Register every sample of `entries` and their trios
    pub async fn register(
        entries: &[PedigreeEntry],
        study: &str,
        metadata: &dyn MetadataStore,
    ) -> Result<Vec<Trio>> {
        let mut trios = Vec::with_capacity(entries.len());
        for entry in entries {
            let child = metadata.register_sample(study, &entry.child).await?;
            let father = match &entry.father {
                Some(name) => Some(metadata.register_sample(study, name).await?),
                None => None,
            };
            let mother = match &entry.mother {
                Some(name) => Some(metadata.register_sample(study, name).await?),
                None => None,
            };
            let trio = Trio::new(child, father, mother);
            metadata.register_trio(study, trio).await?;
            trios.push(trio);
        }
        info!("Registered {} families in study {}", trios.len(), study);
        Ok(trios)
    }
}
