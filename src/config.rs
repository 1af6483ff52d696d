// ==============================================================================
// config.rs - Engine Configuration
// ==============================================================================
// Description: Environment-driven settings for the indexers and stage loader
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Environment variables (defaults in brackets):
//   SAMPLE_INDEX_DIR           entry store root        [./sample-index]
//   SAMPLE_INDEX_FORMAT        json | binary           [binary]
//   SAMPLE_INDEX_CHUNK_SIZE    chunk width in bases    [1000000]
//   SAMPLE_INDEX_WRITE_BATCH   entries per store write [256]
//   SAMPLE_INDEX_PARALLELISM   concurrent trios        [4]
//   SAMPLE_INDEX_CONFIG        schema configuration JSON file
//   STAGE_BATCH_SIZE           records per stage batch [1000]
//   STAGE_SKIP_TYPES           comma separated types   [NO_VARIATION,SYMBOLIC]
//   DATABASE_URL / DATABASE_URL_FILE   staging database
// ==============================================================================

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{IndexError, Result};
use crate::index::EntryFormat;
use crate::models::VariantType;
use crate::schema::configuration::DEFAULT_CHUNK_SIZE;
use crate::schema::SampleIndexConfiguration;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub index_dir: PathBuf,
    pub format: EntryFormat,
    pub chunk_size: u64,
    pub write_batch_size: usize,
    pub parallelism: usize,
    pub schema_config: Option<PathBuf>,
    pub stage_batch_size: usize,
    pub stage_skip_types: Vec<VariantType>,
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("./sample-index"),
            format: EntryFormat::Binary,
            chunk_size: DEFAULT_CHUNK_SIZE,
            write_batch_size: 256,
            parallelism: 4,
            schema_config: None,
            stage_batch_size: 1000,
            stage_skip_types: vec![VariantType::NoVariation, VariantType::Symbolic],
            database_url: None,
        }
    }
}

impl EngineConfig {
    /// Load from the process environment, after reading `.env` if present
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;

        if config.database_url.is_none() {
            if let Ok(file_path) = std::env::var("DATABASE_URL_FILE") {
                let url = std::fs::read_to_string(&file_path)?;
                config.database_url = Some(url.trim().to_string());
            }
        }
        Ok(config)
    }

    /// Build from any key lookup; unset keys keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup("SAMPLE_INDEX_DIR") {
            config.index_dir = PathBuf::from(dir);
        }
        if let Some(format) = lookup("SAMPLE_INDEX_FORMAT") {
            config.format = format.parse()?;
        }
        if let Some(value) = lookup("SAMPLE_INDEX_CHUNK_SIZE") {
            config.chunk_size = parse_number("SAMPLE_INDEX_CHUNK_SIZE", &value)?;
        }
        if let Some(value) = lookup("SAMPLE_INDEX_WRITE_BATCH") {
            config.write_batch_size = parse_number("SAMPLE_INDEX_WRITE_BATCH", &value)?;
        }
        if let Some(value) = lookup("SAMPLE_INDEX_PARALLELISM") {
            config.parallelism = parse_number("SAMPLE_INDEX_PARALLELISM", &value)?;
        }
        config.schema_config = lookup("SAMPLE_INDEX_CONFIG").map(PathBuf::from);
        if let Some(value) = lookup("STAGE_BATCH_SIZE") {
            config.stage_batch_size = parse_number("STAGE_BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("STAGE_SKIP_TYPES") {
            config.stage_skip_types = value
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(VariantType::from_str)
                .collect::<Result<Vec<_>>>()?;
        }
        config.database_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());

        Ok(config)
    }

    /// Schema configuration from `SAMPLE_INDEX_CONFIG` or the defaults, with
    /// the configured chunk size applied
    pub fn schema_configuration(&self) -> Result<SampleIndexConfiguration> {
        let mut configuration = match &self.schema_config {
            Some(path) => SampleIndexConfiguration::from_json_file(path)?,
            None => SampleIndexConfiguration::default_configuration(),
        };
        if self.schema_config.is_none() || self.chunk_size != DEFAULT_CHUNK_SIZE {
            configuration.chunk_size = self.chunk_size;
        }
        configuration.validate()?;
        Ok(configuration)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IndexError::InvalidInput(format!("{} must be a number, got '{}'", key, value)))
}
