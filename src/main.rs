// ==============================================================================
// main.rs - Sample Index Entry Point
// ==============================================================================
// Description: Command line driver for staging and sample-index builds
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Study metadata and the schema registry persist as JSON snapshots next to
// the index entries (metadata.json, schemas.json under SAMPLE_INDEX_DIR).
// ==============================================================================

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genetics_sample_index::config::EngineConfig;
use genetics_sample_index::index::{
    GenotypeIndexOptions, LocalSampleIndexStore, SampleAnnotationIndexer, SampleFamilyIndexer,
    SampleGenotypeIndexer, SampleIndexStore,
};
use genetics_sample_index::metadata::{IndexKind, MemoryMetadataStore, MetadataStore, TaskStatus};
use genetics_sample_index::parsers::{AnnotationParser, PedigreeParser, VcfVariantReader};
use genetics_sample_index::schema::{SampleIndexSchema, SchemaRegistry};
use genetics_sample_index::source::MemoryVariantSource;
use genetics_sample_index::stage::{MemoryStageStore, PgStageStore, StageConverter, StageLoader, StageStore};

const METADATA_FILE: &str = "metadata.json";
const SCHEMAS_FILE: &str = "schemas.json";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Study identifier
    #[arg(short, long, env = "SAMPLE_INDEX_STUDY")]
    study: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stage the variants of a VCF file
    Stage {
        /// VCF file (plain or bgzip-compressed)
        vcf: PathBuf,

        /// File identifier inside the study (defaults to the file name)
        #[arg(long)]
        file_id: Option<String>,

        /// Stage in memory only, without a database
        #[arg(long)]
        dry_run: bool,
    },

    /// Build the genotype index of every sample in a VCF file
    GenotypeIndex {
        vcf: PathBuf,

        /// Merge with entries already stored for the same chunks
        #[arg(long)]
        merge: bool,
    },

    /// Annotate the genotype index from a JSON-lines annotation file
    AnnotationIndex {
        annotations: PathBuf,

        /// Sample names (defaults to every sample with a ready genotype index)
        #[arg(long, value_delimiter = ',')]
        samples: Vec<String>,
    },

    /// Register a pedigree and build the family index of its children
    FamilyIndex { pedigree: PathBuf },

    /// Print schema versions and sample index statuses
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genetics_sample_index=info,sample_index=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = EngineConfig::from_env().context("Failed to load configuration")?;
    info!("Sample index starting for study {} ({:?})", args.study, config.index_dir);

    tokio::fs::create_dir_all(&config.index_dir)
        .await
        .with_context(|| format!("Failed to create {:?}", config.index_dir))?;
    let metadata_path = config.index_dir.join(METADATA_FILE);
    let schemas_path = config.index_dir.join(SCHEMAS_FILE);

    let metadata = Arc::new(load_metadata(&metadata_path).await?);
    let mut registry = load_registry(&schemas_path).await?;
    let store: Arc<dyn SampleIndexStore> = Arc::new(LocalSampleIndexStore::new(&config.index_dir, config.format));

    let outcome = match args.command {
        Command::Stage { vcf, file_id, dry_run } => {
            stage(&config, &args.study, metadata.clone(), &vcf, file_id, dry_run).await
        }
        Command::GenotypeIndex { vcf, merge } => {
            let schema = register_schema(&config, &mut registry, metadata.as_ref(), &args.study).await?;
            genotype_index(&config, &args.study, &schema, store, metadata.clone(), &vcf, merge).await
        }
        Command::AnnotationIndex { annotations, samples } => {
            let schema = current_schema(&registry, &args.study)?;
            annotation_index(&args.study, &schema, store, metadata.clone(), &annotations, &samples).await
        }
        Command::FamilyIndex { pedigree } => {
            let schema = current_schema(&registry, &args.study)?;
            family_index(&config, &args.study, &schema, store, metadata.clone(), &pedigree).await
        }
        Command::Status => print_status(&registry, metadata.as_ref(), &args.study).await,
    };

    // Statuses are persisted even when the command failed
    let samples = metadata.samples(&args.study).await?;
    for version in registry.versions(&args.study) {
        registry.update_schema_status(&args.study, version, &samples)?;
    }
    registry.deprecate_schemas(&args.study, &samples);
    metadata.save(&metadata_path).await.context("Failed to save metadata")?;
    save_registry(&registry, &schemas_path).await?;

    outcome
}

async fn load_metadata(path: &Path) -> Result<MemoryMetadataStore> {
    if tokio::fs::try_exists(path).await? {
        MemoryMetadataStore::load(path)
            .await
            .with_context(|| format!("Failed to load metadata from {:?}", path))
    } else {
        Ok(MemoryMetadataStore::new())
    }
}

async fn load_registry(path: &Path) -> Result<SchemaRegistry> {
    if tokio::fs::try_exists(path).await? {
        let data = tokio::fs::read(path).await?;
        serde_json::from_slice(&data).with_context(|| format!("Failed to parse {:?}", path))
    } else {
        Ok(SchemaRegistry::new())
    }
}

async fn save_registry(registry: &SchemaRegistry, path: &Path) -> Result<()> {
    let data = serde_json::to_vec_pretty(registry)?;
    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("Failed to write {:?}", path))
}

/// Register the configured schema; a new version invalidates secondary indexes
async fn register_schema(
    config: &EngineConfig,
    registry: &mut SchemaRegistry,
    metadata: &dyn MetadataStore,
    study: &str,
) -> Result<SampleIndexSchema> {
    let previous = registry.latest(study).map(|s| s.version());
    let schema = registry.register(study, config.schema_configuration()?)?;
    if previous.is_some_and(|v| v < schema.version()) {
        metadata.invalidate_secondary_indexes(study, schema.version()).await?;
    }
    Ok(schema)
}

fn current_schema(registry: &SchemaRegistry, study: &str) -> Result<SampleIndexSchema> {
    registry
        .latest(study)
        .cloned()
        .with_context(|| format!("No sample index schema for study {}; run genotype-index first", study))
}

async fn stage(
    config: &EngineConfig,
    study: &str,
    metadata: Arc<MemoryMetadataStore>,
    vcf: &Path,
    file_id: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let file_id = match file_id {
        Some(id) => id,
        None => vcf
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .context("VCF path has no file name")?,
    };

    let store: Arc<dyn StageStore> = match (&config.database_url, dry_run) {
        (Some(url), false) => Arc::new(PgStageStore::connect(url, 5).await.context("Failed to connect to database")?),
        (None, false) => anyhow::bail!("DATABASE_URL or DATABASE_URL_FILE must be provided (or pass --dry-run)"),
        (_, true) => {
            warn!("Dry run: staging into memory only");
            Arc::new(MemoryStageStore::new())
        }
    };

    let contents = VcfVariantReader::new().read(vcf)?;
    let converter = StageConverter::new(config.stage_skip_types.iter().copied());
    let result = StageLoader::new(store, study, &file_id)
        .stage_file(
            metadata.as_ref(),
            &converter,
            contents.records.into_iter().map(Ok),
            config.stage_batch_size,
        )
        .await?;
    info!("Staged file {}: {}", file_id, result);
    Ok(())
}

async fn genotype_index(
    config: &EngineConfig,
    study: &str,
    schema: &SampleIndexSchema,
    store: Arc<dyn SampleIndexStore>,
    metadata: Arc<MemoryMetadataStore>,
    vcf: &Path,
    merge: bool,
) -> Result<()> {
    let contents = VcfVariantReader::new().read(vcf)?;
    let mut ids = BTreeMap::new();
    for name in &contents.samples {
        ids.insert(name.clone(), metadata.register_sample(study, name).await?);
    }
    let samples: Vec<_> = ids.values().copied().collect();
    let source = MemoryVariantSource::new(contents.annotated_variants(&ids));

    let options = GenotypeIndexOptions {
        merge_existing: merge,
        write_batch_size: config.write_batch_size,
    };
    let report = SampleGenotypeIndexer::new(store, metadata, options)
        .run(study, schema, &samples, &source)
        .await?;
    info!(
        "Genotype index: {} variants, {} calls, {} entries",
        report.variants_read, report.calls_indexed, report.entries_written
    );
    Ok(())
}

async fn annotation_index(
    study: &str,
    schema: &SampleIndexSchema,
    store: Arc<dyn SampleIndexStore>,
    metadata: Arc<MemoryMetadataStore>,
    annotations: &Path,
    names: &[String],
) -> Result<()> {
    let samples = if names.is_empty() {
        metadata
            .samples(study)
            .await?
            .into_iter()
            .filter(|s| s.status(IndexKind::Genotype, schema.version()) == TaskStatus::Ready)
            .map(|s| s.id)
            .collect::<Vec<_>>()
    } else {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let id = metadata
                .sample_id(study, name)
                .await?
                .with_context(|| format!("Unknown sample {}", name))?;
            ids.push(id);
        }
        ids
    };
    if samples.is_empty() {
        warn!("No samples with a ready genotype index in study {}", study);
        return Ok(());
    }

    let source = MemoryVariantSource::new(AnnotationParser::parse_file(annotations)?);
    let report = SampleAnnotationIndexer::new(store, metadata)
        .run(study, schema, &samples, &source)
        .await?;
    info!(
        "Annotation index: {} regions, {} of {} variants annotated, {} entries",
        report.regions, report.variants_annotated, report.variants_read, report.entries_written
    );
    Ok(())
}

async fn family_index(
    config: &EngineConfig,
    study: &str,
    schema: &SampleIndexSchema,
    store: Arc<dyn SampleIndexStore>,
    metadata: Arc<MemoryMetadataStore>,
    pedigree: &Path,
) -> Result<()> {
    let entries = PedigreeParser::parse_file(pedigree)?;
    let trios = PedigreeParser::register(&entries, study, metadata.as_ref()).await?;
    let report = SampleFamilyIndexer::new(store, metadata, config.parallelism)
        .run(study, schema, &trios)
        .await?;
    info!(
        "Family index: {} trios, {} entries, {} mendelian errors",
        report.trios.len(),
        report.entries_written(),
        report.mendelian_errors()
    );
    Ok(())
}

async fn print_status(registry: &SchemaRegistry, metadata: &dyn MetadataStore, study: &str) -> Result<()> {
    for version in registry.versions(study) {
        println!("schema v{}: {}", version, registry.status(study, version)?);
    }
    let Some(version) = registry.latest(study).map(|s| s.version()) else {
        println!("no schema registered");
        return Ok(());
    };
    for sample in metadata.samples(study).await? {
        println!(
            "{}\tgenotype={}\tannotation={}\tfamily={}",
            sample.name,
            sample.status(IndexKind::Genotype, version),
            sample.status(IndexKind::Annotation, version),
            sample.status(IndexKind::Family, version)
        );
    }
    Ok(())
}
