// ==============================================================================
// schema/registry.rs - Schema Version Registry
// ==============================================================================
// Description: Per-study schema versions and their STAGING/ACTIVE/DEPRECATED lifecycle
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Lifecycle:
//   STAGING    - registered, samples still being indexed with it
//   ACTIVE     - every READY sample has all enabled indexes READY for it
//   DEPRECATED - superseded by a newer ACTIVE version no sample still needs
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

use super::{SampleIndexConfiguration, SampleIndexSchema};
use crate::error::{IndexError, Result};
use crate::metadata::{IndexKind, SampleMetadata, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaStatus {
    Staging,
    Active,
    Deprecated,
}

impl SchemaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaStatus::Staging => "STAGING",
            SchemaStatus::Active => "ACTIVE",
            SchemaStatus::Deprecated => "DEPRECATED",
        }
    }
}

impl fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegisteredSchema {
    schema: SampleIndexSchema,
    status: SchemaStatus,
}

/// Schemas keyed by (study, version)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaRegistry {
    studies: BTreeMap<String, BTreeMap<u32, RegisteredSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a configuration for a study
    ///
    /// Re-registering the latest configuration returns the existing version;
    /// anything else creates a new STAGING version. Earlier versions are never
    /// touched.
    pub fn register(
        &mut self,
        study: &str,
        configuration: SampleIndexConfiguration,
    ) -> Result<SampleIndexSchema> {
        let versions = self.studies.entry(study.to_string()).or_default();
        if let Some((_, latest)) = versions.iter().next_back() {
            if latest.schema.configuration() == &configuration {
                return Ok(latest.schema.clone());
            }
        }

        let version = versions.keys().next_back().map(|v| v + 1).unwrap_or(1);
        let schema = SampleIndexSchema::new(version, configuration)?;
        versions.insert(
            version,
            RegisteredSchema {
                schema: schema.clone(),
                status: SchemaStatus::Staging,
            },
        );
        info!("Registered sample index schema version {} for study {}", version, study);
        Ok(schema)
    }

    pub fn get(&self, study: &str, version: u32) -> Result<&SampleIndexSchema> {
        self.entry(study, version).map(|r| &r.schema)
    }

    pub fn latest(&self, study: &str) -> Option<&SampleIndexSchema> {
        self.studies
            .get(study)
            .and_then(|versions| versions.values().next_back())
            .map(|r| &r.schema)
    }

    /// Most recent ACTIVE version, which readers should use
    pub fn active(&self, study: &str) -> Option<&SampleIndexSchema> {
        self.studies.get(study).and_then(|versions| {
            versions
                .values()
                .rev()
                .find(|r| r.status == SchemaStatus::Active)
                .map(|r| &r.schema)
        })
    }

    pub fn versions(&self, study: &str) -> Vec<u32> {
        self.studies
            .get(study)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn status(&self, study: &str, version: u32) -> Result<SchemaStatus> {
        self.entry(study, version).map(|r| r.status)
    }

    /// Promote a STAGING version to ACTIVE when every indexed sample is complete
    ///
    /// A sample counts as indexed when its genotype index is READY for any
    /// version. It is complete for `version` when genotype, annotation (if
    /// enabled) and family (if enabled and the sample has parents) are READY.
    pub fn update_schema_status(
        &mut self,
        study: &str,
        version: u32,
        samples: &[SampleMetadata],
    ) -> Result<SchemaStatus> {
        let registered = self.entry_mut(study, version)?;
        if registered.status != SchemaStatus::Staging {
            return Ok(registered.status);
        }

        let schema = &registered.schema;
        let indexed: Vec<&SampleMetadata> = samples
            .iter()
            .filter(|s| s.ready_in_any_version(IndexKind::Genotype))
            .collect();
        if indexed.is_empty() {
            return Ok(registered.status);
        }

        let complete = indexed.iter().all(|sample| {
            sample.status(IndexKind::Genotype, version) == TaskStatus::Ready
                && (!schema.annotation_index_enabled()
                    || sample.status(IndexKind::Annotation, version) == TaskStatus::Ready)
                && (!schema.family_index_enabled()
                    || !sample.has_parents()
                    || sample.status(IndexKind::Family, version) == TaskStatus::Ready)
        });

        if complete {
            registered.status = SchemaStatus::Active;
            info!("Sample index schema version {} of study {} is now ACTIVE", version, study);
        }
        Ok(registered.status)
    }

    /// Deprecate versions older than the newest ACTIVE one that no sample still needs
    ///
    /// # Returns
    /// * Versions moved to DEPRECATED by this call
    pub fn deprecate_schemas(&mut self, study: &str, samples: &[SampleMetadata]) -> Vec<u32> {
        let Some(active) = self.active(study).map(|s| s.version()) else {
            return Vec::new();
        };
        let Some(versions) = self.studies.get_mut(study) else {
            return Vec::new();
        };

        let mut deprecated = Vec::new();
        for (version, registered) in versions.range_mut(..active) {
            if registered.status == SchemaStatus::Deprecated {
                continue;
            }
            let still_needed = samples.iter().any(|sample| {
                sample.status(IndexKind::Genotype, *version) == TaskStatus::Ready
                    && sample.status(IndexKind::Genotype, active) != TaskStatus::Ready
            });
            if !still_needed {
                registered.status = SchemaStatus::Deprecated;
                deprecated.push(*version);
            }
        }
        if !deprecated.is_empty() {
            info!("Deprecated schema versions {:?} of study {}", deprecated, study);
        }
        deprecated
    }

    fn entry(&self, study: &str, version: u32) -> Result<&RegisteredSchema> {
        self.studies
            .get(study)
            .and_then(|versions| versions.get(&version))
            .ok_or_else(|| IndexError::SchemaNotFound {
                study: study.to_string(),
                version,
            })
    }

    fn entry_mut(&mut self, study: &str, version: u32) -> Result<&mut RegisteredSchema> {
        self.studies
            .get_mut(study)
            .and_then(|versions| versions.get_mut(&version))
            .ok_or_else(|| IndexError::SchemaNotFound {
                study: study.to_string(),
                version,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: u32, genotype: &[(u32, TaskStatus)], annotation: &[(u32, TaskStatus)], family: &[(u32, TaskStatus)]) -> SampleMetadata {
        let mut metadata = SampleMetadata::new(id, format!("S{}", id));
        for (v, s) in genotype {
            metadata.genotype_index.insert(*v, *s);
        }
        for (v, s) in annotation {
            metadata.annotation_index.insert(*v, *s);
        }
        for (v, s) in family {
            metadata.family_index.insert(*v, *s);
        }
        metadata
    }

    #[test]
    fn test_register_is_additive() {
        let mut registry = SchemaRegistry::new();
        let v1 = registry
            .register("study", SampleIndexConfiguration::backward_compatible_configuration())
            .unwrap();
        let again = registry
            .register("study", SampleIndexConfiguration::backward_compatible_configuration())
            .unwrap();
        let v2 = registry
            .register("study", SampleIndexConfiguration::default_configuration())
            .unwrap();

        assert_eq!(v1.version(), 1);
        assert_eq!(again.version(), 1);
        assert_eq!(v2.version(), 2);
        assert_eq!(registry.versions("study"), vec![1, 2]);
        // Version 1 unchanged by later registrations
        assert_eq!(registry.get("study", 1).unwrap(), &v1);
        assert!(matches!(
            registry.get("study", 3),
            Err(IndexError::SchemaNotFound { version: 3, .. })
        ));
    }

    #[test]
    fn test_promotion_requires_all_ready_samples() {
        use TaskStatus::*;
        let mut config = SampleIndexConfiguration::default_configuration();
        config.family_index_enabled = false;

        let mut registry = SchemaRegistry::new();
        registry.register("study", config).unwrap();

        let samples = vec![
            sample(1, &[(1, Ready)], &[(1, Ready)], &[]),
            sample(2, &[(1, Ready)], &[(1, Running)], &[]),
        ];
        assert_eq!(
            registry.update_schema_status("study", 1, &samples).unwrap(),
            SchemaStatus::Staging
        );

        let samples = vec![
            sample(1, &[(1, Ready)], &[(1, Ready)], &[]),
            sample(2, &[(1, Ready)], &[(1, Ready)], &[]),
            // Never indexed, does not block
            sample(3, &[], &[], &[]),
        ];
        assert_eq!(
            registry.update_schema_status("study", 1, &samples).unwrap(),
            SchemaStatus::Active
        );
        assert_eq!(registry.active("study").unwrap().version(), 1);
    }

    #[test]
    fn test_deprecate_older_versions() {
        use TaskStatus::*;
        let mut registry = SchemaRegistry::new();
        let mut old = SampleIndexConfiguration::backward_compatible_configuration();
        old.family_index_enabled = false;
        old.annotation_index_enabled = false;
        let mut new = SampleIndexConfiguration::default_configuration();
        new.family_index_enabled = false;
        new.annotation_index_enabled = false;
        registry.register("study", old).unwrap();
        registry.register("study", new).unwrap();

        let samples = vec![sample(1, &[(1, Ready), (2, Ready)], &[], &[])];
        registry.update_schema_status("study", 1, &samples).unwrap();
        registry.update_schema_status("study", 2, &samples).unwrap();

        assert_eq!(registry.deprecate_schemas("study", &samples), vec![1]);
        assert_eq!(registry.status("study", 1).unwrap(), SchemaStatus::Deprecated);
        assert_eq!(registry.status("study", 2).unwrap(), SchemaStatus::Active);
    }

    #[test]
    fn test_deprecation_blocked_by_sample_on_old_version() {
        use TaskStatus::*;
        let mut registry = SchemaRegistry::new();
        let mut old = SampleIndexConfiguration::backward_compatible_configuration();
        old.annotation_index_enabled = false;
        let mut new = SampleIndexConfiguration::default_configuration();
        new.annotation_index_enabled = false;
        registry.register("study", old).unwrap();
        registry.register("study", new).unwrap();

        let complete = vec![sample(1, &[(2, Ready)], &[], &[])];
        registry.update_schema_status("study", 2, &complete).unwrap();

        let lagging = vec![
            sample(1, &[(2, Ready)], &[], &[]),
            sample(2, &[(1, Ready)], &[], &[]),
        ];
        assert!(registry.deprecate_schemas("study", &lagging).is_empty());
        assert_eq!(registry.status("study", 1).unwrap(), SchemaStatus::Staging);
    }
}
