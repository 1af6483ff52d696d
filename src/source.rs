// ==============================================================================
// source.rs - Annotated Variant Source
// ==============================================================================
// Description: Sorted annotated-variant stream consumed by the indexers
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{IndexError, Result};
use crate::models::{AnnotatedVariant, Region, SampleId};

/// Filter for a variant stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantQuery {
    pub study: String,

    /// Keep genotypes of these samples only (empty keeps all)
    pub samples: Vec<SampleId>,

    pub region: Option<Region>,

    /// Drop genotypes, keep annotations
    pub annotation_only: bool,
}

impl VariantQuery {
    pub fn new(study: &str) -> Self {
        Self {
            study: study.to_string(),
            ..Default::default()
        }
    }

    pub fn samples(mut self, samples: &[SampleId]) -> Self {
        self.samples = samples.to_vec();
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn annotation_only(mut self) -> Self {
        self.annotation_only = true;
        self
    }

    /// Apply the query's projection to one variant, or None if filtered out
    pub fn project(&self, variant: &AnnotatedVariant) -> Option<AnnotatedVariant> {
        if let Some(region) = &self.region {
            if !region.contains(&variant.variant.chromosome, variant.variant.start) {
                return None;
            }
        }
        let mut projected = variant.clone();
        if self.annotation_only {
            projected.genotypes.clear();
        } else if !self.samples.is_empty() {
            let samples: BTreeSet<SampleId> = self.samples.iter().copied().collect();
            projected.genotypes.retain(|s, _| samples.contains(s));
        }
        Some(projected)
    }
}

pub type VariantStream<'a> = BoxStream<'a, Result<AnnotatedVariant>>;

/// Lazy stream of annotated variants
///
/// Implementations deliver variants in non-decreasing position order within
/// each chromosome. The caller stops the stream by dropping it.
pub trait VariantSource: Send + Sync {
    fn query(&self, query: &VariantQuery) -> Result<VariantStream<'_>>;
}

/// In-memory source serving variants in insertion order
#[derive(Debug, Default)]
pub struct MemoryVariantSource {
    variants: Vec<AnnotatedVariant>,
    fail_after: Option<usize>,
    failures_left: AtomicUsize,
}

impl MemoryVariantSource {
    pub fn new(variants: Vec<AnnotatedVariant>) -> Self {
        Self {
            variants,
            fail_after: None,
            failures_left: AtomicUsize::new(0),
        }
    }

    /// Make the next `times` annotation-only streams fail after `items` variants
    pub fn fail_annotation_streams(mut self, items: usize, times: usize) -> Self {
        self.fail_after = Some(items);
        self.failures_left = AtomicUsize::new(times);
        self
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl VariantSource for MemoryVariantSource {
    fn query(&self, query: &VariantQuery) -> Result<VariantStream<'_>> {
        let query = query.clone();
        let fail_at = match self.fail_after {
            Some(n) if query.annotation_only && self.take_failure() => Some(n),
            _ => None,
        };

        let items = self
            .variants
            .iter()
            .filter_map(move |v| query.project(v))
            .map(Ok)
            .enumerate()
            .take_while(move |(i, _)| fail_at.map(|n| *i < n).unwrap_or(true))
            .map(|(_, item)| item);

        let failure = fail_at.map(|n| {
            Err(IndexError::Source(format!(
                "Variant stream interrupted after {} variants",
                n
            )))
        });

        Ok(stream::iter(items).chain(stream::iter(failure)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Variant;
    use futures::TryStreamExt;

    fn variants() -> Vec<AnnotatedVariant> {
        vec![
            AnnotatedVariant::new(Variant::new("1", 10, "A", "G"))
                .with_genotype(1, "0/1")
                .with_genotype(2, "1/1"),
            AnnotatedVariant::new(Variant::new("1", 20, "C", "T")).with_genotype(1, "0/0"),
            AnnotatedVariant::new(Variant::new("2", 5, "G", "A")).with_genotype(2, "0/1"),
        ]
    }

    #[tokio::test]
    async fn test_query_filters() {
        let source = MemoryVariantSource::new(variants());

        let all: Vec<_> = source
            .query(&VariantQuery::new("s"))
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let chr1: Vec<_> = source
            .query(&VariantQuery::new("s").region(Region::chromosome("1")).samples(&[2]))
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chr1.len(), 2);
        assert_eq!(chr1[0].genotypes.len(), 1);
        assert!(chr1[1].genotypes.is_empty());

        let annotations: Vec<_> = source
            .query(&VariantQuery::new("s").annotation_only())
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(annotations.iter().all(|v| v.genotypes.is_empty()));
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let source = MemoryVariantSource::new(variants()).fail_annotation_streams(1, 1);
        let query = VariantQuery::new("s").annotation_only();

        let mut stream = source.query(&query).unwrap();
        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(stream.next().await, Some(Err(IndexError::Source(_)))));
        assert!(stream.next().await.is_none());

        let retried: Vec<_> = source.query(&query).unwrap().try_collect().await.unwrap();
        assert_eq!(retried.len(), 3);
    }
}
