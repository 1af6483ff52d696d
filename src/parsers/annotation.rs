// ==============================================================================
// parsers/annotation.rs - Variant annotation parser
// ==============================================================================
// Description: Reads JSON-lines variant annotations for the annotation index
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Format: one JSON object per line
//   {"chromosome":"1","start":100,"reference":"A","alternate":"G",
//    "annotation":{"consequence_types":[...],"population_frequencies":[...]}}
// Blank lines and lines starting with '#' are skipped.
// ==============================================================================

use serde::Deserialize;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::error::{IndexError, Result};
use crate::models::{AnnotatedVariant, Variant, VariantAnnotation};

#[derive(Debug, Deserialize)]
struct AnnotationLine {
    chromosome: String,
    start: u64,
    reference: String,
    alternate: String,
    #[serde(default)]
    annotation: VariantAnnotation,
}

pub struct AnnotationParser;

impl AnnotationParser {
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Vec<AnnotatedVariant>> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::parse(file)
    }

    /// Parse annotation lines into annotated variants without genotypes
    ///
    /// # Returns
    /// * `Ok(Vec<AnnotatedVariant>)` - Variants in file order
    /// * `Err(IndexError::InvalidInput)` - Malformed line, with its line number
    pub fn parse<R: Read>(input: R) -> Result<Vec<AnnotatedVariant>> {
        let mut variants = Vec::new();
        for (idx, line) in BufReader::new(input).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let parsed: AnnotationLine = serde_json::from_str(trimmed)
                .map_err(|e| IndexError::InvalidInput(format!("Annotation line {}: {}", idx + 1, e)))?;
            let variant = Variant::new(parsed.chromosome, parsed.start, parsed.reference, parsed.alternate);
            variants.push(AnnotatedVariant::new(variant).with_annotation(parsed.annotation));
        }
        Ok(variants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_annotations() {
        let input = r#"# annotations
{"chromosome":"1","start":100,"reference":"A","alternate":"G","annotation":{"consequence_types":[{"gene_name":"BRCA2","biotype":"protein_coding","sequence_ontology_terms":["missense_variant"]}]}}

{"chromosome":"1","start":200,"reference":"AC","alternate":"A"}
"#;
        let variants = AnnotationParser::parse(input.as_bytes()).unwrap();
        assert_eq!(variants.len(), 2);
        let first = variants[0].annotation.as_ref().unwrap();
        assert_eq!(first.consequence_types[0].gene_name.as_deref(), Some("BRCA2"));
        assert_eq!(variants[1].variant.end, 201);
        assert!(variants[1].annotation.as_ref().unwrap().consequence_types.is_empty());
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let input = "{\"chromosome\":\"1\",\"start\":1,\"reference\":\"A\",\"alternate\":\"G\"}\nnot json\n";
        let err = AnnotationParser::parse(input.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
