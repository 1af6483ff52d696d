// ==============================================================================
// parsers/vcf.rs - VCF file parser
// ==============================================================================
// Description: Reads VCF records and GT calls using noodles-vcf
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// References:
// - VCF 4.3 Spec: https://samtools.github.io/hts-specs/VCFv4.3.pdf
// - noodles-vcf: https://docs.rs/noodles-vcf/0.81.0/noodles_vcf/
//
// Multi-allelic records are split into one record per alternate. Calls are
// recoded per split record: 0 stays 0, the record's own alternate becomes 1,
// any other alternate becomes 2, missing stays ".".
// ==============================================================================

use noodles_vcf as vcf;
use noodles_vcf::variant::record::{AlternateBases, Ids};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::error::{IndexError, Result};
use crate::models::{AnnotatedVariant, SampleId, Variant, VariantRecord};

/// Parsed file: sample columns and split records in file order
#[derive(Debug, Clone, Default)]
pub struct VcfContents {
    pub samples: Vec<String>,
    pub records: Vec<VariantRecord>,
}

impl VcfContents {
    /// Genotype-index input with samples resolved to ids
    ///
    /// Samples missing from `ids` are dropped.
    pub fn annotated_variants(&self, ids: &BTreeMap<String, SampleId>) -> Vec<AnnotatedVariant> {
        self.records
            .iter()
            .map(|record| {
                let mut annotated = AnnotatedVariant::new(record.variant.clone());
                for (name, gt) in &record.genotypes {
                    if let Some(id) = ids.get(name) {
                        annotated.genotypes.insert(*id, gt.clone());
                    }
                }
                annotated
            })
            .collect()
    }
}

/// VCF reader with error tolerance
pub struct VcfVariantReader {
    /// Maximum number of bad records before failing
    pub max_errors: usize,

    /// Count of error records (for reporting)
    pub error_count: usize,
}

impl Default for VcfVariantReader {
    fn default() -> Self {
        Self {
            max_errors: 1000,
            error_count: 0,
        }
    }
}

impl VcfVariantReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_errors(mut self, max: usize) -> Self {
        self.max_errors = max;
        self
    }

    /// Read a VCF file (plain or bgzip-compressed)
    ///
    /// # Arguments
    /// * `path` - Path to the VCF file
    ///
    /// # Returns
    /// * `Ok(VcfContents)` - Sample names and split records
    /// * `Err(IndexError::Vcf)` - Unreadable file/header or too many bad records
    pub fn read(&mut self, path: impl AsRef<Path>) -> Result<VcfContents> {
        let path = path.as_ref();
        let mut reader = vcf::io::reader::Builder::default()
            .build_from_path(path)
            .map_err(|e| IndexError::Vcf(format!("{}: {}", path.display(), e)))?;
        let header = reader
            .read_header()
            .map_err(|e| IndexError::Vcf(format!("Failed to read header: {}", e)))?;

        let mut contents = VcfContents {
            samples: header.sample_names().iter().cloned().collect(),
            records: Vec::new(),
        };
        self.error_count = 0;

        for (line_num, result) in reader.records().enumerate() {
            let parsed = result
                .map_err(|e| IndexError::Vcf(format!("Failed to read record: {}", e)))
                .and_then(|record| parse_record(&record, &contents.samples));
            match parsed {
                Ok(records) => contents.records.extend(records),
                Err(e) => {
                    warn!("Record {}: {}", line_num + 1, e);
                    self.error_count += 1;
                    if self.error_count > self.max_errors {
                        return Err(IndexError::Vcf(format!(
                            "Too many errors ({} > {})",
                            self.error_count, self.max_errors
                        )));
                    }
                }
            }
        }

        Ok(contents)
    }
}

/// Split one VCF record into one record per alternate
fn parse_record(record: &vcf::Record, samples: &[String]) -> Result<Vec<VariantRecord>> {
    let chromosome = record.reference_sequence_name().to_string();
    let position = match record.variant_start() {
        Some(Ok(pos)) => usize::from(pos) as u64,
        Some(Err(e)) => return Err(IndexError::Vcf(format!("Failed to get position: {}", e))),
        None => return Err(IndexError::Vcf("Missing position".to_string())),
    };
    let reference = record.reference_bases().to_string();

    let ids: Vec<String> = record.ids().iter().map(|id| id.to_string()).collect();
    let quality = match record.quality_score() {
        Some(Ok(q)) => Some(q),
        _ => None,
    };
    let filter = match record.filters().as_ref() {
        "" | "." => None,
        f => Some(f.to_string()),
    };

    let calls = genotype_calls(record.samples().as_ref(), samples.len())?;

    let alternate_bases = record.alternate_bases();
    let alternates = alternate_bases
        .iter()
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| IndexError::Vcf(format!("Failed to get ALT allele: {}", e)))?;
    if alternates.is_empty() {
        return Err(IndexError::Vcf(format!("{}:{} has no ALT allele", chromosome, position)));
    }

    let mut split = Vec::with_capacity(alternates.len());
    for (index, alternate) in alternates.iter().enumerate() {
        let mut variant_record = VariantRecord::new(Variant::new(
            chromosome.clone(),
            position,
            reference.clone(),
            alternate.to_string(),
        ));
        variant_record.ids = ids.clone();
        variant_record.quality = quality;
        variant_record.filter = filter.clone();
        variant_record.genotypes = samples
            .iter()
            .zip(&calls)
            .map(|(name, gt)| (name.clone(), recode_genotype(gt, index as u32 + 1)))
            .collect();
        split.push(variant_record);
    }
    Ok(split)
}

/// GT value of every sample column, "." where GT is absent
fn genotype_calls(raw_samples: &str, sample_count: usize) -> Result<Vec<String>> {
    if sample_count == 0 || raw_samples.is_empty() {
        return Ok(Vec::new());
    }
    let mut columns = raw_samples.split('\t');
    let format = columns
        .next()
        .ok_or_else(|| IndexError::Vcf("Missing FORMAT column".to_string()))?;
    let gt_index = format.split(':').position(|key| key == "GT");

    let calls: Vec<String> = columns
        .map(|column| match gt_index {
            Some(i) => column.split(':').nth(i).unwrap_or(".").to_string(),
            None => ".".to_string(),
        })
        .collect();
    if calls.len() != sample_count {
        return Err(IndexError::Vcf(format!(
            "Expected {} sample columns, found {}",
            sample_count,
            calls.len()
        )));
    }
    Ok(calls)
}

/// Recode a GT string relative to one alternate of a split record
pub fn recode_genotype(gt: &str, alternate: u32) -> String {
    let mut out = String::with_capacity(gt.len());
    let mut allele = String::new();
    let flush = |allele: &mut String, out: &mut String| {
        match allele.as_str() {
            "" => {}
            "." | "0" => out.push_str(allele),
            a => match a.parse::<u32>() {
                Ok(i) if i == alternate => out.push('1'),
                Ok(_) => out.push('2'),
                Err(_) => out.push('.'),
            },
        }
        allele.clear();
    };
    for c in gt.chars() {
        if c == '/' || c == '|' {
            flush(&mut allele, &mut out);
            out.push(c);
        } else {
            allele.push(c);
        }
    }
    flush(&mut allele, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VCF: &str = "##fileformat=VCFv4.3
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tchild\tfather\tmother
1\t100\trs1\tA\tG\t50\tPASS\t.\tGT:DP\t0/1:10\t0/0:12\t1/1:9
1\t200\t.\tC\tT,CA\t.\t.\t.\tGT\t1|2\t./.\t0/2
2\t50\t.\tG\tA\t.\t.\t.\tDP\t3\t4\t5
";

    fn write_vcf(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".vcf").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_recode_genotype() {
        assert_eq!(recode_genotype("0/1", 1), "0/1");
        assert_eq!(recode_genotype("1|2", 2), "2|1");
        assert_eq!(recode_genotype("2/2", 2), "1/1");
        assert_eq!(recode_genotype("0/3", 1), "0/2");
        assert_eq!(recode_genotype("./.", 1), "./.");
        assert_eq!(recode_genotype("1", 1), "1");
    }

    #[test]
    fn test_read_splits_multiallelic() {
        let file = write_vcf(VCF);
        let mut reader = VcfVariantReader::new();
        let contents = reader.read(file.path()).unwrap();

        assert_eq!(contents.samples, vec!["child", "father", "mother"]);
        assert_eq!(contents.records.len(), 4);

        let first = &contents.records[0];
        assert_eq!(first.variant.start, 100);
        assert_eq!(first.ids, vec!["rs1"]);
        assert_eq!(first.quality, Some(50.0));
        assert_eq!(first.filter.as_deref(), Some("PASS"));
        assert_eq!(first.genotypes[2], ("mother".to_string(), "1/1".to_string()));

        let (t, ca) = (&contents.records[1], &contents.records[2]);
        assert_eq!(t.variant.alternate, "T");
        assert_eq!(t.genotypes[0].1, "1|2");
        assert_eq!(t.genotypes[2].1, "0/2");
        assert_eq!(ca.variant.alternate, "CA");
        assert_eq!(ca.genotypes[0].1, "2|1");
        assert_eq!(ca.genotypes[1].1, "./.");

        // No GT in FORMAT: every call missing
        assert!(contents.records[3].genotypes.iter().all(|(_, gt)| gt == "."));
    }

    #[test]
    fn test_annotated_variants_map_ids() {
        let file = write_vcf(VCF);
        let contents = VcfVariantReader::new().read(file.path()).unwrap();
        let ids: BTreeMap<String, SampleId> = [("child".to_string(), 7), ("mother".to_string(), 9)]
            .into_iter()
            .collect();
        let variants = contents.annotated_variants(&ids);
        assert_eq!(variants.len(), 4);
        assert_eq!(variants[0].genotypes.len(), 2);
        assert_eq!(variants[0].genotypes[&9], "1/1");
    }

    #[test]
    fn test_missing_file() {
        assert!(VcfVariantReader::new().read("/nonexistent/file.vcf").is_err());
    }
}
