// ==============================================================================
// genotype.rs - Genotype Call Parsing
// ==============================================================================
// Description: Parses VCF-style GT strings and classifies them for indexing
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Accepted forms:
//   - Diploid: "0/1", "1|0", "1/2"
//   - Haploid: "0", "1"
//   - Missing: ".", "./.", ".|."
//   - Partially missing: "./1", "0/."
// ==============================================================================

use std::fmt;

use crate::error::{IndexError, Result};

/// Parsed genotype call. `None` alleles are missing calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Genotype {
    alleles: Vec<Option<u32>>,
    phased: bool,
}

impl Genotype {
    /// Parse a GT string
    ///
    /// # Arguments
    /// * `gt` - Genotype string (e.g., "0/1", "1|1", "./.")
    ///
    /// # Returns
    /// * `Ok(Genotype)` - Parsed call
    /// * `Err(IndexError::InvalidGenotype)` - Empty or non-numeric allele
    pub fn parse(gt: &str) -> Result<Self> {
        let gt = gt.trim();
        if gt.is_empty() {
            return Err(IndexError::InvalidGenotype(gt.to_string()));
        }

        let phased = gt.contains('|');
        let mut alleles = Vec::with_capacity(2);
        for allele in gt.split(['/', '|']) {
            match allele {
                "." => alleles.push(None),
                a => {
                    let index = a
                        .parse::<u32>()
                        .map_err(|_| IndexError::InvalidGenotype(gt.to_string()))?;
                    alleles.push(Some(index));
                }
            }
        }

        Ok(Self { alleles, phased })
    }

    pub fn alleles(&self) -> &[Option<u32>] {
        &self.alleles
    }

    pub fn ploidy(&self) -> usize {
        self.alleles.len()
    }

    pub fn is_phased(&self) -> bool {
        self.phased
    }

    /// All alleles missing
    pub fn is_missing(&self) -> bool {
        self.alleles.iter().all(Option::is_none)
    }

    /// At least one allele missing
    pub fn has_missing(&self) -> bool {
        self.alleles.iter().any(Option::is_none)
    }

    /// Called allele indices; None if any allele is missing
    pub fn called(&self) -> Option<Vec<u32>> {
        self.alleles.iter().copied().collect()
    }

    pub fn contains_allele(&self, allele: u32) -> bool {
        self.alleles.contains(&Some(allele))
    }

    pub fn is_hom_ref(&self) -> bool {
        !self.has_missing() && self.alleles.iter().all(|a| *a == Some(0))
    }
}

impl fmt::Display for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.phased { "|" } else { "/" };
        let parts: Vec<String> = self
            .alleles
            .iter()
            .map(|a| a.map(|i| i.to_string()).unwrap_or_else(|| ".".to_string()))
            .collect();
        f.write_str(&parts.join(sep))
    }
}

/// Whether a genotype string should be indexed
///
/// A call is indexable when it parses, is not fully missing and is not listed
/// in `excluded` (compared on the raw string).
pub fn is_indexable(gt: &str, excluded: &[String]) -> bool {
    if excluded.iter().any(|e| e == gt) {
        return false;
    }
    match Genotype::parse(gt) {
        Ok(genotype) => !genotype.is_missing(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_diploid() {
        let gt = Genotype::parse("0/1").unwrap();
        assert_eq!(gt.alleles(), &[Some(0), Some(1)]);
        assert!(!gt.is_phased());
        assert_eq!(gt.ploidy(), 2);

        let phased = Genotype::parse("1|0").unwrap();
        assert!(phased.is_phased());
        assert_eq!(phased.to_string(), "1|0");
    }

    #[test]
    fn test_parse_haploid_and_multiallelic() {
        assert_eq!(Genotype::parse("1").unwrap().ploidy(), 1);
        let multi = Genotype::parse("1/2").unwrap();
        assert!(multi.contains_allele(2));
        assert!(!multi.contains_allele(0));
    }

    #[test]
    fn test_parse_missing() {
        assert!(Genotype::parse("./.").unwrap().is_missing());
        assert!(Genotype::parse(".").unwrap().is_missing());

        let partial = Genotype::parse("./1").unwrap();
        assert!(!partial.is_missing());
        assert!(partial.has_missing());
        assert_eq!(partial.called(), None);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Genotype::parse("").is_err());
        assert!(Genotype::parse("A/G").is_err());
        assert!(Genotype::parse("0/").is_err());
    }

    #[test]
    fn test_hom_ref() {
        assert!(Genotype::parse("0/0").unwrap().is_hom_ref());
        assert!(Genotype::parse("0").unwrap().is_hom_ref());
        assert!(!Genotype::parse("0/.").unwrap().is_hom_ref());
    }

    #[test]
    fn test_is_indexable() {
        assert!(is_indexable("0/1", &[]));
        assert!(is_indexable("0/0", &[]));
        assert!(is_indexable("./1", &[]));
        assert!(!is_indexable("./.", &[]));
        assert!(!is_indexable("NA", &[]));
        assert!(!is_indexable("0/0", &["0/0".to_string()]));
    }
}
