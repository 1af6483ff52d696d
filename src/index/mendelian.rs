// ==============================================================================
// index/mendelian.rs - Mendelian Classification
// ==============================================================================
// Description: Child/father/mother genotype comparison and parent code packing
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Rule table (autosomal only):
//   child missing or partially called      -> Indeterminate
//   any parent without data at the site    -> Indeterminate
//   both parents called                    -> Consistent if one child allele can
//                                             come from each parent, else Error
//   one parent absent from the family      -> Error if the child shares no allele
//                                             with the present parent, else
//                                             Indeterminate
//   both parents absent                    -> Indeterminate
// ==============================================================================

use crate::genotype::Genotype;

/// 4-bit genotype class of one parent
pub struct GenotypeCode;

impl GenotypeCode {
    pub const HOM_REF: u8 = 0;
    pub const HET_REF: u8 = 1;
    pub const HOM_ALT: u8 = 2;
    pub const HET_ALT: u8 = 3;
    pub const HOM_ALT_MULTI: u8 = 4;
    pub const HAPLOID_REF: u8 = 5;
    pub const HAPLOID_ALT: u8 = 6;
    pub const MISSING: u8 = 7;
    pub const OTHER: u8 = 8;
    /// Parent is in the family but has no call at this site
    pub const NO_DATA: u8 = 14;
    /// Parent is not part of the family
    pub const ABSENT: u8 = 15;

    /// Classify a genotype string
    pub fn of(gt: &str) -> u8 {
        let Ok(genotype) = Genotype::parse(gt) else {
            return Self::OTHER;
        };
        if genotype.is_missing() {
            return Self::MISSING;
        }
        match genotype.called().as_deref() {
            Some([0]) => Self::HAPLOID_REF,
            Some([_]) => Self::HAPLOID_ALT,
            Some([0, 0]) => Self::HOM_REF,
            Some([0, _]) | Some([_, 0]) => Self::HET_REF,
            Some([a, b]) if a == b && *a == 1 => Self::HOM_ALT,
            Some([a, b]) if a == b => Self::HOM_ALT_MULTI,
            Some([_, _]) => Self::HET_ALT,
            _ => Self::OTHER,
        }
    }
}

/// What is known about one parent at a site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentCall<'a> {
    Absent,
    NoData,
    Called(&'a str),
}

impl ParentCall<'_> {
    pub fn code(&self) -> u8 {
        match self {
            ParentCall::Absent => GenotypeCode::ABSENT,
            ParentCall::NoData => GenotypeCode::NO_DATA,
            ParentCall::Called(gt) => GenotypeCode::of(gt),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MendelianClass {
    Consistent,
    Error,
    Indeterminate,
}

/// Pack both parents' codes into one byte, father in the high nibble
pub fn parents_code(father: ParentCall<'_>, mother: ParentCall<'_>) -> u8 {
    (father.code() << 4) | (mother.code() & 0x0f)
}

pub fn decode_father(code: u8) -> u8 {
    code >> 4
}

pub fn decode_mother(code: u8) -> u8 {
    code & 0x0f
}

enum Parent {
    Absent,
    Called(Genotype),
}

/// Classify a child's call against its parents' calls at the same site
pub fn classify(child: &str, father: ParentCall<'_>, mother: ParentCall<'_>) -> MendelianClass {
    let Some(child) = Genotype::parse(child).ok().and_then(|g| g.called()) else {
        return MendelianClass::Indeterminate;
    };

    let resolve = |call: ParentCall<'_>| -> Option<Parent> {
        match call {
            ParentCall::Absent => Some(Parent::Absent),
            ParentCall::NoData => None,
            ParentCall::Called(gt) => match Genotype::parse(gt) {
                Ok(g) if !g.has_missing() => Some(Parent::Called(g)),
                _ => None,
            },
        }
    };
    let (Some(father), Some(mother)) = (resolve(father), resolve(mother)) else {
        return MendelianClass::Indeterminate;
    };

    match (&father, &mother) {
        (Parent::Called(f), Parent::Called(m)) => match child.as_slice() {
            [a] => consistent_if(f.contains_allele(*a) || m.contains_allele(*a)),
            [a, b] => consistent_if(
                (f.contains_allele(*a) && m.contains_allele(*b))
                    || (f.contains_allele(*b) && m.contains_allele(*a)),
            ),
            _ => MendelianClass::Indeterminate,
        },
        (Parent::Called(p), Parent::Absent) | (Parent::Absent, Parent::Called(p)) => {
            match child.as_slice() {
                [a, b] if !p.contains_allele(*a) && !p.contains_allele(*b) => MendelianClass::Error,
                _ => MendelianClass::Indeterminate,
            }
        }
        (Parent::Absent, Parent::Absent) => MendelianClass::Indeterminate,
    }
}

fn consistent_if(ok: bool) -> MendelianClass {
    if ok {
        MendelianClass::Consistent
    } else {
        MendelianClass::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::ParentCall::*;

    #[test]
    fn test_genotype_codes() {
        assert_eq!(GenotypeCode::of("0/0"), GenotypeCode::HOM_REF);
        assert_eq!(GenotypeCode::of("1|0"), GenotypeCode::HET_REF);
        assert_eq!(GenotypeCode::of("1/1"), GenotypeCode::HOM_ALT);
        assert_eq!(GenotypeCode::of("1/2"), GenotypeCode::HET_ALT);
        assert_eq!(GenotypeCode::of("2/2"), GenotypeCode::HOM_ALT_MULTI);
        assert_eq!(GenotypeCode::of("0"), GenotypeCode::HAPLOID_REF);
        assert_eq!(GenotypeCode::of("1"), GenotypeCode::HAPLOID_ALT);
        assert_eq!(GenotypeCode::of("./."), GenotypeCode::MISSING);
        assert_eq!(GenotypeCode::of("./1"), GenotypeCode::OTHER);
        assert_eq!(GenotypeCode::of("garbage"), GenotypeCode::OTHER);
    }

    #[test]
    fn test_trio_examples() {
        assert_eq!(classify("1/1", Called("0/0"), Called("0/0")), MendelianClass::Error);
        assert_eq!(classify("0/1", Called("0/1"), Called("0/0")), MendelianClass::Consistent);
        assert_eq!(classify("0/1", Absent, Called("0/0")), MendelianClass::Indeterminate);

        let code = parents_code(Absent, Called("0/0"));
        assert_eq!(decode_father(code), GenotypeCode::ABSENT);
        assert_ne!(decode_father(code), GenotypeCode::HOM_REF);
        assert_eq!(decode_mother(code), GenotypeCode::HOM_REF);
    }

    #[test]
    fn test_no_data_never_an_error() {
        assert_eq!(classify("1/1", NoData, Called("0/0")), MendelianClass::Indeterminate);
        assert_eq!(classify("1/1", Called("0/0"), Called("./.")), MendelianClass::Indeterminate);
        assert_eq!(classify("./.", Called("0/0"), Called("0/0")), MendelianClass::Indeterminate);

        let code = parents_code(NoData, Called("0/0"));
        assert_eq!(decode_father(code), GenotypeCode::NO_DATA);
    }

    #[test]
    fn test_both_parents() {
        assert_eq!(classify("1/1", Called("0/1"), Called("0/1")), MendelianClass::Consistent);
        assert_eq!(classify("0/1", Called("1/1"), Called("0/0")), MendelianClass::Consistent);
        assert_eq!(classify("0/0", Called("1/1"), Called("0/1")), MendelianClass::Error);
        assert_eq!(classify("1|2", Called("0/2"), Called("0/1")), MendelianClass::Consistent);
        assert_eq!(classify("1/1", Called("1/1"), Called("0/0")), MendelianClass::Error);
    }

    #[test]
    fn test_single_parent() {
        assert_eq!(classify("1/1", Absent, Called("0/0")), MendelianClass::Error);
        assert_eq!(classify("1/1", Called("0/1"), Absent), MendelianClass::Indeterminate);
        assert_eq!(classify("0/1", Absent, Absent), MendelianClass::Indeterminate);
    }

    #[test]
    fn test_parents_code_packing() {
        let code = parents_code(Called("1/1"), Called("0/1"));
        assert_eq!(decode_father(code), GenotypeCode::HOM_ALT);
        assert_eq!(decode_mother(code), GenotypeCode::HET_REF);
        assert_eq!(parents_code(Absent, Absent), 0xff);
    }
}
