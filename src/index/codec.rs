// ==============================================================================
// index/codec.rs - Position Key and Entry Binary Codec
// ==============================================================================
// Description: Lossless variant position keys and the versioned binary entry layout
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Position key (big-endian u32 header):
//   bit  31     SNV flag
//   bits 24-27  SNV allele code (only when flagged)
//   bits 0-23   start relative to the chunk start
// Non-SNV keys append: reference bytes, 0x00, alternate bytes, 0x00
//
// Entry layout:
//   magic "SIX1" | schema version u32 | annotation width u8 | sample u32
//   chromosome (u16 len + bytes) | chunk start u64 | discrepancies u32
//   gt count u32, then per genotype:
//     gt (u16 len + bytes) | variant count u32 | keys (u16 len + bytes each)
//     annotation bits (u32 len + packed bytes) | summary u64
//     counts (u8 n + u32 each) | parents codes (u32 n + bytes)
//     mendelian flags (u32 n + u32 each)
// ==============================================================================

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use super::entry::{SampleIndexEntry, SampleIndexGtEntry, SampleIndexVariant};
use crate::error::{IndexError, Result};
use crate::models::Variant;
use crate::schema::bits::{BitReader, BitWriter};
use crate::schema::configuration::MAX_CHUNK_SIZE;

const SNV_FLAG: u32 = 1 << 31;
const SNV_CODE_SHIFT: u32 = 24;
const RELATIVE_MASK: u32 = (1 << 24) - 1;
const HEADER_LEN: usize = 4;

const ENTRY_MAGIC: &[u8; 4] = b"SIX1";

/// The twelve possible single-nucleotide substitutions
const SNV_CODES: [(u8, u8); 12] = [
    (b'A', b'C'),
    (b'A', b'G'),
    (b'A', b'T'),
    (b'C', b'A'),
    (b'C', b'G'),
    (b'C', b'T'),
    (b'G', b'A'),
    (b'G', b'C'),
    (b'G', b'T'),
    (b'T', b'A'),
    (b'T', b'C'),
    (b'T', b'G'),
];

fn snv_code(reference: &str, alternate: &str) -> Option<u32> {
    match (reference.as_bytes(), alternate.as_bytes()) {
        ([r], [a]) => SNV_CODES
            .iter()
            .position(|(cr, ca)| cr == r && ca == a)
            .map(|i| i as u32),
        _ => None,
    }
}

/// Encode a variant's position and alleles relative to its chunk
///
/// # Arguments
/// * `variant` - Variant to encode (chromosome is implied by the entry)
/// * `chunk_start` - Start of the chunk the variant belongs to
///
/// # Returns
/// * `Ok(Vec<u8>)` - Key bytes, 4 for SNVs, longer for other variants
/// * `Err(IndexError::Codec)` - Variant outside the addressable chunk range
pub fn encode_position_key(variant: &Variant, chunk_start: u64) -> Result<Vec<u8>> {
    if variant.start < chunk_start || variant.start - chunk_start >= MAX_CHUNK_SIZE {
        return Err(IndexError::Codec(format!(
            "Variant {} outside chunk starting at {}",
            variant, chunk_start
        )));
    }
    let relative = (variant.start - chunk_start) as u32;

    if let Some(code) = snv_code(&variant.reference, &variant.alternate) {
        let header = SNV_FLAG | (code << SNV_CODE_SHIFT) | relative;
        return Ok(header.to_be_bytes().to_vec());
    }

    if variant.reference.as_bytes().contains(&0) || variant.alternate.as_bytes().contains(&0) {
        return Err(IndexError::Codec(format!("Allele of {} contains NUL", variant)));
    }

    let mut key = Vec::with_capacity(HEADER_LEN + variant.reference.len() + variant.alternate.len() + 2);
    key.extend_from_slice(&relative.to_be_bytes());
    key.extend_from_slice(variant.reference.as_bytes());
    key.push(0);
    key.extend_from_slice(variant.alternate.as_bytes());
    key.push(0);
    Ok(key)
}

/// Start offset within the chunk, read from the key header only
pub fn relative_start(key: &[u8]) -> Result<u32> {
    let header: [u8; HEADER_LEN] = key
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| IndexError::Codec("Position key shorter than header".into()))?;
    Ok(u32::from_be_bytes(header) & RELATIVE_MASK)
}

/// Rebuild the variant a key was encoded from
pub fn decode_position_key(chromosome: &str, chunk_start: u64, key: &[u8]) -> Result<Variant> {
    let relative = relative_start(key)?;
    let header = u32::from_be_bytes([key[0], key[1], key[2], key[3]]);
    let start = chunk_start + relative as u64;

    if header & SNV_FLAG != 0 {
        if key.len() != HEADER_LEN {
            return Err(IndexError::Codec("SNV key with trailing bytes".into()));
        }
        let code = ((header >> SNV_CODE_SHIFT) & 0x0F) as usize;
        let (r, a) = SNV_CODES
            .get(code)
            .ok_or_else(|| IndexError::Codec(format!("Unknown SNV code {}", code)))?;
        return Ok(Variant::new(
            chromosome,
            start,
            (*r as char).to_string(),
            (*a as char).to_string(),
        ));
    }

    let body = &key[HEADER_LEN..];
    let mut parts = body.split(|b| *b == 0);
    let reference = parts.next();
    let alternate = parts.next();
    let terminator = parts.next();
    match (reference, alternate, terminator, parts.next()) {
        (Some(r), Some(a), Some([]), None) => {
            let reference = String::from_utf8(r.to_vec())
                .map_err(|_| IndexError::Codec("Reference allele is not UTF-8".into()))?;
            let alternate = String::from_utf8(a.to_vec())
                .map_err(|_| IndexError::Codec("Alternate allele is not UTF-8".into()))?;
            Ok(Variant::new(chromosome, start, reference, alternate))
        }
        _ => Err(IndexError::Codec("Malformed allele section in position key".into())),
    }
}

fn write_bytes_u16(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len = u16::try_from(bytes.len())
        .map_err(|_| IndexError::Codec(format!("Field of {} bytes too long", bytes.len())))?;
    out.write_u16::<BigEndian>(len)?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn read_bytes_u16(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let len = cursor.read_u16::<BigEndian>()? as usize;
    read_exact_vec(cursor, len)
}

fn read_exact_vec(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>> {
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(IndexError::Codec("Entry truncated".into()));
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_string_u16(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    String::from_utf8(read_bytes_u16(cursor)?)
        .map_err(|_| IndexError::Codec("Invalid UTF-8 string in entry".into()))
}

/// Serialize an entry with annotation bits packed at `annotation_width`
pub fn encode_entry(entry: &SampleIndexEntry, annotation_width: u32) -> Result<Vec<u8>> {
    if annotation_width > 64 {
        return Err(IndexError::Codec(format!(
            "Annotation width {} exceeds 64",
            annotation_width
        )));
    }
    let mut out = Vec::new();
    out.extend_from_slice(ENTRY_MAGIC);
    out.write_u32::<BigEndian>(entry.schema_version)?;
    out.write_u8(annotation_width as u8)?;
    out.write_u32::<BigEndian>(entry.sample_id)?;
    write_bytes_u16(&mut out, entry.chromosome.as_bytes())?;
    out.write_u64::<BigEndian>(entry.chunk_start)?;
    out.write_u32::<BigEndian>(entry.discrepancies)?;
    out.write_u32::<BigEndian>(entry.gts.len() as u32)?;

    for (gt, gt_entry) in &entry.gts {
        write_bytes_u16(&mut out, gt.as_bytes())?;
        out.write_u32::<BigEndian>(gt_entry.variants.len() as u32)?;
        for variant in &gt_entry.variants {
            write_bytes_u16(&mut out, &variant.position_key)?;
        }

        let mut bits = BitWriter::new();
        for variant in &gt_entry.variants {
            bits.write(variant.annotation_bits, annotation_width)?;
        }
        let packed = bits.finish();
        out.write_u32::<BigEndian>(packed.len() as u32)?;
        out.extend_from_slice(&packed);

        out.write_u64::<BigEndian>(gt_entry.annotation_summary)?;
        out.write_u8(gt_entry.annotation_counts.len() as u8)?;
        for count in &gt_entry.annotation_counts {
            out.write_u32::<BigEndian>(*count)?;
        }
        out.write_u32::<BigEndian>(gt_entry.parents_codes.len() as u32)?;
        out.extend_from_slice(&gt_entry.parents_codes);
        out.write_u32::<BigEndian>(gt_entry.mendelian_flags.len() as u32)?;
        for flag in &gt_entry.mendelian_flags {
            out.write_u32::<BigEndian>(*flag)?;
        }
    }
    Ok(out)
}

/// Deserialize an entry, checking it was written with `expected_version`
pub fn decode_entry(bytes: &[u8], expected_version: u32) -> Result<SampleIndexEntry> {
    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    cursor
        .read_exact(&mut magic)
        .map_err(|_| IndexError::Codec("Entry truncated".into()))?;
    if &magic != ENTRY_MAGIC {
        return Err(IndexError::Codec("Not a sample index entry".into()));
    }

    let schema_version = cursor.read_u32::<BigEndian>()?;
    if schema_version != expected_version {
        return Err(IndexError::Codec(format!(
            "Entry written with schema version {}, expected {}",
            schema_version, expected_version
        )));
    }
    let width = cursor.read_u8()? as u32;
    let sample_id = cursor.read_u32::<BigEndian>()?;
    let chromosome = read_string_u16(&mut cursor)?;
    let chunk_start = cursor.read_u64::<BigEndian>()?;
    let discrepancies = cursor.read_u32::<BigEndian>()?;
    let gt_count = cursor.read_u32::<BigEndian>()?;

    let mut gts = BTreeMap::new();
    for _ in 0..gt_count {
        let gt = read_string_u16(&mut cursor)?;
        let variant_count = cursor.read_u32::<BigEndian>()? as usize;
        let mut keys = Vec::with_capacity(variant_count.min(1 << 16));
        for _ in 0..variant_count {
            keys.push(read_bytes_u16(&mut cursor)?);
        }

        let packed_len = cursor.read_u32::<BigEndian>()? as usize;
        let packed = read_exact_vec(&mut cursor, packed_len)?;
        let mut bits = BitReader::new(&packed);
        let mut variants = Vec::with_capacity(keys.len());
        for position_key in keys {
            variants.push(SampleIndexVariant {
                position_key,
                annotation_bits: bits.read(width)?,
            });
        }

        let annotation_summary = cursor.read_u64::<BigEndian>()?;
        let count_len = cursor.read_u8()? as usize;
        let mut annotation_counts = Vec::with_capacity(count_len);
        for _ in 0..count_len {
            annotation_counts.push(cursor.read_u32::<BigEndian>()?);
        }
        let codes_len = cursor.read_u32::<BigEndian>()? as usize;
        let parents_codes = read_exact_vec(&mut cursor, codes_len)?;
        let flags_len = cursor.read_u32::<BigEndian>()? as usize;
        let mut mendelian_flags = Vec::with_capacity(flags_len.min(1 << 16));
        for _ in 0..flags_len {
            mendelian_flags.push(cursor.read_u32::<BigEndian>()?);
        }

        gts.insert(
            gt,
            SampleIndexGtEntry {
                variants,
                annotation_summary,
                annotation_counts,
                parents_codes,
                mendelian_flags,
            },
        );
    }

    if (cursor.position() as usize) != bytes.len() {
        return Err(IndexError::Codec("Trailing bytes after entry".into()));
    }

    Ok(SampleIndexEntry {
        sample_id,
        chromosome,
        chunk_start,
        schema_version,
        discrepancies,
        gts,
    })
}
