//! Block-transfer chunk header and NACK grammar.
//!
//! The chunk header is little-endian, unlike every other multi-byte field
//! in this crate's wire codec (which is big-endian per §4.A) — this follows
//! the block-transfer framing as laid out alongside the MQTT-SN PUBLISH
//! payload it rides on.

use core::convert::TryFrom;
use core::ops::RangeInclusive;

pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub block_id: u16,
    pub part_num: u16,
    pub total_parts: u16,
    pub data_len: u16,
}

impl ChunkHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..2].copy_from_slice(&self.block_id.to_le_bytes());
        out[2..4].copy_from_slice(&self.part_num.to_le_bytes());
        out[4..6].copy_from_slice(&self.total_parts.to_le_bytes());
        out[6..8].copy_from_slice(&self.data_len.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<ChunkHeader> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let field = |r: RangeInclusive<usize>| -> u16 {
            let (lo, hi) = (*r.start(), *r.end());
            u16::from_le_bytes([bytes[lo], bytes[hi]])
        };
        Some(ChunkHeader {
            block_id: field(0..=1),
            part_num: field(2..=3),
            total_parts: field(4..=5),
            data_len: field(6..=7),
        })
    }
}

/// Collapse a sorted, deduplicated set of missing part numbers into the
/// comma-separated list of singles and inclusive ranges the NACK grammar uses.
pub fn encode_missing_ranges(missing: &[u16]) -> String {
    let mut spec = String::new();
    let mut i = 0;

    while i < missing.len() {
        let start = missing[i];
        let mut end = start;
        let mut j = i + 1;
        while j < missing.len() && missing[j] == end + 1 {
            end = missing[j];
            j += 1;
        }

        if !spec.is_empty() {
            spec.push(',');
        }
        if start == end {
            spec.push_str(&start.to_string());
        } else {
            spec.push_str(&format!("{}-{}", start, end));
        }

        i = j;
    }

    spec
}

pub fn encode_nack(block_id: u16, missing: &[u16]) -> String {
    format!("NACK:BLOCK={},CHUNKS={}", block_id, encode_missing_ranges(missing))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nack {
    pub block_id: u16,
    pub chunks: Vec<u16>,
}

/// Parse `NACK:BLOCK=<id>,CHUNKS=<spec>`, matching
/// `^NACK:BLOCK=\d{1,5},CHUNKS=(\d+(-\d+)?)(,\d+(-\d+)?)*$`.
/// Returns `None` on any grammar violation; duplicates across entries are
/// tolerated and deduplicated in the result.
pub fn parse_nack(s: &str) -> Option<Nack> {
    let rest = s.strip_prefix("NACK:BLOCK=")?;
    let (block_part, rest) = split_once(rest, ",CHUNKS=")?;

    if block_part.is_empty() || block_part.len() > 5 || !block_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let block_id: u32 = block_part.parse().ok()?;
    let block_id = u16::try_from(block_id).ok()?;

    let mut chunks = Vec::new();
    for entry in rest.split(',') {
        if entry.is_empty() {
            return None;
        }
        match split_once(entry, "-") {
            Some((a, b)) => {
                let a: u16 = parse_digits(a)?;
                let b: u16 = parse_digits(b)?;
                if a > b {
                    return None;
                }
                for n in a..=b {
                    if !chunks.contains(&n) {
                        chunks.push(n);
                    }
                }
            }
            None => {
                let n: u16 = parse_digits(entry)?;
                if !chunks.contains(&n) {
                    chunks.push(n);
                }
            }
        }
    }

    if chunks.is_empty() {
        return None;
    }

    chunks.sort_unstable();
    Some(Nack { block_id, chunks })
}

fn parse_digits(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn split_once<'a>(s: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    let idx = s.find(sep)?;
    Some((&s[..idx], &s[idx + sep.len()..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = ChunkHeader {
            block_id: 0xABCD,
            part_num: 2,
            total_parts: 5,
            data_len: 120,
        };
        let bytes = header.encode();
        assert_eq!(ChunkHeader::decode(&bytes), Some(header));
    }

    #[test]
    fn header_is_little_endian() {
        let header = ChunkHeader {
            block_id: 0x0102,
            part_num: 1,
            total_parts: 1,
            data_len: 1,
        };
        assert_eq!(&header.encode()[0..2], &[0x02, 0x01]);
    }

    #[test]
    fn single_missing_chunk_encodes_without_range() {
        assert_eq!(encode_nack(7, &[3]), "NACK:BLOCK=7,CHUNKS=3");
    }

    #[test]
    fn contiguous_missing_chunks_collapse_to_range() {
        assert_eq!(encode_nack(7, &[3, 4, 5]), "NACK:BLOCK=7,CHUNKS=3-5");
    }

    #[test]
    fn mixed_singles_and_ranges() {
        assert_eq!(encode_nack(12, &[1, 3, 4, 5, 9]), "NACK:BLOCK=12,CHUNKS=1,3-5,9");
    }

    #[test]
    fn parse_round_trips_with_encode() {
        let nack = parse_nack("NACK:BLOCK=12,CHUNKS=1,3-5,9").unwrap();
        assert_eq!(nack.block_id, 12);
        assert_eq!(nack.chunks, vec![1, 3, 4, 5, 9]);
    }

    #[test]
    fn parse_tolerates_duplicates() {
        let nack = parse_nack("NACK:BLOCK=1,CHUNKS=3,3,3-4").unwrap();
        assert_eq!(nack.chunks, vec![3, 4]);
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert!(parse_nack("NACK:BLOCK=1,CHUNKS=").is_none());
        assert!(parse_nack("NACK:BLOCK=,CHUNKS=1").is_none());
        assert!(parse_nack("NACK:BLOCK=1,CHUNKS=5-3").is_none());
        assert!(parse_nack("garbage").is_none());
        assert!(parse_nack("NACK:BLOCK=123456,CHUNKS=1").is_none());
    }
}
