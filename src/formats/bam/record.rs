//! BAM alignment records.
//!
//! ```text
//! block_size  i32   bytes that follow this field
//! refID       i32   -1 when unplaced
//! pos         i32   0-based leftmost position, -1 when unplaced
//! l_read_name u8    includes the NUL terminator
//! mapq        u8    255 = unavailable
//! bin         u16
//! n_cigar_op  u16
//! flag        u16
//! l_seq       i32
//! next_refID  i32
//! next_pos    i32
//! tlen        i32
//! read_name   char[l_read_name]
//! cigar       u32[n_cigar_op]
//! seq         u8[(l_seq+1)/2]   4-bit packed
//! qual        u8[l_seq]
//! tags        until block_size is exhausted
//! ```
//!
//! No field is sentinel-terminated at the record level, so a record cut short
//! by the end of a buffer is detected from the declared lengths alone.

use super::cigar::{Cigar, CigarKind, CigarOp};
use super::tags::{TagArray, TagValue, Tags, parse_tags};
use crate::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

/// Size of the fixed-width portion following `block_size`
const FIXED_FIELDS_SIZE: usize = 32;

const SEQ_ALPHABET: &[u8; 16] = b"=ACMGRSVTWYHKDBN";

/// Bounds-checked little-endian field access over one record.
pub(super) struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
    origin: usize,
}

impl<'a> FieldReader<'a> {
    pub(super) fn new(buf: &'a [u8], origin: usize) -> Self {
        Self { buf, pos: 0, origin }
    }

    /// Offset of the next unread byte, relative to the start of the stream
    pub(super) fn position(&self) -> usize {
        self.origin + self.pos
    }

    pub(super) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(super) fn require(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(Error::TruncatedRecord {
                offset: self.position() as u64,
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    pub(super) fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.require(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(super) fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(super) fn u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub(super) fn i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.bytes(4)?))
    }

    pub(super) fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub(super) fn f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.bytes(4)?))
    }

    pub(super) fn c_string(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            return Err(Error::TruncatedRecord {
                offset: self.position() as u64,
                needed: rest.len() + 1,
                available: rest.len(),
            });
        };
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }
}

/// SAM flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Flags(u16);

impl Flags {
    pub const PAIRED: u16 = 0x1;
    pub const PROPER_PAIR: u16 = 0x2;
    pub const UNMAPPED: u16 = 0x4;
    pub const MATE_UNMAPPED: u16 = 0x8;
    pub const REVERSE: u16 = 0x10;
    pub const MATE_REVERSE: u16 = 0x20;
    pub const FIRST_SEGMENT: u16 = 0x40;
    pub const LAST_SEGMENT: u16 = 0x80;
    pub const SECONDARY: u16 = 0x100;
    pub const QC_FAIL: u16 = 0x200;
    pub const DUPLICATE: u16 = 0x400;
    pub const SUPPLEMENTARY: u16 = 0x800;

    pub fn new(bits: u16) -> Self {
        Flags(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// True when any bit of `mask` is set
    pub fn intersects(self, mask: u16) -> bool {
        self.0 & mask != 0
    }

    pub fn is_paired(self) -> bool {
        self.intersects(Self::PAIRED)
    }

    pub fn is_unmapped(self) -> bool {
        self.intersects(Self::UNMAPPED)
    }

    pub fn is_reverse(self) -> bool {
        self.intersects(Self::REVERSE)
    }

    pub fn is_secondary(self) -> bool {
        self.intersects(Self::SECONDARY)
    }

    pub fn is_duplicate(self) -> bool {
        self.intersects(Self::DUPLICATE)
    }

    pub fn is_supplementary(self) -> bool {
        self.intersects(Self::SUPPLEMENTARY)
    }
}

/// A decoded alignment.
///
/// The end coordinate is not stored in the file; it is derived from the
/// reference-consuming CIGAR operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignmentRecord {
    pub name: String,
    pub ref_index: Option<usize>,
    pub pos: Option<u64>,
    pub flags: Flags,
    pub mapping_quality: Option<u8>,
    pub cigar: Cigar,
    pub mate_ref_index: Option<usize>,
    pub mate_pos: Option<u64>,
    pub template_length: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<Vec<u8>>,
    pub tags: Tags,
}

impl AlignmentRecord {
    pub fn reference_span(&self) -> u64 {
        self.cigar.reference_span()
    }

    /// Exclusive end on the reference. A record without reference-consuming
    /// operations still occupies its start base.
    pub fn end(&self) -> Option<u64> {
        self.pos.map(|pos| pos + self.reference_span().max(1))
    }

    /// Whether the record is placed and overlaps `[start, end)`
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        if self.flags.is_unmapped() {
            return false;
        }
        match (self.pos, self.end()) {
            (Some(pos), Some(record_end)) => pos < end && record_end > start,
            _ => false,
        }
    }
}

/// Length of the record at the front of `buf`, or `None` if not even the
/// size prefix is available yet.
pub fn record_len(buf: &[u8], origin: usize) -> Result<Option<usize>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let block_size = LittleEndian::read_i32(&buf[..4]);
    if block_size < FIXED_FIELDS_SIZE as i32 {
        return Err(Error::format(
            origin as u64,
            format!("record block_size {} below minimum {}", block_size, FIXED_FIELDS_SIZE),
        ));
    }
    Ok(Some(4 + block_size as usize))
}

/// Decode the record starting at `buf[cursor]`.
///
/// Returns the record and the number of bytes it occupied. A buffer that ends
/// before the declared record length yields [`Error::TruncatedRecord`].
pub fn parse_next(
    buf: &[u8],
    cursor: usize,
    include_sequence: bool,
) -> Result<(AlignmentRecord, usize)> {
    let rest = buf.get(cursor..).unwrap_or_default();
    let head = FieldReader::new(rest, cursor);
    let Some(total) = record_len(rest, cursor)? else {
        return Err(Error::TruncatedRecord {
            offset: cursor as u64,
            needed: 4,
            available: rest.len(),
        });
    };
    head.require(total)?;

    let mut fields = FieldReader::new(&rest[4..total], cursor + 4);

    let ref_id = fields.i32()?;
    let pos = fields.i32()?;
    let l_read_name = fields.u8()?;
    let mapq = fields.u8()?;
    let _bin = fields.u16()?;
    let n_cigar_op = fields.u16()?;
    let flag = fields.u16()?;
    let l_seq = fields.i32()?;
    let next_ref_id = fields.i32()?;
    let next_pos = fields.i32()?;
    let tlen = fields.i32()?;

    let name = fields.bytes(usize::from(l_read_name))?;
    let name = String::from_utf8_lossy(name.strip_suffix(&[0]).unwrap_or(name)).into_owned();

    let mut ops = Vec::with_capacity(usize::from(n_cigar_op));
    for _ in 0..n_cigar_op {
        let raw = fields.u32()?;
        let op = CigarOp::from_raw(raw).ok_or_else(|| {
            Error::format(fields.position() as u64, format!("invalid CIGAR op code {}", raw & 0xF))
        })?;
        ops.push(op);
    }

    if l_seq < 0 {
        return Err(Error::format(cursor as u64, format!("negative sequence length {}", l_seq)));
    }
    let l_seq = l_seq as usize;
    let packed = fields.bytes(l_seq.div_ceil(2))?;
    let qual = fields.bytes(l_seq)?;

    let (sequence, quality) = if include_sequence && l_seq > 0 {
        let quality = if qual.iter().all(|&q| q == 0xFF) {
            None
        } else {
            Some(qual.to_vec())
        };
        (Some(decode_sequence(packed, l_seq)), quality)
    } else {
        (None, None)
    };

    let mut tags = parse_tags(&mut fields)?;
    let cigar = restore_long_cigar(Cigar::new(ops), l_seq, &mut tags);

    let record = AlignmentRecord {
        name,
        ref_index: reference_id(ref_id, cursor)?,
        pos: position(pos, cursor)?,
        flags: Flags::new(flag),
        mapping_quality: (mapq != 0xFF).then_some(mapq),
        cigar,
        mate_ref_index: reference_id(next_ref_id, cursor)?,
        mate_pos: position(next_pos, cursor)?,
        template_length: tlen,
        sequence,
        quality,
        tags,
    };

    Ok((record, total))
}

fn reference_id(value: i32, origin: usize) -> Result<Option<usize>> {
    match value {
        -1 => Ok(None),
        n if n >= 0 => Ok(Some(n as usize)),
        n => Err(Error::format(origin as u64, format!("invalid reference id {}", n))),
    }
}

fn position(value: i32, origin: usize) -> Result<Option<u64>> {
    match value {
        -1 => Ok(None),
        n if n >= 0 => Ok(Some(n as u64)),
        n => Err(Error::format(origin as u64, format!("invalid position {}", n))),
    }
}

fn decode_sequence(packed: &[u8], len: usize) -> String {
    let mut seq = String::with_capacity(len);
    for i in 0..len {
        let byte = packed[i / 2];
        let code = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
        seq.push(SEQ_ALPHABET[usize::from(code)] as char);
    }
    seq
}

/// Alignments with more than 65535 operations store `<l_seq>S<ref_len>N` as a
/// placeholder and the real CIGAR in a `CG:B,I` tag.
fn restore_long_cigar(cigar: Cigar, l_seq: usize, tags: &mut Tags) -> Cigar {
    let placeholder = matches!(
        cigar.ops(),
        [first, second]
            if first.kind == CigarKind::SoftClip
                && first.len as usize == l_seq
                && second.kind == CigarKind::Skip
    );
    if !placeholder {
        return cigar;
    }
    match tags.remove("CG") {
        Some(TagValue::Array(TagArray::UInt32(raw))) => {
            let ops: Option<Vec<CigarOp>> = raw.into_iter().map(CigarOp::from_raw).collect();
            ops.map(Cigar::new).unwrap_or(cigar)
        }
        Some(other) => {
            tags.insert("CG".to_string(), other);
            cigar
        }
        None => cigar,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal record encoder for tests.
    pub(crate) fn encode_record(
        name: &str,
        ref_id: i32,
        pos: i32,
        flag: u16,
        cigar: &str,
        seq: &str,
        tags: &[u8],
    ) -> Vec<u8> {
        let cigar: Cigar = cigar.parse().unwrap();
        let mut body = Vec::new();
        body.extend_from_slice(&ref_id.to_le_bytes());
        body.extend_from_slice(&pos.to_le_bytes());
        body.push((name.len() + 1) as u8);
        body.push(60);
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&(cigar.len() as u16).to_le_bytes());
        body.extend_from_slice(&flag.to_le_bytes());
        body.extend_from_slice(&(seq.len() as i32).to_le_bytes());
        body.extend_from_slice(&(-1i32).to_le_bytes());
        body.extend_from_slice(&(-1i32).to_le_bytes());
        body.extend_from_slice(&0i32.to_le_bytes());
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        for op in cigar.ops() {
            body.extend_from_slice(&op.to_raw().to_le_bytes());
        }
        let codes: Vec<u8> = seq
            .bytes()
            .map(|b| SEQ_ALPHABET.iter().position(|&c| c == b).unwrap() as u8)
            .collect();
        for pair in codes.chunks(2) {
            body.push(pair[0] << 4 | pair.get(1).copied().unwrap_or(0));
        }
        body.extend(std::iter::repeat_n(30u8, seq.len()));
        body.extend_from_slice(tags);

        let mut record = (body.len() as i32).to_le_bytes().to_vec();
        record.extend_from_slice(&body);
        record
    }

    #[test]
    fn test_parse_simple_record() {
        let bytes = encode_record("read1", 0, 500, 0, "100M", "ACGTN", b"NMC\x02");
        let (record, used) = parse_next(&bytes, 0, true).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(record.name, "read1");
        assert_eq!(record.ref_index, Some(0));
        assert_eq!(record.pos, Some(500));
        assert_eq!(record.mapping_quality, Some(60));
        assert_eq!(record.cigar.to_string(), "100M");
        assert_eq!(record.end(), Some(600));
        assert_eq!(record.sequence.as_deref(), Some("ACGTN"));
        assert_eq!(record.quality, Some(vec![30; 5]));
        assert_eq!(record.tags["NM"], TagValue::Int(2));
    }

    #[test]
    fn test_sequence_skipped_unless_requested() {
        let bytes = encode_record("r", 0, 0, 0, "4M", "ACGT", b"");
        let (record, _) = parse_next(&bytes, 0, false).unwrap();
        assert!(record.sequence.is_none());
        assert!(record.quality.is_none());
    }

    #[test]
    fn test_parse_consecutive_records() {
        let mut buf = encode_record("a", 0, 10, 0, "10M", "", b"");
        buf.extend(encode_record("b", 0, 20, Flags::REVERSE, "5M2D5M", "", b""));
        let (first, used) = parse_next(&buf, 0, false).unwrap();
        let (second, _) = parse_next(&buf, used, false).unwrap();
        assert_eq!(first.name, "a");
        assert_eq!(second.name, "b");
        assert!(second.flags.is_reverse());
        assert_eq!(second.end(), Some(32));
    }

    #[test]
    fn test_truncated_record() {
        let bytes = encode_record("read1", 0, 500, 0, "100M", "ACGT", b"");
        let err = parse_next(&bytes[..bytes.len() - 3], 0, false).unwrap_err();
        assert_eq!(err.kind(), "TruncatedRecordError");

        let err = parse_next(&bytes[..2], 0, false).unwrap_err();
        assert_eq!(err.kind(), "TruncatedRecordError");
    }

    #[test]
    fn test_record_len() {
        let bytes = encode_record("r", 0, 0, 0, "1M", "A", b"");
        assert_eq!(record_len(&bytes[..3], 0).unwrap(), None);
        assert_eq!(record_len(&bytes, 0).unwrap(), Some(bytes.len()));
        assert_eq!(record_len(&[1, 0, 0, 0], 0).unwrap_err().kind(), "FormatError");
    }

    #[test]
    fn test_unmapped_never_overlaps() {
        let bytes = encode_record("u", 0, 100, Flags::UNMAPPED, "10M", "", b"");
        let (record, _) = parse_next(&bytes, 0, false).unwrap();
        assert!(!record.overlaps(0, 1000));

        let bytes = encode_record("m", 0, 100, 0, "10M", "", b"");
        let (record, _) = parse_next(&bytes, 0, false).unwrap();
        assert!(record.overlaps(105, 200));
        assert!(!record.overlaps(110, 200));
        assert!(!record.overlaps(0, 100));
    }

    #[test]
    fn test_long_cigar_restored_from_cg_tag() {
        let mut tags = b"CGBI".to_vec();
        tags.extend_from_slice(&2u32.to_le_bytes());
        tags.extend_from_slice(&CigarOp::new(3, CigarKind::Match).to_raw().to_le_bytes());
        tags.extend_from_slice(&CigarOp::new(1, CigarKind::Deletion).to_raw().to_le_bytes());

        let bytes = encode_record("long", 0, 0, 0, "3S4N", "ACG", &tags);
        let (record, _) = parse_next(&bytes, 0, false).unwrap();
        assert_eq!(record.cigar.to_string(), "3M1D");
        assert!(!record.tags.contains_key("CG"));
    }
}
