//! CIGAR operations.
//!
//! Each BAM CIGAR operation is a u32: `length << 4 | op`, with op codes
//! `MIDNSHP=X` mapped to 0-8.

use crate::{Error, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarKind {
    Match,
    Insertion,
    Deletion,
    Skip,
    SoftClip,
    HardClip,
    Padding,
    SequenceMatch,
    SequenceMismatch,
}

impl CigarKind {
    const CODES: &'static [u8; 9] = b"MIDNSHP=X";

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => CigarKind::Match,
            1 => CigarKind::Insertion,
            2 => CigarKind::Deletion,
            3 => CigarKind::Skip,
            4 => CigarKind::SoftClip,
            5 => CigarKind::HardClip,
            6 => CigarKind::Padding,
            7 => CigarKind::SequenceMatch,
            8 => CigarKind::SequenceMismatch,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn symbol(self) -> char {
        Self::CODES[self as usize] as char
    }

    fn from_symbol(symbol: char) -> Option<Self> {
        Self::CODES
            .iter()
            .position(|&c| c as char == symbol)
            .and_then(|i| Self::from_code(i as u32))
    }

    /// Whether the operation advances along the reference
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarKind::Match
                | CigarKind::Deletion
                | CigarKind::Skip
                | CigarKind::SequenceMatch
                | CigarKind::SequenceMismatch
        )
    }

    /// Whether the operation advances along the read
    pub fn consumes_query(self) -> bool {
        matches!(
            self,
            CigarKind::Match
                | CigarKind::Insertion
                | CigarKind::SoftClip
                | CigarKind::SequenceMatch
                | CigarKind::SequenceMismatch
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CigarOp {
    pub len: u32,
    pub kind: CigarKind,
}

impl CigarOp {
    pub fn new(len: u32, kind: CigarKind) -> Self {
        Self { len, kind }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        CigarKind::from_code(raw & 0xF).map(|kind| CigarOp { len: raw >> 4, kind })
    }

    pub fn to_raw(self) -> u32 {
        (self.len << 4) | self.kind.code()
    }
}

/// An ordered list of CIGAR operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cigar(Vec<CigarOp>);

impl Cigar {
    pub fn new(ops: Vec<CigarOp>) -> Self {
        Cigar(ops)
    }

    pub fn ops(&self) -> &[CigarOp] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Number of reference bases covered by the alignment
    pub fn reference_span(&self) -> u64 {
        self.0
            .iter()
            .filter(|op| op.kind.consumes_reference())
            .map(|op| u64::from(op.len))
            .sum()
    }

    /// Number of read bases implied by the alignment
    pub fn query_len(&self) -> u64 {
        self.0
            .iter()
            .filter(|op| op.kind.consumes_query())
            .map(|op| u64::from(op.len))
            .sum()
    }
}

impl fmt::Display for Cigar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("*");
        }
        for op in &self.0 {
            write!(f, "{}{}", op.len, op.kind.symbol())?;
        }
        Ok(())
    }
}

impl FromStr for Cigar {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "*" {
            return Ok(Cigar::default());
        }
        let mut ops = Vec::new();
        let mut len: u32 = 0;
        let mut has_digits = false;
        for c in s.chars() {
            if let Some(d) = c.to_digit(10) {
                len = len
                    .checked_mul(10)
                    .and_then(|l| l.checked_add(d))
                    .ok_or_else(|| Error::InvalidInput(format!("CIGAR length overflow in {:?}", s)))?;
                has_digits = true;
            } else {
                let kind = CigarKind::from_symbol(c)
                    .ok_or_else(|| Error::InvalidInput(format!("unknown CIGAR operation {:?}", c)))?;
                if !has_digits {
                    return Err(Error::InvalidInput(format!("CIGAR operation without length in {:?}", s)));
                }
                ops.push(CigarOp::new(len, kind));
                len = 0;
                has_digits = false;
            }
        }
        if has_digits {
            return Err(Error::InvalidInput(format!("trailing length in CIGAR {:?}", s)));
        }
        Ok(Cigar(ops))
    }
}

impl Serialize for Cigar {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
