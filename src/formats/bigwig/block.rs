//! Data block payloads.
//!
//! A full-resolution block holds wig sections, each a 24-byte header
//! followed by items in one of three layouts:
//!
//! | type | layout       | item                     |
//! |------|--------------|--------------------------|
//! | 1    | bedGraph     | `start u32, end u32, f32` |
//! | 2    | variableStep | `start u32, f32`          |
//! | 3    | fixedStep    | `f32`                     |
//!
//! Zoom blocks are a flat run of 32-byte summary records.

use super::endian::{Endian, FieldCursor};
use crate::{Error, Result};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use serde::Serialize;
use std::io::Read;

const SECTION_HEADER_SIZE: usize = 24;
const ZOOM_RECORD_SIZE: usize = 32;

const SECTION_BED_GRAPH: u8 = 1;
const SECTION_VARIABLE_STEP: u8 = 2;
const SECTION_FIXED_STEP: u8 = 3;

/// One native-resolution value over `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalInterval {
    pub ref_index: usize,
    pub start: u64,
    pub end: u64,
    pub value: f32,
}

/// A pre-aggregated summary over `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoomRecord {
    pub ref_index: usize,
    pub start: u64,
    pub end: u64,
    pub valid_count: u32,
    pub min_val: f32,
    pub max_val: f32,
    pub sum_data: f32,
    pub sum_squares: f32,
}

/// The decoded contents of one block.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedBlock {
    Intervals(Vec<SignalInterval>),
    Zoom(Vec<ZoomRecord>),
}

/// Inflate a block read from `offset` if the file compresses its data.
pub fn inflate(raw: &[u8], compressed: bool, offset: u64, size_hint: usize) -> Result<Bytes> {
    if !compressed {
        return Ok(Bytes::copy_from_slice(raw));
    }
    let mut out = Vec::with_capacity(size_hint);
    ZlibDecoder::new(raw)
        .read_to_end(&mut out)
        .map_err(|e| Error::format(offset, format!("cannot inflate data block: {}", e)))?;
    Ok(Bytes::from(out))
}

/// Decode a block; `is_zoom` selects the payload shape according to which
/// index produced the block.
pub fn decode(bytes: &[u8], is_zoom: bool, endian: Endian, offset: u64) -> Result<DecodedBlock> {
    if is_zoom {
        decode_zoom_records(bytes, endian, offset).map(DecodedBlock::Zoom)
    } else {
        decode_intervals(bytes, endian, offset).map(DecodedBlock::Intervals)
    }
}

/// Decode every wig section in a full-resolution block.
pub fn decode_intervals(bytes: &[u8], endian: Endian, offset: u64) -> Result<Vec<SignalInterval>> {
    let mut fields = FieldCursor::new(bytes, endian, offset);
    let mut intervals = Vec::new();

    while fields.remaining() > 0 {
        fields.require(SECTION_HEADER_SIZE)?;
        let section_offset = fields.position();
        let ref_index = fields.u32()? as usize;
        let section_start = fields.u32()?;
        let _section_end = fields.u32()?;
        let step = fields.u32()?;
        let span = fields.u32()?;
        let kind = fields.u8()?;
        fields.skip(1)?;
        let count = usize::from(fields.u16()?);

        let item_size = match kind {
            SECTION_BED_GRAPH => 12,
            SECTION_VARIABLE_STEP => 8,
            SECTION_FIXED_STEP => 4,
            other => {
                return Err(Error::format(
                    section_offset,
                    format!("unknown wig section type {}", other),
                ));
            }
        };
        fields.require(count * item_size)?;
        intervals.reserve(count);

        for i in 0..count {
            let (start, end, value) = match kind {
                SECTION_BED_GRAPH => {
                    let start = fields.u32()?;
                    let end = fields.u32()?;
                    (u64::from(start), u64::from(end), fields.f32()?)
                }
                SECTION_VARIABLE_STEP => {
                    let start = u64::from(fields.u32()?);
                    (start, start + u64::from(span), fields.f32()?)
                }
                _ => {
                    let start = u64::from(section_start) + i as u64 * u64::from(step);
                    (start, start + u64::from(span), fields.f32()?)
                }
            };
            intervals.push(SignalInterval {
                ref_index,
                start,
                end,
                value,
            });
        }
    }

    Ok(intervals)
}

/// Decode a zoom block into summary records.
pub fn decode_zoom_records(bytes: &[u8], endian: Endian, offset: u64) -> Result<Vec<ZoomRecord>> {
    let mut fields = FieldCursor::new(bytes, endian, offset);
    let mut records = Vec::with_capacity(bytes.len() / ZOOM_RECORD_SIZE);

    while fields.remaining() > 0 {
        fields.require(ZOOM_RECORD_SIZE)?;
        records.push(ZoomRecord {
            ref_index: fields.u32()? as usize,
            start: u64::from(fields.u32()?),
            end: u64::from(fields.u32()?),
            valid_count: fields.u32()?,
            min_val: fields.f32()?,
            max_val: fields.f32()?,
            sum_data: fields.f32()?,
            sum_squares: fields.f32()?,
        });
    }

    Ok(records)
}
