//! BGZF block framing.
//!
//! ```text
//! ID1 ID2 CM FLG MTIME(4) XFL OS XLEN(2)   gzip member header, FLG.FEXTRA set
//! SI1='B' SI2='C' SLEN=2 BSIZE(2)          BSIZE = total block size - 1
//! CDATA                                    raw deflate payload
//! CRC32(4) ISIZE(4)                        ISIZE <= 65536
//! ```

use crate::{Error, Result};
use bytes::Bytes;
use flate2::read::DeflateDecoder;
use std::io::Read;

/// Fixed prefix of every gzip member up to and including XLEN
const GZIP_PREFIX_SIZE: usize = 12;
const FOOTER_SIZE: usize = 8;

/// Upper bound on both the compressed and decompressed size of a block
pub const MAX_BLOCK_SIZE: usize = 65536;

/// The empty block terminating a well-formed BGZF file
pub const EOF_MARKER: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02, 0x00,
    0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// A decompressed block and where it lives in the file.
#[derive(Debug, Clone)]
pub struct Block {
    pub offset: u64,
    pub compressed_len: u64,
    pub data: Bytes,
}

impl Block {
    /// File offset of the block that follows this one
    pub fn next_offset(&self) -> u64 {
        self.offset + self.compressed_len
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Total size of the block starting at `raw[0]`, read from its BSIZE field.
pub fn block_size(raw: &[u8], offset: u64) -> Result<usize> {
    if raw.len() < GZIP_PREFIX_SIZE {
        return Err(truncated(offset, GZIP_PREFIX_SIZE, raw.len()));
    }
    if raw[0] != 0x1f || raw[1] != 0x8b {
        return Err(Error::format(
            offset,
            format!("invalid gzip magic [{:#04x}, {:#04x}]", raw[0], raw[1]),
        ));
    }
    if raw[2] != 8 {
        return Err(Error::format(offset, format!("unsupported compression method {}", raw[2])));
    }
    if raw[3] & 0x04 == 0 {
        return Err(Error::format(offset, "gzip member has no extra field, not a BGZF block"));
    }

    let xlen = usize::from(u16::from_le_bytes([raw[10], raw[11]]));
    let extra_end = GZIP_PREFIX_SIZE + xlen;
    if raw.len() < extra_end {
        return Err(truncated(offset, extra_end, raw.len()));
    }

    let mut pos = GZIP_PREFIX_SIZE;
    while pos + 4 <= extra_end {
        let slen = usize::from(u16::from_le_bytes([raw[pos + 2], raw[pos + 3]]));
        if raw[pos] == b'B' && raw[pos + 1] == b'C' && slen == 2 && pos + 6 <= extra_end {
            let bsize = u16::from_le_bytes([raw[pos + 4], raw[pos + 5]]);
            let size = usize::from(bsize) + 1;
            if size < extra_end + FOOTER_SIZE {
                return Err(Error::format(offset, format!("BSIZE {} smaller than block framing", size)));
            }
            return Ok(size);
        }
        pos += 4 + slen;
    }

    Err(Error::format(offset, "missing BC subfield"))
}

/// Inflate one complete block (`raw` holds exactly the block's bytes).
pub fn decode_block(raw: &[u8], offset: u64) -> Result<Bytes> {
    let size = block_size(raw, offset)?;
    if raw.len() < size {
        return Err(truncated(offset, size, raw.len()));
    }

    let xlen = usize::from(u16::from_le_bytes([raw[10], raw[11]]));
    let cdata = &raw[GZIP_PREFIX_SIZE + xlen..size - FOOTER_SIZE];
    let footer = &raw[size - FOOTER_SIZE..size];
    let expected_crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    let isize = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]) as usize;

    if isize > MAX_BLOCK_SIZE {
        return Err(Error::format(offset, format!("ISIZE {} exceeds block limit", isize)));
    }

    let mut data = Vec::with_capacity(isize);
    DeflateDecoder::new(cdata)
        .read_to_end(&mut data)
        .map_err(|e| Error::format(offset, format!("inflate failed: {}", e)))?;

    if data.len() != isize {
        return Err(Error::format(
            offset,
            format!("ISIZE mismatch: header says {}, inflated {}", isize, data.len()),
        ));
    }

    let mut crc = flate2::Crc::new();
    crc.update(&data);
    if crc.sum() != expected_crc {
        return Err(Error::format(offset, "CRC32 mismatch"));
    }

    Ok(Bytes::from(data))
}

fn truncated(offset: u64, wanted: usize, got: usize) -> Error {
    std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!(
            "BGZF block at offset {} truncated: need {} bytes, have {}",
            offset, wanted, got
        ),
    )
    .into()
}
