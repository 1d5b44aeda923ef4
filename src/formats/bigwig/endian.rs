use crate::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Byte order of a BBI file, fixed by how its magic number reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Byte order under which `bytes` reads as `magic`
    pub fn detect(bytes: &[u8], magic: u32) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        if LittleEndian::read_u32(bytes) == magic {
            Some(Endian::Little)
        } else if BigEndian::read_u32(bytes) == magic {
            Some(Endian::Big)
        } else {
            None
        }
    }
}

/// Sequential fixed-width reads in the file's byte order.
pub(crate) struct FieldCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    endian: Endian,
    origin: u64,
}

impl<'a> FieldCursor<'a> {
    /// `origin` is the file offset of `buf[0]`, used in error reports
    pub(crate) fn new(buf: &'a [u8], endian: Endian, origin: u64) -> Self {
        Self {
            buf,
            pos: 0,
            endian,
            origin,
        }
    }

    pub(crate) fn position(&self) -> u64 {
        self.origin + self.pos as u64
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn require(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(Error::TruncatedRecord {
                offset: self.position(),
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.require(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    fn read<T>(&mut self, n: usize, le: fn(&[u8]) -> T, be: fn(&[u8]) -> T) -> Result<T> {
        let endian = self.endian;
        let bytes = self.bytes(n)?;
        Ok(match endian {
            Endian::Little => le(bytes),
            Endian::Big => be(bytes),
        })
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        self.read(2, LittleEndian::read_u16, BigEndian::read_u16)
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        self.read(4, LittleEndian::read_u32, BigEndian::read_u32)
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        self.read(8, LittleEndian::read_u64, BigEndian::read_u64)
    }

    pub(crate) fn f32(&mut self) -> Result<f32> {
        self.read(4, LittleEndian::read_f32, BigEndian::read_f32)
    }

    pub(crate) fn f64(&mut self) -> Result<f64> {
        self.read(8, LittleEndian::read_f64, BigEndian::read_f64)
    }
}
