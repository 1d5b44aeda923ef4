use super::endian::{Endian, FieldCursor};
use crate::storage::RandomAccess;
use crate::{Error, Result};
use serde::Serialize;

pub const BIGWIG_MAGIC: u32 = 0x888F_FC26;
pub const BIGBED_MAGIC: u32 = 0x8789_F2EB;

const HEADER_SIZE: usize = 64;
const ZOOM_HEADER_SIZE: usize = 24;
const SUMMARY_SIZE: usize = 40;

/// A pre-aggregated resolution stored in the file, with its own R-tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoomLevel {
    pub reduction_factor: u32,
    pub data_offset: u64,
    pub index_offset: u64,
}

/// Whole-file statistics from the total summary block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub bases_covered: u64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub sum_squares: f64,
}

/// The fixed BBI header plus the zoom headers and total summary it points to.
#[derive(Debug, Clone)]
pub struct BbiHeader {
    pub endian: Endian,
    pub version: u16,
    pub chrom_tree_offset: u64,
    pub full_data_offset: u64,
    pub full_index_offset: u64,
    pub field_count: u16,
    pub defined_field_count: u16,
    pub auto_sql_offset: u64,
    pub total_summary_offset: u64,
    pub uncompress_buf_size: u32,
    pub extension_offset: u64,
    pub zoom_levels: Vec<ZoomLevel>,
    pub summary: Option<Summary>,
}

impl BbiHeader {
    pub async fn read(source: &dyn RandomAccess) -> Result<Self> {
        let raw = source.read_exact_at(0, HEADER_SIZE).await?;
        let endian = match Endian::detect(&raw, BIGWIG_MAGIC) {
            Some(endian) => endian,
            None if Endian::detect(&raw, BIGBED_MAGIC).is_some() => {
                return Err(Error::format(0, "file is bigBed, not bigWig"));
            }
            None => return Err(Error::format(0, format!("bad bigWig magic {:02x?}", &raw[..4]))),
        };

        let mut fields = FieldCursor::new(&raw, endian, 0);
        fields.skip(4)?;
        let version = fields.u16()?;
        let zoom_count = fields.u16()?;
        let mut header = BbiHeader {
            endian,
            version,
            chrom_tree_offset: fields.u64()?,
            full_data_offset: fields.u64()?,
            full_index_offset: fields.u64()?,
            field_count: fields.u16()?,
            defined_field_count: fields.u16()?,
            auto_sql_offset: fields.u64()?,
            total_summary_offset: fields.u64()?,
            uncompress_buf_size: fields.u32()?,
            extension_offset: fields.u64()?,
            zoom_levels: Vec::new(),
            summary: None,
        };

        if zoom_count > 0 {
            let len = usize::from(zoom_count) * ZOOM_HEADER_SIZE;
            let raw = source.read_exact_at(HEADER_SIZE as u64, len).await?;
            header.zoom_levels = parse_zoom_levels(&raw, endian, zoom_count)?;
        }

        if header.total_summary_offset != 0 {
            let raw = source
                .read_exact_at(header.total_summary_offset, SUMMARY_SIZE)
                .await?;
            header.summary = Some(parse_summary(&raw, endian, header.total_summary_offset)?);
        }

        tracing::debug!(
            "bigWig v{} ({:?}): {} zoom levels, compressed={}",
            version,
            endian,
            header.zoom_levels.len(),
            header.is_compressed()
        );
        Ok(header)
    }

    /// Data blocks are zlib streams when an uncompress buffer size is set
    pub fn is_compressed(&self) -> bool {
        self.uncompress_buf_size > 0
    }
}

fn parse_zoom_levels(raw: &[u8], endian: Endian, count: u16) -> Result<Vec<ZoomLevel>> {
    let mut fields = FieldCursor::new(raw, endian, HEADER_SIZE as u64);
    (0..count)
        .map(|_| {
            let reduction_factor = fields.u32()?;
            fields.skip(4)?;
            Ok(ZoomLevel {
                reduction_factor,
                data_offset: fields.u64()?,
                index_offset: fields.u64()?,
            })
        })
        .collect()
}

fn parse_summary(raw: &[u8], endian: Endian, offset: u64) -> Result<Summary> {
    let mut fields = FieldCursor::new(raw, endian, offset);
    Ok(Summary {
        bases_covered: fields.u64()?,
        min: fields.f64()?,
        max: fields.f64()?,
        sum: fields.f64()?,
        sum_squares: fields.f64()?,
    })
}
