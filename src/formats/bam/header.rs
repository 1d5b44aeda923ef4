use crate::bgzf::{BlockReader, VirtualOffset};
use crate::formats::ReferenceSequence;
use crate::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;

const BAM_MAGIC: &[u8; 4] = b"BAM\x01";

/// The BAM header: SAM text plus the binary reference dictionary.
#[derive(Debug, Clone, Default)]
pub struct Header {
    text: String,
    references: Vec<ReferenceSequence>,
    by_name: HashMap<String, usize>,
}

impl Header {
    pub fn new(text: String, references: Vec<ReferenceSequence>) -> Self {
        let by_name = references
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
        Self {
            text,
            references,
            by_name,
        }
    }

    /// Read the header from the start of the decompressed stream.
    pub async fn read(reader: &BlockReader) -> Result<Self> {
        let mut cursor = reader.cursor(VirtualOffset::default());

        let magic = cursor.read_exact(4).await?;
        if &magic[..] != BAM_MAGIC {
            return Err(Error::format(0, format!("bad BAM magic {:02x?}", &magic[..])));
        }

        let l_text = read_len(&cursor.read_exact(4).await?, 4, "l_text")?;
        let text = cursor.read_exact(l_text).await?;
        let text = String::from_utf8_lossy(text.strip_suffix(&[0]).unwrap_or(&text)).into_owned();

        let n_ref = read_len(&cursor.read_exact(4).await?, 8 + l_text as u64, "n_ref")?;
        let mut references = Vec::with_capacity(n_ref.min(1 << 16));
        for order_index in 0..n_ref {
            let offset = cursor.position().as_raw();
            let l_name = read_len(&cursor.read_exact(4).await?, offset, "l_name")?;
            let name = cursor.read_exact(l_name).await?;
            let name = String::from_utf8_lossy(name.strip_suffix(&[0]).unwrap_or(&name)).into_owned();
            let l_ref = read_len(&cursor.read_exact(4).await?, offset, "l_ref")?;
            references.push(ReferenceSequence {
                name,
                length: l_ref as u64,
                order_index: order_index as u32,
            });
        }

        tracing::debug!(
            "parsed BAM header: {} references, {} bytes of text",
            references.len(),
            text.len()
        );
        Ok(Header::new(text, references))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn references(&self) -> &[ReferenceSequence] {
        &self.references
    }

    pub fn reference_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }
}

fn read_len(bytes: &[u8], offset: u64, field: &str) -> Result<usize> {
    let value = LittleEndian::read_i32(bytes);
    usize::try_from(value)
        .map_err(|_| Error::format(offset, format!("negative {} in BAM header: {}", field, value)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bgzf::{EOF_MARKER, encode_block};
    use crate::storage::MemorySource;
    use std::sync::Arc;

    pub(crate) fn encode_header(text: &str, refs: &[(&str, u32)]) -> Vec<u8> {
        let mut out = BAM_MAGIC.to_vec();
        out.extend_from_slice(&(text.len() as i32).to_le_bytes());
        out.extend_from_slice(text.as_bytes());
        out.extend_from_slice(&(refs.len() as i32).to_le_bytes());
        for (name, len) in refs {
            out.extend_from_slice(&((name.len() + 1) as i32).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.push(0);
            out.extend_from_slice(&len.to_le_bytes());
        }
        out
    }

    fn reader_over(bytes: &[u8]) -> BlockReader {
        let mut file = Vec::new();
        for part in bytes.chunks(7) {
            file.extend_from_slice(&encode_block(part));
        }
        file.extend_from_slice(&EOF_MARKER);
        BlockReader::new(Arc::new(MemorySource::new(file)), 4)
    }

    #[tokio::test]
    async fn test_read_header_across_blocks() {
        let raw = encode_header("@HD\tVN:1.6\n", &[("chr1", 1_000_000), ("chr2", 500)]);
        let header = Header::read(&reader_over(&raw)).await.unwrap();
        assert_eq!(header.text(), "@HD\tVN:1.6\n");
        assert_eq!(header.references().len(), 2);
        assert_eq!(header.references()[1].name, "chr2");
        assert_eq!(header.references()[1].length, 500);
        assert_eq!(header.references()[1].order_index, 1);
        assert_eq!(header.reference_index("chr1"), Some(0));
        assert_eq!(header.reference_index("chrX"), None);
    }

    #[tokio::test]
    async fn test_bad_magic() {
        let mut raw = encode_header("", &[]);
        raw[0] = b'X';
        let err = Header::read(&reader_over(&raw)).await.unwrap_err();
        assert_eq!(err.kind(), "FormatError");
    }

    #[tokio::test]
    async fn test_truncated_header_is_io_error() {
        let raw = encode_header("", &[("chr1", 10)]);
        let err = Header::read(&reader_over(&raw[..raw.len() - 2])).await.unwrap_err();
        assert_eq!(err.kind(), "IOError");
    }
}
