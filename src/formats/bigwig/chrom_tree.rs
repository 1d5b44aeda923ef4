//! Chromosome B+ tree: maps chromosome names to ids and sizes.

use super::endian::{Endian, FieldCursor};
use crate::formats::ReferenceSequence;
use crate::storage::RandomAccess;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

pub const CHROM_TREE_MAGIC: u32 = 0x78CA_8C91;

const TREE_HEADER_SIZE: usize = 32;
const NODE_HEADER_SIZE: usize = 4;
/// Keys hold chromosome names, which the format caps well below this
const MAX_KEY_SIZE: usize = 1024;

/// Reference sequences of a signal archive, indexed by chromosome id.
#[derive(Debug, Clone, Default)]
pub struct ChromTree {
    references: Vec<ReferenceSequence>,
    by_name: HashMap<String, usize>,
}

impl ChromTree {
    /// Walk the whole tree at `offset` and collect every leaf.
    pub async fn read(source: &dyn RandomAccess, offset: u64, endian: Endian) -> Result<Self> {
        let raw = source.read_exact_at(offset, TREE_HEADER_SIZE).await?;
        let mut fields = FieldCursor::new(&raw, endian, offset);
        let magic = fields.u32()?;
        if magic != CHROM_TREE_MAGIC {
            return Err(Error::format(offset, format!("bad chromosome tree magic {:#010x}", magic)));
        }
        let _block_size = fields.u32()?;
        let key_size = fields.u32()? as usize;
        let val_size = fields.u32()? as usize;
        let item_count = fields.u64()?;
        if val_size != 8 {
            return Err(Error::format(offset, format!("unexpected chromosome value size {}", val_size)));
        }
        if key_size > MAX_KEY_SIZE {
            return Err(Error::format(offset, format!("chromosome key size {} too large", key_size)));
        }

        let max_nodes = item_count.saturating_mul(2).saturating_add(1);
        let mut visited = HashSet::new();
        let mut references = Vec::with_capacity(item_count.min(1 << 16) as usize);
        let mut pending = vec![offset + TREE_HEADER_SIZE as u64];

        while let Some(node_offset) = pending.pop() {
            if !visited.insert(node_offset) {
                return Err(Error::format(node_offset, "chromosome tree node reached twice"));
            }
            if visited.len() as u64 > max_nodes {
                return Err(Error::format(
                    node_offset,
                    format!("chromosome tree has more nodes than its {} items allow", item_count),
                ));
            }
            let head = source.read_exact_at(node_offset, NODE_HEADER_SIZE).await?;
            let mut fields = FieldCursor::new(&head, endian, node_offset);
            let is_leaf = fields.u8()? != 0;
            fields.skip(1)?;
            let count = usize::from(fields.u16()?);

            let items_offset = node_offset + NODE_HEADER_SIZE as u64;
            let body = source.read_exact_at(items_offset, count * (key_size + 8)).await?;
            let mut fields = FieldCursor::new(&body, endian, items_offset);
            let mut children = Vec::new();
            for _ in 0..count {
                let key = fields.bytes(key_size)?;
                if is_leaf {
                    let id = fields.u32()?;
                    let size = fields.u32()?;
                    references.push(ReferenceSequence {
                        name: decode_key(key),
                        length: u64::from(size),
                        order_index: id,
                    });
                } else {
                    children.push(fields.u64()?);
                }
            }
            // Reverse so the leftmost child is visited first
            pending.extend(children.into_iter().rev());
        }

        if references.len() as u64 != item_count {
            tracing::warn!(
                "chromosome tree declares {} items but holds {}",
                item_count,
                references.len()
            );
        }

        references.sort_by_key(|r| r.order_index);
        let by_name = references
            .iter()
            .map(|r| (r.name.clone(), r.order_index as usize))
            .collect();
        Ok(Self {
            references,
            by_name,
        })
    }

    /// All references, ordered by chromosome id
    pub fn references(&self) -> &[ReferenceSequence] {
        &self.references
    }

    /// Chromosome id for `name`
    pub fn reference_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn reference(&self, ref_index: usize) -> Option<&ReferenceSequence> {
        self.references
            .binary_search_by_key(&ref_index, |r| r.order_index as usize)
            .ok()
            .map(|i| &self.references[i])
    }
}

/// Keys are NUL-padded to the tree's key size
fn decode_key(key: &[u8]) -> String {
    let end = key.iter().position(|&b| b == 0).unwrap_or(key.len());
    String::from_utf8_lossy(&key[..end]).into_owned()
}
