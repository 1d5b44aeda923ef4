//! The R-tree over data blocks.
//!
//! Every node carries the bounding `(chrom, base)` interval of its items.
//! Leaves point at data blocks, internal nodes at child nodes. The full
//! data index and each zoom level's index share this layout.

use super::endian::{Endian, FieldCursor};
use crate::storage::RandomAccess;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashSet;

pub const RTREE_MAGIC: u32 = 0x2468_ACE0;

const TREE_HEADER_SIZE: usize = 48;
const NODE_HEADER_SIZE: usize = 4;
const LEAF_ITEM_SIZE: usize = 32;
const INTERNAL_ITEM_SIZE: usize = 24;

/// Location of one compressed data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRef {
    pub file_offset: u64,
    pub compressed_size: u64,
    /// Upper bound from the file header; equals `compressed_size` for
    /// uncompressed files
    pub uncompressed_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    start_chrom: u32,
    start_base: u32,
    end_chrom: u32,
    end_base: u32,
}

impl Bounds {
    fn read(fields: &mut FieldCursor<'_>) -> Result<Self> {
        Ok(Bounds {
            start_chrom: fields.u32()?,
            start_base: fields.u32()?,
            end_chrom: fields.u32()?,
            end_base: fields.u32()?,
        })
    }

    /// Overlap with `[start, end)` on `chrom`, comparing `(chrom, base)` pairs
    fn overlaps(&self, chrom: u32, start: u32, end: u32) -> bool {
        (chrom, start) < (self.end_chrom, self.end_base)
            && (chrom, end) > (self.start_chrom, self.start_base)
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(Vec<(Bounds, u64, u64)>),
    Internal(Vec<(Bounds, usize)>),
}

/// A fully loaded R-tree. Nodes live in an arena; node 0 is the root.
#[derive(Debug, Clone)]
pub struct RTree {
    nodes: Vec<Node>,
    item_count: u64,
    uncompress_buf_size: u32,
}

impl RTree {
    /// Load every node of the tree rooted at `offset`.
    pub async fn read(
        source: &dyn RandomAccess,
        offset: u64,
        endian: Endian,
        uncompress_buf_size: u32,
    ) -> Result<Self> {
        let raw = source.read_exact_at(offset, TREE_HEADER_SIZE).await?;
        let mut fields = FieldCursor::new(&raw, endian, offset);
        let magic = fields.u32()?;
        if magic != RTREE_MAGIC {
            return Err(Error::format(offset, format!("bad R-tree magic {:#010x}", magic)));
        }
        let _block_size = fields.u32()?;
        let item_count = fields.u64()?;

        // Every leaf holds at least one block and every internal node at
        // least one child
        let max_nodes = item_count.saturating_mul(2).saturating_add(1);
        let mut visited = HashSet::new();
        let mut nodes = vec![Node::Leaf(Vec::new())];
        let mut pending = vec![(offset + TREE_HEADER_SIZE as u64, 0usize)];

        while let Some((node_offset, slot)) = pending.pop() {
            if !visited.insert(node_offset) {
                return Err(Error::format(node_offset, "R-tree node reached twice"));
            }
            let head = source.read_exact_at(node_offset, NODE_HEADER_SIZE).await?;
            let mut fields = FieldCursor::new(&head, endian, node_offset);
            let is_leaf = fields.u8()? != 0;
            fields.skip(1)?;
            let count = usize::from(fields.u16()?);

            let items_offset = node_offset + NODE_HEADER_SIZE as u64;
            let item_size = if is_leaf { LEAF_ITEM_SIZE } else { INTERNAL_ITEM_SIZE };
            let body = source.read_exact_at(items_offset, count * item_size).await?;
            let mut fields = FieldCursor::new(&body, endian, items_offset);

            nodes[slot] = if is_leaf {
                let items = (0..count)
                    .map(|_| -> Result<_> {
                        Ok((Bounds::read(&mut fields)?, fields.u64()?, fields.u64()?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Node::Leaf(items)
            } else {
                let mut children = Vec::with_capacity(count);
                for _ in 0..count {
                    let bounds = Bounds::read(&mut fields)?;
                    let child_offset = fields.u64()?;
                    let child = nodes.len();
                    if child as u64 >= max_nodes {
                        return Err(Error::format(
                            node_offset,
                            format!("R-tree has more nodes than its {} blocks allow", item_count),
                        ));
                    }
                    nodes.push(Node::Leaf(Vec::new()));
                    pending.push((child_offset, child));
                    children.push((bounds, child));
                }
                Node::Internal(children)
            };
        }

        tracing::debug!(
            "loaded R-tree at {}: {} nodes, {} blocks",
            offset,
            nodes.len(),
            item_count
        );
        Ok(Self {
            nodes,
            item_count,
            uncompress_buf_size,
        })
    }

    /// Number of data blocks the tree indexes
    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    /// Blocks whose bounds overlap `[start, end)` on `chrom`, sorted by file
    /// offset.
    pub fn region_to_blocks(&self, chrom: u32, start: u32, end: u32) -> Vec<BlockRef> {
        let mut blocks = Vec::new();
        if start >= end || self.nodes.is_empty() {
            return blocks;
        }

        let mut pending = vec![0usize];
        while let Some(index) = pending.pop() {
            match &self.nodes[index] {
                Node::Leaf(items) => {
                    for (bounds, offset, size) in items {
                        if bounds.overlaps(chrom, start, end) {
                            blocks.push(BlockRef {
                                file_offset: *offset,
                                compressed_size: *size,
                                uncompressed_size: if self.uncompress_buf_size > 0 {
                                    u64::from(self.uncompress_buf_size)
                                } else {
                                    *size
                                },
                            });
                        }
                    }
                }
                Node::Internal(children) => {
                    pending.extend(
                        children
                            .iter()
                            .filter(|(bounds, _)| bounds.overlaps(chrom, start, end))
                            .map(|(_, child)| *child),
                    );
                }
            }
        }

        blocks.sort_by_key(|b| b.file_offset);
        blocks.dedup_by_key(|b| b.file_offset);
        blocks
    }
}
