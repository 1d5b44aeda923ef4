//! BGZF block codec.
//!
//! A BGZF file is a series of independently deflated gzip members of at most
//! 64 KiB each. A [`VirtualOffset`] names any byte of the decompressed stream
//! as (compressed block offset, offset inside the block), so any position can
//! be reached by inflating a single block.

mod block;
mod reader;
mod virtual_offset;

pub use block::{Block, EOF_MARKER, MAX_BLOCK_SIZE, block_size, decode_block};
pub use reader::{BlockCursor, BlockReader};
pub use virtual_offset::{Chunk, VirtualOffset, merge_chunks};

#[cfg(test)]
pub(crate) use block::tests::encode_block;
