//! Binary archive formats.
//!
//! - [`bam`] - BGZF-compressed alignment records with a BAI or CSI index
//! - [`bigwig`] - BBI signal tracks with an embedded R-tree and zoom levels
//!
//! Both formats carry a table of reference sequences; its order defines the
//! reference indices used throughout the query layer.

pub mod bam;
pub mod bigwig;

use serde::Serialize;

/// One entry of an archive's reference sequence dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceSequence {
    pub name: String,
    pub length: u64,
    pub order_index: u32,
}
