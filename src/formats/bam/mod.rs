//! BAM alignment archives: header, records and their BAI/CSI index.

mod cigar;
mod header;
mod index;
mod record;
mod tags;

pub use cigar::{Cigar, CigarKind, CigarOp};
pub use header::Header;
pub use index::{
    AlignmentIndex, BAI_DEPTH, BAI_MIN_SHIFT, IndexKind, ReferenceMetadata, pseudo_bin, reg2bin,
    reg2bins,
};
pub use record::{AlignmentRecord, Flags, parse_next, record_len};
pub use tags::{TagArray, TagValue, Tags};

#[cfg(test)]
pub(crate) use header::tests::encode_header;
#[cfg(test)]
pub(crate) use record::tests::encode_record;
