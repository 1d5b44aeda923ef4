//! Fixture writers for integration tests: BGZF, BAM + BAI, and bigWig.
//!
//! Everything is written little-endian and laid out the way samtools and
//! the UCSC tools lay out their files, at a much smaller scale.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::{DeflateEncoder, ZlibEncoder};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use trackr::formats::bam::{BAI_DEPTH, BAI_MIN_SHIFT, pseudo_bin, reg2bin};

const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02, 0x00,
    0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

fn bgzf_block(data: &[u8]) -> Vec<u8> {
    let mut deflate = DeflateEncoder::new(Vec::new(), Compression::default());
    deflate.write_all(data).unwrap();
    let cdata = deflate.finish().unwrap();

    let mut crc = flate2::Crc::new();
    crc.update(data);

    let mut block = vec![0x1f, 0x8b, 8, 4, 0, 0, 0, 0, 0, 0xff, 6, 0, b'B', b'C', 2, 0];
    let bsize = (18 + cdata.len() + 8 - 1) as u16;
    block.extend_from_slice(&bsize.to_le_bytes());
    block.extend_from_slice(&cdata);
    block.extend_from_slice(&crc.sum().to_le_bytes());
    block.extend_from_slice(&(data.len() as u32).to_le_bytes());
    block
}

/// Writes a BGZF stream, cutting a block every `block_limit` bytes so
/// records straddle block boundaries.
pub struct BgzfWriter {
    out: Vec<u8>,
    buf: Vec<u8>,
    block_limit: usize,
}

impl BgzfWriter {
    pub fn new(block_limit: usize) -> Self {
        assert!(block_limit > 0 && block_limit <= 65536);
        Self {
            out: Vec::new(),
            buf: Vec::new(),
            block_limit,
        }
    }

    pub fn virtual_offset(&self) -> u64 {
        ((self.out.len() as u64) << 16) | self.buf.len() as u64
    }

    pub fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.block_limit {
            let rest = self.buf.split_off(self.block_limit);
            self.out.extend(bgzf_block(&self.buf));
            self.buf = rest;
        }
    }

    /// Close the current block early
    pub fn flush(&mut self) {
        if !self.buf.is_empty() {
            self.out.extend(bgzf_block(&self.buf));
            self.buf.clear();
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.flush();
        self.out.extend_from_slice(&BGZF_EOF);
        self.out
    }
}

#[derive(Debug, Clone)]
pub struct TestRead {
    pub name: String,
    pub ref_id: i32,
    pub pos: i32,
    pub flag: u16,
    pub cigar: Vec<(u32, char)>,
}

impl TestRead {
    pub fn new(name: &str, ref_id: i32, pos: i32, flag: u16, cigar: &str) -> Self {
        let mut ops = Vec::new();
        let mut len = 0u32;
        for c in cigar.chars() {
            match c.to_digit(10) {
                Some(d) => len = len * 10 + d,
                None => {
                    ops.push((len, c));
                    len = 0;
                }
            }
        }
        Self {
            name: name.to_string(),
            ref_id,
            pos,
            flag,
            cigar: ops,
        }
    }

    fn is_unmapped(&self) -> bool {
        self.flag & 0x4 != 0
    }

    pub fn end(&self) -> i64 {
        let span: u32 = self
            .cigar
            .iter()
            .filter(|(_, op)| matches!(op, 'M' | 'D' | 'N' | '=' | 'X'))
            .map(|(len, _)| len)
            .sum();
        i64::from(self.pos) + i64::from(span.max(1))
    }

    fn encode(&self) -> Vec<u8> {
        let bin = if self.pos < 0 {
            4680
        } else {
            reg2bin(self.pos as u64, self.end() as u64, BAI_MIN_SHIFT, BAI_DEPTH)
        };
        let query_len: u32 = self
            .cigar
            .iter()
            .filter(|(_, op)| matches!(op, 'M' | 'I' | 'S' | '=' | 'X'))
            .map(|(len, _)| len)
            .sum();

        let mut body = Vec::new();
        body.extend_from_slice(&self.ref_id.to_le_bytes());
        body.extend_from_slice(&self.pos.to_le_bytes());
        body.push((self.name.len() + 1) as u8);
        body.push(60);
        body.extend_from_slice(&(bin as u16).to_le_bytes());
        body.extend_from_slice(&(self.cigar.len() as u16).to_le_bytes());
        body.extend_from_slice(&self.flag.to_le_bytes());
        body.extend_from_slice(&(query_len as i32).to_le_bytes());
        body.extend_from_slice(&(-1i32).to_le_bytes());
        body.extend_from_slice(&(-1i32).to_le_bytes());
        body.extend_from_slice(&0i32.to_le_bytes());
        body.extend_from_slice(self.name.as_bytes());
        body.push(0);
        for &(len, op) in &self.cigar {
            let code = "MIDNSHP=X".find(op).unwrap() as u32;
            body.extend_from_slice(&(len << 4 | code).to_le_bytes());
        }
        // All-A sequence, qualities of 30
        body.extend(std::iter::repeat_n(0x11u8, (query_len as usize).div_ceil(2)));
        body.extend(std::iter::repeat_n(30u8, query_len as usize));
        body.extend_from_slice(b"RGZgroup1\0");

        let mut record = (body.len() as i32).to_le_bytes().to_vec();
        record.extend_from_slice(&body);
        record
    }
}

#[derive(Default)]
struct RefIndex {
    bins: BTreeMap<u32, Vec<(u64, u64)>>,
    linear: Vec<u64>,
    first: Option<u64>,
    last: u64,
    mapped: u64,
    unmapped: u64,
}

pub struct BamFixture {
    pub bam: Vec<u8>,
    pub bai: Vec<u8>,
}

impl BamFixture {
    /// Write `<dir>/<id>.bam` and `<dir>/<id>.bam.bai`
    pub fn write_to(&self, dir: &Path, id: &str) {
        std::fs::write(dir.join(format!("{}.bam", id)), &self.bam).unwrap();
        std::fs::write(dir.join(format!("{}.bam.bai", id)), &self.bai).unwrap();
    }
}

/// Build a coordinate-sorted BAM and its BAI index.
pub fn build_bam(refs: &[(&str, u32)], reads: &[TestRead], block_limit: usize) -> BamFixture {
    let mut reads = reads.to_vec();
    reads.sort_by_key(|r| (r.ref_id as u32, r.pos));

    let mut text = String::from("@HD\tVN:1.6\tSO:coordinate\n");
    for (name, len) in refs {
        text.push_str(&format!("@SQ\tSN:{}\tLN:{}\n", name, len));
    }
    let mut header = b"BAM\x01".to_vec();
    header.extend_from_slice(&(text.len() as i32).to_le_bytes());
    header.extend_from_slice(text.as_bytes());
    header.extend_from_slice(&(refs.len() as i32).to_le_bytes());
    for (name, len) in refs {
        header.extend_from_slice(&((name.len() + 1) as i32).to_le_bytes());
        header.extend_from_slice(name.as_bytes());
        header.push(0);
        header.extend_from_slice(&len.to_le_bytes());
    }

    let mut writer = BgzfWriter::new(block_limit);
    writer.write(&header);
    writer.flush();

    let mut index: Vec<RefIndex> = (0..refs.len()).map(|_| RefIndex::default()).collect();
    let mut unplaced = 0u64;

    for read in &reads {
        let start = writer.virtual_offset();
        writer.write(&read.encode());
        let end = writer.virtual_offset();

        if read.ref_id < 0 {
            unplaced += 1;
            continue;
        }
        let entry = &mut index[read.ref_id as usize];
        let (beg, stop) = (read.pos as u64, read.end() as u64);
        let bin = reg2bin(beg, stop, BAI_MIN_SHIFT, BAI_DEPTH);
        let chunks = entry.bins.entry(bin).or_default();
        match chunks.last_mut() {
            Some(last) if last.1 == start => last.1 = end,
            _ => chunks.push((start, end)),
        }

        let last_tile = ((stop - 1) >> BAI_MIN_SHIFT) as usize;
        if entry.linear.len() <= last_tile {
            entry.linear.resize(last_tile + 1, 0);
        }
        for tile in (beg >> BAI_MIN_SHIFT) as usize..=last_tile {
            if entry.linear[tile] == 0 {
                entry.linear[tile] = start;
            }
        }

        entry.first.get_or_insert(start);
        entry.last = end;
        if read.is_unmapped() {
            entry.unmapped += 1;
        } else {
            entry.mapped += 1;
        }
    }
    let bam = writer.finish();

    let mut bai = b"BAI\x01".to_vec();
    bai.extend_from_slice(&(refs.len() as i32).to_le_bytes());
    for entry in &mut index {
        // Empty tiles point at the next populated one's offset
        for i in (0..entry.linear.len().saturating_sub(1)).rev() {
            if entry.linear[i] == 0 {
                entry.linear[i] = entry.linear[i + 1];
            }
        }

        let has_meta = entry.first.is_some();
        let n_bin = entry.bins.len() + usize::from(has_meta);
        bai.extend_from_slice(&(n_bin as i32).to_le_bytes());
        for (bin, chunks) in &entry.bins {
            bai.extend_from_slice(&bin.to_le_bytes());
            bai.extend_from_slice(&(chunks.len() as i32).to_le_bytes());
            for (s, e) in chunks {
                bai.extend_from_slice(&s.to_le_bytes());
                bai.extend_from_slice(&e.to_le_bytes());
            }
        }
        if let Some(first) = entry.first {
            bai.extend_from_slice(&pseudo_bin(BAI_DEPTH).to_le_bytes());
            bai.extend_from_slice(&2i32.to_le_bytes());
            bai.extend_from_slice(&first.to_le_bytes());
            bai.extend_from_slice(&entry.last.to_le_bytes());
            bai.extend_from_slice(&entry.mapped.to_le_bytes());
            bai.extend_from_slice(&entry.unmapped.to_le_bytes());
        }
        bai.extend_from_slice(&(entry.linear.len() as i32).to_le_bytes());
        for v in &entry.linear {
            bai.extend_from_slice(&v.to_le_bytes());
        }
    }
    bai.extend_from_slice(&unplaced.to_le_bytes());

    BamFixture { bam, bai }
}

/// One bedGraph interval: `(chrom id, start, end, value)`
pub type Interval = (u32, u32, u32, f32);

pub struct BigWigBuilder {
    pub chroms: Vec<(String, u32)>,
    pub intervals: Vec<Interval>,
    pub zoom_factors: Vec<u32>,
    pub items_per_block: usize,
    pub compress: bool,
    /// Chromosome ids written to the chromosome tree; defaults to list order
    pub chrom_ids: Option<Vec<u32>>,
}

impl BigWigBuilder {
    pub fn new(chroms: &[(&str, u32)], intervals: &[Interval]) -> Self {
        let mut intervals = intervals.to_vec();
        intervals.sort_by_key(|&(c, s, _, _)| (c, s));
        Self {
            chroms: chroms.iter().map(|(n, l)| (n.to_string(), *l)).collect(),
            intervals,
            zoom_factors: Vec::new(),
            items_per_block: 64,
            compress: true,
            chrom_ids: None,
        }
    }

    /// Intervals must then name chromosomes by these ids.
    pub fn chrom_ids(mut self, ids: &[u32]) -> Self {
        self.chrom_ids = Some(ids.to_vec());
        self
    }

    pub fn zooms(mut self, factors: &[u32]) -> Self {
        self.zoom_factors = factors.to_vec();
        self
    }

    pub fn items_per_block(mut self, n: usize) -> Self {
        self.items_per_block = n.max(1);
        self
    }

    pub fn uncompressed(mut self) -> Self {
        self.compress = false;
        self
    }

    pub fn write_to(&self, dir: &Path, id: &str) {
        std::fs::write(dir.join(format!("{}.bw", id)), self.build()).unwrap();
    }

    pub fn build(&self) -> Vec<u8> {
        let zoom_count = self.zoom_factors.len();
        let summary_offset = 64 + 24 * zoom_count;
        let mut out = vec![0u8; summary_offset + 40];

        let chrom_tree_offset = out.len() as u64;
        self.write_chrom_tree(&mut out);

        // Full-resolution data: one bedGraph section per block
        let full_data_offset = out.len() as u64;
        let blocks: Vec<Vec<Interval>> = self.grouped(&self.intervals, |i| i.0);
        out.extend_from_slice(&(blocks.len() as u64).to_le_bytes());
        let mut max_raw = 0usize;
        let mut leaves = Vec::new();
        for group in &blocks {
            let raw = bed_graph_section(group);
            max_raw = max_raw.max(raw.len());
            let first = group[0];
            let last = group[group.len() - 1];
            let offset = out.len() as u64;
            let stored = self.store(&raw);
            leaves.push((first.0, first.1, last.0, last.2, offset, stored.len() as u64));
            out.extend(stored);
        }
        let full_index_offset = out.len() as u64;
        write_rtree(&mut out, &leaves);

        let mut zoom_headers = Vec::new();
        for &factor in &self.zoom_factors {
            let records = zoom_records(&self.intervals, factor);
            let data_offset = out.len() as u64;
            out.extend_from_slice(&(records.len() as u32).to_le_bytes());
            let mut leaves = Vec::new();
            for group in self.grouped(&records, |r| r.0) {
                let mut raw = Vec::new();
                for r in &group {
                    for v in [r.0, r.1, r.2, r.3] {
                        raw.extend_from_slice(&v.to_le_bytes());
                    }
                    for v in [r.4, r.5, r.6, r.7] {
                        raw.extend_from_slice(&v.to_le_bytes());
                    }
                }
                max_raw = max_raw.max(raw.len());
                let first = &group[0];
                let last = &group[group.len() - 1];
                let offset = out.len() as u64;
                let stored = self.store(&raw);
                leaves.push((first.0, first.1, last.0, last.2, offset, stored.len() as u64));
                out.extend(stored);
            }
            let index_offset = out.len() as u64;
            write_rtree(&mut out, &leaves);
            zoom_headers.push((factor, data_offset, index_offset));
        }

        let mut header = Vec::with_capacity(summary_offset + 40);
        header.extend_from_slice(&0x888F_FC26u32.to_le_bytes());
        header.extend_from_slice(&4u16.to_le_bytes());
        header.extend_from_slice(&(zoom_count as u16).to_le_bytes());
        header.extend_from_slice(&chrom_tree_offset.to_le_bytes());
        header.extend_from_slice(&full_data_offset.to_le_bytes());
        header.extend_from_slice(&full_index_offset.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes());
        header.extend_from_slice(&(summary_offset as u64).to_le_bytes());
        let buf_size = if self.compress { max_raw as u32 } else { 0 };
        header.extend_from_slice(&buf_size.to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes());
        for (factor, data_offset, index_offset) in zoom_headers {
            header.extend_from_slice(&factor.to_le_bytes());
            header.extend_from_slice(&0u32.to_le_bytes());
            header.extend_from_slice(&data_offset.to_le_bytes());
            header.extend_from_slice(&index_offset.to_le_bytes());
        }
        let (bases, min, max, sum, sum_squares) = self.total_summary();
        header.extend_from_slice(&bases.to_le_bytes());
        for v in [min, max, sum, sum_squares] {
            header.extend_from_slice(&v.to_le_bytes());
        }
        out[..header.len()].copy_from_slice(&header);
        out
    }

    /// Split items into blocks that never cross a chromosome
    fn grouped<T: Clone>(&self, items: &[T], chrom: impl Fn(&T) -> u32) -> Vec<Vec<T>> {
        let mut groups: Vec<Vec<T>> = Vec::new();
        for item in items {
            match groups.last_mut() {
                Some(g) if g.len() < self.items_per_block && chrom(&g[0]) == chrom(item) => {
                    g.push(item.clone())
                }
                _ => groups.push(vec![item.clone()]),
            }
        }
        groups
    }

    fn store(&self, raw: &[u8]) -> Vec<u8> {
        if !self.compress {
            return raw.to_vec();
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw).unwrap();
        encoder.finish().unwrap()
    }

    fn write_chrom_tree(&self, out: &mut Vec<u8>) {
        let key_size = self.chroms.iter().map(|(n, _)| n.len()).max().unwrap_or(1);
        out.extend_from_slice(&0x78CA_8C91u32.to_le_bytes());
        out.extend_from_slice(&(self.chroms.len() as u32).to_le_bytes());
        out.extend_from_slice(&(key_size as u32).to_le_bytes());
        out.extend_from_slice(&8u32.to_le_bytes());
        out.extend_from_slice(&(self.chroms.len() as u64).to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.push(1);
        out.push(0);
        out.extend_from_slice(&(self.chroms.len() as u16).to_le_bytes());
        for (i, (name, len)) in self.chroms.iter().enumerate() {
            let id = self.chrom_ids.as_ref().map_or(i as u32, |ids| ids[i]);
            let mut key = name.as_bytes().to_vec();
            key.resize(key_size, 0);
            out.extend_from_slice(&key);
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
        }
    }

    fn total_summary(&self) -> (u64, f64, f64, f64, f64) {
        let mut bases = 0u64;
        let (mut min, mut max, mut sum, mut sum_squares) = (f64::MAX, f64::MIN, 0.0, 0.0);
        for &(_, s, e, v) in &self.intervals {
            let n = u64::from(e - s);
            let v = f64::from(v);
            bases += n;
            min = min.min(v);
            max = max.max(v);
            sum += v * n as f64;
            sum_squares += v * v * n as f64;
        }
        if bases == 0 {
            return (0, 0.0, 0.0, 0.0, 0.0);
        }
        (bases, min, max, sum, sum_squares)
    }
}

fn bed_graph_section(items: &[Interval]) -> Vec<u8> {
    let mut out = Vec::new();
    let (chrom, start) = (items[0].0, items[0].1);
    let end = items[items.len() - 1].2;
    for v in [chrom, start, end, 0, 0] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.push(1);
    out.push(0);
    out.extend_from_slice(&(items.len() as u16).to_le_bytes());
    for &(_, s, e, v) in items {
        out.extend_from_slice(&s.to_le_bytes());
        out.extend_from_slice(&e.to_le_bytes());
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// `(chrom, start, end, valid, min, max, sum, sum_squares)`
type ZoomRow = (u32, u32, u32, u32, f32, f32, f32, f32);

/// Summaries over `factor`-wide windows, each trimmed to the bases it covers
fn zoom_records(intervals: &[Interval], factor: u32) -> Vec<ZoomRow> {
    let mut windows: BTreeMap<(u32, u32), ZoomRow> = BTreeMap::new();
    for &(chrom, start, end, value) in intervals {
        let mut pos = start;
        while pos < end {
            let window = pos / factor;
            let stop = end.min((window + 1) * factor);
            let n = stop - pos;
            let row = windows
                .entry((chrom, window))
                .or_insert((chrom, pos, stop, 0, value, value, 0.0, 0.0));
            row.1 = row.1.min(pos);
            row.2 = row.2.max(stop);
            row.3 += n;
            row.4 = row.4.min(value);
            row.5 = row.5.max(value);
            row.6 += value * n as f32;
            row.7 += value * value * n as f32;
            pos = stop;
        }
    }
    windows.into_values().collect()
}

/// A single-leaf R-tree over `(start chrom, start, end chrom, end, offset, size)`
fn write_rtree(out: &mut Vec<u8>, leaves: &[(u32, u32, u32, u32, u64, u64)]) {
    let end_offset = out.len() as u64;
    let (first, last) = match (leaves.first(), leaves.last()) {
        (Some(f), Some(l)) => ((f.0, f.1), (l.2, l.3)),
        _ => ((0, 0), (0, 0)),
    };
    out.extend_from_slice(&0x2468_ACE0u32.to_le_bytes());
    out.extend_from_slice(&(leaves.len().max(1) as u32).to_le_bytes());
    out.extend_from_slice(&(leaves.len() as u64).to_le_bytes());
    for v in [first.0, first.1, last.0, last.1] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.extend_from_slice(&end_offset.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    out.push(1);
    out.push(0);
    out.extend_from_slice(&(leaves.len() as u16).to_le_bytes());
    for &(c0, s, c1, e, offset, size) in leaves {
        for v in [c0, s, c1, e] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
    }
}
