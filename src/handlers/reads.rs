use super::{AppState, UNKNOWN_REFERENCE};
use crate::{
    Result,
    formats::bam::AlignmentRecord,
    query::{AlignmentArchive, CoverageOptions, CoverageResult, ReadQueryOptions},
    types::{CoverageQuery, ReadsQuery, ReadsResponse, RegionQuery, RegionResponse},
};
use axum::{
    Json,
    extract::{Path, Query, State},
};

/// Resolve a region against the archive's references. Unknown names map to
/// an index no archive holds, which every query answers with no data.
fn resolve(archive: &AlignmentArchive, region: &RegionQuery) -> Result<(usize, u64, u64)> {
    let references = archive.references()?;
    let found = archive
        .reference_index(&region.reference_name)
        .and_then(|i| Some((i, references.get(i)?)));
    match found {
        Some((i, reference)) => {
            let (start, end) = region.resolve(reference.length)?;
            Ok((i, start, end))
        }
        None => {
            let (start, end) = region.resolve(0)?;
            Ok((UNKNOWN_REFERENCE, start, end))
        }
    }
}

pub async fn get_reads(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReadsQuery>,
) -> Result<Json<ReadsResponse<AlignmentRecord>>> {
    let region = query.region();
    region.validate()?;
    let archive = state.archives.alignment(&id).await?;
    let (ref_index, start, end) = resolve(&archive, &region)?;

    let max_records = query
        .max_records
        .unwrap_or(state.max_records)
        .min(state.max_records);
    // One extra record tells us whether the cap cut the result short
    let options = ReadQueryOptions {
        max_records: max_records.saturating_add(1),
        include_sequence: query.include_sequence,
    };
    let mut records = archive
        .get_reads_in_region(ref_index, start, end, &options)
        .await?;
    let truncated = records.len() > max_records;
    records.truncate(max_records);

    Ok(Json(ReadsResponse {
        reference_name: region.reference_name,
        start,
        end,
        count: records.len(),
        truncated,
        records,
    }))
}

pub async fn get_coverage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<CoverageQuery>,
) -> Result<Json<RegionResponse<CoverageResult>>> {
    let region = query.region();
    region.validate()?;
    let archive = state.archives.alignment(&id).await?;
    let (ref_index, start, end) = resolve(&archive, &region)?;

    let defaults = CoverageOptions::default();
    let options = CoverageOptions {
        bin_size: query.bin_size.unwrap_or(defaults.bin_size),
        exclude_flags: query.exclude_flags.unwrap_or(defaults.exclude_flags),
    };
    let result = archive
        .get_coverage(ref_index, start, end, &options)
        .await?;

    Ok(Json(RegionResponse {
        reference_name: region.reference_name,
        start,
        end,
        result,
    }))
}
