use super::{AppState, UNKNOWN_REFERENCE};
use crate::{
    Result,
    formats::bigwig::SignalInterval,
    query::{BinnedSignal, SignalArchive, Stats},
    types::{BinnedSignalQuery, IntervalsBody, RegionQuery, RegionResponse, StatsBody},
};
use axum::{
    Json,
    extract::{Path, Query, State},
};

const DEFAULT_BINS: u32 = 1000;

/// Resolve a region by chromosome id, which is not necessarily a position
/// in the reference list.
fn resolve(archive: &SignalArchive, region: &RegionQuery) -> Result<(usize, u64, u64)> {
    if let Some(id) = archive.reference_index(&region.reference_name) {
        if let Some(reference) = archive.reference(id)? {
            let (start, end) = region.resolve(reference.length)?;
            return Ok((id, start, end));
        }
    }
    let (start, end) = region.resolve(0)?;
    Ok((UNKNOWN_REFERENCE, start, end))
}

pub async fn get_raw_signal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(region): Query<RegionQuery>,
) -> Result<Json<RegionResponse<IntervalsBody<SignalInterval>>>> {
    region.validate()?;
    let archive = state.archives.signal(&id).await?;
    let (ref_index, start, end) = resolve(&archive, &region)?;
    let intervals = archive.get_raw_signal(ref_index, start, end).await?;

    Ok(Json(RegionResponse {
        reference_name: region.reference_name,
        start,
        end,
        result: IntervalsBody { intervals },
    }))
}

pub async fn get_binned_signal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BinnedSignalQuery>,
) -> Result<Json<RegionResponse<BinnedSignal>>> {
    let region = query.region();
    region.validate()?;
    let archive = state.archives.signal(&id).await?;
    let (ref_index, start, end) = resolve(&archive, &region)?;
    let bins = query.bins.unwrap_or(DEFAULT_BINS);
    let result = archive
        .get_binned_signal(ref_index, start, end, bins)
        .await?;

    Ok(Json(RegionResponse {
        reference_name: region.reference_name,
        start,
        end,
        result,
    }))
}

pub async fn get_signal_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(region): Query<RegionQuery>,
) -> Result<Json<RegionResponse<StatsBody<Stats>>>> {
    region.validate()?;
    let archive = state.archives.signal(&id).await?;
    let (ref_index, start, end) = resolve(&archive, &region)?;
    let stats = archive.get_stats(ref_index, start, end).await?;

    Ok(Json(RegionResponse {
        reference_name: region.reference_name,
        start,
        end,
        result: StatsBody { stats },
    }))
}
