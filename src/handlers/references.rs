use super::AppState;
use crate::{
    Result,
    storage::ArchiveKind,
    types::ReferencesResponse,
};
use axum::{
    Json,
    extract::{Path, State},
};

/// Reference sequences of an archive, with index counts for BAM and zoom
/// levels plus the file summary for bigWig.
pub async fn get_references(
    State(state): State<AppState>,
    Path((kind, id)): Path<(ArchiveKind, String)>,
) -> Result<Json<ReferencesResponse>> {
    let response = match kind {
        ArchiveKind::Alignment => {
            let archive = state.archives.alignment(&id).await?;
            ReferencesResponse {
                id,
                references: archive.references()?.to_vec(),
                index_stats: Some(archive.index_stats()?),
                zoom_levels: None,
                summary: None,
            }
        }
        ArchiveKind::Signal => {
            let archive = state.archives.signal(&id).await?;
            ReferencesResponse {
                id,
                references: archive.references()?.to_vec(),
                index_stats: None,
                zoom_levels: Some(archive.zoom_levels()?.to_vec()),
                summary: archive.summary()?,
            }
        }
    };
    Ok(Json(response))
}
