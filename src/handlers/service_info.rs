use super::AppState;
use crate::types::{Capabilities, ServiceInfo, ServiceType};
use axum::{Json, extract::State};

pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        id: "org.example.trackr".to_string(),
        name: "trackr".to_string(),
        r#type: ServiceType {
            group: "org.example".to_string(),
            artifact: "trackr".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        description: Some("Region queries over indexed BAM and bigWig archives".to_string()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        trackr: Capabilities {
            formats: vec!["BAM".to_string(), "bigWig".to_string()],
            max_raw_width: state.archives.options().max_raw_width,
            max_bins: state.archives.options().max_bins,
            max_records: state.max_records,
        },
    })
}
