use crate::formats::ReferenceSequence;
use crate::formats::bigwig::{Summary, ZoomLevel};
use crate::query::IndexStats;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Region parameters shared by every query endpoint.
///
/// `start` defaults to 0 and `end` to the reference length. Coordinates are
/// taken as signed so negative values can be rejected with a region error
/// rather than a generic parse failure.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionQuery {
    #[serde(rename = "referenceName")]
    pub reference_name: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl RegionQuery {
    /// Check the coordinates that were given explicitly, before any archive
    /// is opened.
    pub fn validate(&self) -> Result<()> {
        let start = self.start.unwrap_or(0);
        let end = self.end.unwrap_or(i64::MAX);
        if start < 0 || end < 0 {
            return Err(Error::invalid_region(start, end, "coordinates must be non-negative"));
        }
        if start > end {
            return Err(Error::invalid_region(start, end, "start is after end"));
        }
        Ok(())
    }

    /// Resolve against a reference of `length` bases into `[start, end)`.
    pub fn resolve(&self, length: u64) -> Result<(u64, u64)> {
        let start = self.start.unwrap_or(0);
        let end = self.end.unwrap_or(length as i64);
        if start < 0 || end < 0 {
            return Err(Error::invalid_region(start, end, "coordinates must be non-negative"));
        }
        if start > end {
            return Err(Error::invalid_region(start, end, "start is after end"));
        }
        Ok((start as u64, end as u64))
    }
}

#[derive(Debug, Deserialize)]
pub struct ReadsQuery {
    #[serde(rename = "referenceName")]
    pub reference_name: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
    #[serde(rename = "maxRecords")]
    pub max_records: Option<usize>,
    #[serde(rename = "includeSequence", default)]
    pub include_sequence: bool,
}

#[derive(Debug, Deserialize)]
pub struct CoverageQuery {
    #[serde(rename = "referenceName")]
    pub reference_name: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
    #[serde(rename = "binSize")]
    pub bin_size: Option<u64>,
    #[serde(rename = "excludeFlags")]
    pub exclude_flags: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct BinnedSignalQuery {
    #[serde(rename = "referenceName")]
    pub reference_name: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub bins: Option<u32>,
}

// serde_urlencoded cannot parse numbers through `#[serde(flatten)]`, so
// each query carries the region fields itself.
macro_rules! impl_region {
    ($($ty:ty),*) => {
        $(impl $ty {
            pub fn region(&self) -> RegionQuery {
                RegionQuery {
                    reference_name: self.reference_name.clone(),
                    start: self.start,
                    end: self.end,
                }
            }
        })*
    };
}

impl_region!(ReadsQuery, CoverageQuery, BinnedSignalQuery);

/// Response for a reads query
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadsResponse<T> {
    pub reference_name: String,
    pub start: u64,
    pub end: u64,
    pub count: usize,
    /// True when `maxRecords` cut the result short
    pub truncated: bool,
    pub records: Vec<T>,
}

/// Response wrapping any region result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionResponse<T> {
    pub reference_name: String,
    pub start: u64,
    pub end: u64,
    #[serde(flatten)]
    pub result: T,
}

#[derive(Debug, Serialize)]
pub struct IntervalsBody<T> {
    pub intervals: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct StatsBody<T> {
    pub stats: T,
}

/// Reference listing for either archive kind
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencesResponse {
    pub id: String,
    pub references: Vec<ReferenceSequence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_stats: Option<IndexStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoom_levels: Option<Vec<ZoomLevel>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
}

/// Service info response (GA4GH service-info shape)
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub r#type: ServiceType,
    pub description: Option<String>,
    pub version: String,
    pub trackr: Capabilities,
}

#[derive(Debug, Serialize)]
pub struct ServiceType {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub formats: Vec<String>,
    pub max_raw_width: u64,
    pub max_bins: u64,
    pub max_records: usize,
}
