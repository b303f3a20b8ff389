//! Record - Tour Rows and Their Identifiers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a tour record
///
/// Never reused and independent of any sort order. Stored as a signed
/// 64-bit integer because that is what the backing store hands out.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl RecordId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a record in the current sorted/filtered view
///
/// Only meaningful for the sort/filter state that produced it.
pub type RowPosition = usize;

/// Page number: `row_position / page_size`
pub type PageKey = usize;

/// A hydrated tour row as shown in the table
///
/// Values the device did not record are `None` instead of a reserved number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TourRecord {
    /// Record ID
    pub id: RecordId,
    /// Tour start
    pub start_time: DateTime<Utc>,
    /// Title entered by the user
    pub title: Option<String>,
    /// Distance in meters
    pub distance: Option<f64>,
    /// Elapsed time in seconds
    pub elapsed_time: Option<i64>,
    /// Moving time in seconds
    pub moving_time: Option<i64>,
    /// Average heart rate
    pub avg_pulse: Option<f64>,
    /// Calories in kcal
    pub calories: Option<i64>,
    /// Start location
    pub start_place: Option<String>,
    /// End location
    pub end_place: Option<String>,
    /// Tour type reference
    pub tour_type_id: Option<i64>,
    /// Name of the file the tour was imported from
    pub import_file_name: Option<String>,
    /// Tag IDs (1:N join), empty when the tour has no tags
    pub tag_ids: Vec<i64>,
    /// Marker IDs (1:N join), empty when the tour has no markers
    pub marker_ids: Vec<i64>,
}

impl TourRecord {
    /// Create a record with only the mandatory fields set
    pub fn new(id: impl Into<RecordId>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            start_time,
            title: None,
            distance: None,
            elapsed_time: None,
            moving_time: None,
            avg_pulse: None,
            calories: None,
            start_place: None,
            end_place: None,
            tour_type_id: None,
            import_file_name: None,
            tag_ids: Vec::new(),
            marker_ids: Vec::new(),
        }
    }

    /// Average speed in m/s, derived from distance and moving time
    pub fn avg_speed(&self) -> Option<f64> {
        match (self.distance, self.moving_time) {
            (Some(distance), Some(moving)) if moving > 0 => Some(distance / moving as f64),
            _ => None,
        }
    }

    pub(crate) fn add_tag(&mut self, tag_id: i64) {
        if !self.tag_ids.contains(&tag_id) {
            self.tag_ids.push(tag_id);
        }
    }

    pub(crate) fn add_marker(&mut self, marker_id: i64) {
        if !self.marker_ids.contains(&marker_id) {
            self.marker_ids.push(marker_id);
        }
    }
}
