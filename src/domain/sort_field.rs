//! SortField - Column to SQL Fragment Lookup
//!
//! Every table column the loader knows about has one [`FieldDescriptor`] in a
//! static table. A descriptor names the column id used by the UI, the SQL
//! expression used in `ORDER BY` (if the column can be sorted at all) and the
//! source columns that expression reads.
//!
//! All expressions use the `t` alias; the query builder keeps that alias for
//! every nesting level so one fragment is valid in every query form.

use serde::{Deserialize, Serialize};

/// Columns of the tour table
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Id,
    StartTime,
    Title,
    Distance,
    ElapsedTime,
    MovingTime,
    BreakTime,
    AvgSpeed,
    AvgPulse,
    Calories,
    StartPlace,
    EndPlace,
    TourType,
    ImportFileName,
    Tags,
    Markers,
    WeekDay,
}

/// SQL fragments for one column
#[derive(Debug)]
pub struct FieldDescriptor {
    pub field: SortField,
    /// Column id as used by the table widget
    pub column_id: &'static str,
    /// Expression for `ORDER BY`, `None` when the column cannot be sorted in SQL
    pub order_by: Option<&'static str>,
    /// Columns the order expression reads; selected next to the id in the id-list query
    pub select: &'static [&'static str],
}

/// Lookup table, indexed by `SortField as usize`
static DESCRIPTORS: [FieldDescriptor; 17] = [
    FieldDescriptor {
        field: SortField::Id,
        column_id: "tour_id",
        order_by: Some("t.id"),
        select: &[],
    },
    FieldDescriptor {
        field: SortField::StartTime,
        column_id: "start_time",
        order_by: Some("t.start_time"),
        select: &["t.start_time"],
    },
    FieldDescriptor {
        field: SortField::Title,
        column_id: "title",
        order_by: Some("t.title"),
        select: &["t.title"],
    },
    FieldDescriptor {
        field: SortField::Distance,
        column_id: "distance",
        order_by: Some("t.distance"),
        select: &["t.distance"],
    },
    FieldDescriptor {
        field: SortField::ElapsedTime,
        column_id: "elapsed_time",
        order_by: Some("t.elapsed_time"),
        select: &["t.elapsed_time"],
    },
    FieldDescriptor {
        field: SortField::MovingTime,
        column_id: "moving_time",
        order_by: Some("t.moving_time"),
        select: &["t.moving_time"],
    },
    FieldDescriptor {
        field: SortField::BreakTime,
        column_id: "break_time",
        order_by: Some("(t.elapsed_time - t.moving_time)"),
        select: &["t.elapsed_time", "t.moving_time"],
    },
    FieldDescriptor {
        field: SortField::AvgSpeed,
        column_id: "avg_speed",
        order_by: Some("(t.distance / NULLIF(t.moving_time, 0))"),
        select: &["t.distance", "t.moving_time"],
    },
    FieldDescriptor {
        field: SortField::AvgPulse,
        column_id: "avg_pulse",
        order_by: Some("t.avg_pulse"),
        select: &["t.avg_pulse"],
    },
    FieldDescriptor {
        field: SortField::Calories,
        column_id: "calories",
        order_by: Some("t.calories"),
        select: &["t.calories"],
    },
    FieldDescriptor {
        field: SortField::StartPlace,
        column_id: "start_place",
        order_by: Some("COALESCE(t.start_place, '')"),
        select: &["t.start_place"],
    },
    FieldDescriptor {
        field: SortField::EndPlace,
        column_id: "end_place",
        order_by: Some("COALESCE(t.end_place, '')"),
        select: &["t.end_place"],
    },
    FieldDescriptor {
        field: SortField::TourType,
        column_id: "tour_type",
        order_by: Some("t.tour_type_id"),
        select: &["t.tour_type_id"],
    },
    FieldDescriptor {
        field: SortField::ImportFileName,
        column_id: "import_file_name",
        order_by: Some("t.import_file_name"),
        select: &["t.import_file_name"],
    },
    // 1:N collections and derived calendar values have no SQL ordering
    FieldDescriptor {
        field: SortField::Tags,
        column_id: "tags",
        order_by: None,
        select: &[],
    },
    FieldDescriptor {
        field: SortField::Markers,
        column_id: "markers",
        order_by: None,
        select: &[],
    },
    FieldDescriptor {
        field: SortField::WeekDay,
        column_id: "week_day",
        order_by: None,
        select: &[],
    },
];

impl SortField {
    pub const ALL: [SortField; 17] = [
        SortField::Id,
        SortField::StartTime,
        SortField::Title,
        SortField::Distance,
        SortField::ElapsedTime,
        SortField::MovingTime,
        SortField::BreakTime,
        SortField::AvgSpeed,
        SortField::AvgPulse,
        SortField::Calories,
        SortField::StartPlace,
        SortField::EndPlace,
        SortField::TourType,
        SortField::ImportFileName,
        SortField::Tags,
        SortField::Markers,
        SortField::WeekDay,
    ];

    pub fn descriptor(self) -> &'static FieldDescriptor {
        &DESCRIPTORS[self as usize]
    }

    pub fn column_id(self) -> &'static str {
        self.descriptor().column_id
    }

    pub fn order_by(self) -> Option<&'static str> {
        self.descriptor().order_by
    }

    pub fn is_sortable(self) -> bool {
        self.order_by().is_some()
    }

    /// Look up a field by the table widget's column id
    pub fn from_column_id(column_id: &str) -> Option<SortField> {
        DESCRIPTORS
            .iter()
            .find(|d| d.column_id == column_id)
            .map(|d| d.field)
    }
}

impl std::fmt::Display for SortField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column_id())
    }
}
