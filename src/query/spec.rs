//! Sort and Filter Specifications
//!
//! A [`SortFilterSpec`] is immutable: the loader swaps in a new one on every
//! sort or filter change and bumps its generation at the same time.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{RecordId, SortField};

/// Sort direction for one sort key
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
    /// Column is part of the request but not sorted; it is skipped
    None,
}

impl SortDirection {
    fn sql(self) -> &'static str {
        match self {
            SortDirection::Desc => "DESC",
            _ => "ASC",
        }
    }
}

/// One effective `ORDER BY` entry
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SortKey {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }

    /// `<expression> ASC|DESC`, `None` for unsortable fields
    pub fn sql(&self) -> Option<String> {
        self.field
            .order_by()
            .map(|expr| format!("{} {}", expr, self.direction.sql()))
    }
}

/// Effective ordering
///
/// Always ends with the tie-break field followed by the record id, so the
/// order is total and every query built from the same spec orders rows the
/// same way.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    /// Build from typed fields
    ///
    /// Unsortable fields and entries with [`SortDirection::None`] are skipped,
    /// repeated fields keep their first direction.
    pub fn new(requested: impl IntoIterator<Item = SortKey>, tie_break: SortField) -> Self {
        let mut keys: Vec<SortKey> = Vec::new();

        for key in requested {
            if key.direction == SortDirection::None {
                continue;
            }
            if !key.field.is_sortable() {
                tracing::debug!("Skipping unsortable field {}", key.field);
                continue;
            }
            if keys.iter().any(|k| k.field == key.field) {
                continue;
            }
            keys.push(key);
        }

        for field in [tie_break, SortField::Id] {
            if field.is_sortable() && !keys.iter().any(|k| k.field == field) {
                keys.push(SortKey::asc(field));
            }
        }

        Self { keys }
    }

    /// Build from table column ids
    ///
    /// An unknown column id falls back to `default_field`; this is never an error.
    pub fn from_column_ids<S: AsRef<str>>(
        requested: impl IntoIterator<Item = (S, SortDirection)>,
        default_field: SortField,
    ) -> Self {
        let keys = requested.into_iter().map(|(column_id, direction)| {
            let column_id = column_id.as_ref();
            let field = SortField::from_column_id(column_id).unwrap_or_else(|| {
                tracing::warn!(
                    "Column \"{}\" has no sort field, sorting by {} instead",
                    column_id,
                    default_field
                );
                default_field
            });
            SortKey { field, direction }
        });

        Self::new(keys, default_field)
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// `ORDER BY` body shared by every ordered query form
    pub fn order_by_sql(&self) -> String {
        self.keys
            .iter()
            .filter_map(SortKey::sql)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Columns the order expressions read, deduplicated in key order
    pub fn select_columns(&self) -> Vec<&'static str> {
        let mut columns: Vec<&'static str> = Vec::new();
        for key in &self.keys {
            for column in key.field.descriptor().select {
                if !columns.contains(column) {
                    columns.push(column);
                }
            }
        }
        columns
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new([], SortField::StartTime)
    }
}

/// Kind of id-set filter requested by the caller
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    All,
    IncludeOnly,
    Exclude,
}

/// Row filter
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum FilterSpec {
    /// Every record
    #[default]
    None,
    /// Only the given records; an empty set matches nothing
    IncludeOnly(Arc<[RecordId]>),
    /// Every record except the given ones; never empty
    Exclude(Arc<[RecordId]>),
}

impl FilterSpec {
    /// Build a filter, normalizing degenerate id sets
    ///
    /// Ids are deduplicated and sorted so equal sets produce equal SQL.
    pub fn new(kind: FilterKind, ids: impl IntoIterator<Item = RecordId>) -> Self {
        let ids: BTreeSet<RecordId> = ids.into_iter().collect();
        let ids: Arc<[RecordId]> = ids.into_iter().collect();

        match kind {
            FilterKind::All => FilterSpec::None,
            FilterKind::IncludeOnly => FilterSpec::IncludeOnly(ids),
            FilterKind::Exclude if ids.is_empty() => FilterSpec::None,
            FilterKind::Exclude => FilterSpec::Exclude(ids),
        }
    }

    pub fn include_only(ids: impl IntoIterator<Item = RecordId>) -> Self {
        Self::new(FilterKind::IncludeOnly, ids)
    }

    pub fn exclude(ids: impl IntoIterator<Item = RecordId>) -> Self {
        Self::new(FilterKind::Exclude, ids)
    }

    /// True when the filter lets every record through
    pub fn is_empty(&self) -> bool {
        matches!(self, FilterSpec::None)
    }

    /// `AND ...` predicate and its parameters, empty when unfiltered
    pub fn predicate(&self) -> (String, Vec<i64>) {
        match self {
            FilterSpec::None => (String::new(), Vec::new()),
            FilterSpec::IncludeOnly(ids) if ids.is_empty() => ("AND 1 = 0".to_string(), Vec::new()),
            FilterSpec::IncludeOnly(ids) => (
                format!("AND t.id IN ({})", parameter_list(ids.len())),
                ids.iter().map(|id| id.get()).collect(),
            ),
            FilterSpec::Exclude(ids) => (
                format!("AND t.id NOT IN ({})", parameter_list(ids.len())),
                ids.iter().map(|id| id.get()).collect(),
            ),
        }
    }
}

fn parameter_list(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Sort and filter state for one loader generation
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SortFilterSpec {
    pub sort: SortSpec,
    pub filter: FilterSpec,
}

impl SortFilterSpec {
    pub fn new(sort: SortSpec, filter: FilterSpec) -> Self {
        Self { sort, filter }
    }

    pub fn with_sort(&self, sort: SortSpec) -> Self {
        Self {
            sort,
            filter: self.filter.clone(),
        }
    }

    pub fn with_filter(&self, filter: FilterSpec) -> Self {
        Self {
            sort: self.sort.clone(),
            filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(spec: &SortSpec) -> Vec<SortField> {
        spec.keys().iter().map(|k| k.field).collect()
    }

    #[test]
    fn test_tie_break_and_id_are_appended() {
        let spec = SortSpec::new([SortKey::desc(SortField::Distance)], SortField::StartTime);
        assert_eq!(
            fields(&spec),
            vec![SortField::Distance, SortField::StartTime, SortField::Id]
        );
        assert_eq!(spec.keys()[0].direction, SortDirection::Desc);
    }

    #[test]
    fn test_tie_break_keeps_caller_direction() {
        let spec = SortSpec::new([SortKey::desc(SortField::StartTime)], SortField::StartTime);
        assert_eq!(fields(&spec), vec![SortField::StartTime, SortField::Id]);
        assert_eq!(spec.keys()[0].direction, SortDirection::Desc);
    }

    #[test]
    fn test_empty_request_still_orders() {
        let spec = SortSpec::new([], SortField::StartTime);
        assert_eq!(spec.order_by_sql(), "t.start_time ASC, t.id ASC");
    }

    #[test]
    fn test_unsortable_and_unsorted_entries_are_skipped() {
        let spec = SortSpec::new(
            [
                SortKey::asc(SortField::Tags),
                SortKey {
                    field: SortField::Title,
                    direction: SortDirection::None,
                },
                SortKey::asc(SortField::Calories),
                SortKey::desc(SortField::Calories),
            ],
            SortField::StartTime,
        );
        assert_eq!(
            fields(&spec),
            vec![SortField::Calories, SortField::StartTime, SortField::Id]
        );
    }

    #[test]
    fn test_unknown_column_falls_back_to_default() {
        let spec = SortSpec::from_column_ids(
            [("bogus", SortDirection::Desc), ("title", SortDirection::Asc)],
            SortField::StartTime,
        );
        assert_eq!(
            fields(&spec),
            vec![SortField::StartTime, SortField::Title, SortField::Id]
        );
        assert_eq!(spec.keys()[0].direction, SortDirection::Desc);
    }

    #[test]
    fn test_select_columns_are_deduplicated() {
        let spec = SortSpec::new(
            [
                SortKey::asc(SortField::AvgSpeed),
                SortKey::asc(SortField::Distance),
            ],
            SortField::StartTime,
        );
        assert_eq!(
            spec.select_columns(),
            vec!["t.distance", "t.moving_time", "t.start_time"]
        );
    }

    #[test]
    fn test_empty_exclude_means_no_filter() {
        assert_eq!(FilterSpec::exclude([]), FilterSpec::None);
        assert!(FilterSpec::exclude([]).is_empty());
    }

    #[test]
    fn test_empty_include_matches_nothing() {
        let filter = FilterSpec::include_only([]);
        assert!(!filter.is_empty());
        assert_eq!(filter.predicate(), ("AND 1 = 0".to_string(), Vec::new()));
    }

    #[test]
    fn test_filter_ids_are_sorted_and_deduplicated() {
        let filter = FilterSpec::include_only([RecordId(3), RecordId(1), RecordId(3)]);
        let (sql, params) = filter.predicate();
        assert_eq!(sql, "AND t.id IN (?, ?)");
        assert_eq!(params, vec![1, 3]);
    }

    #[test]
    fn test_all_kind_ignores_ids() {
        assert_eq!(
            FilterSpec::new(FilterKind::All, [RecordId(1)]),
            FilterSpec::None
        );
    }
}
