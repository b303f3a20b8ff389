//! Query Builder
//!
//! Derives the three query forms the loader needs from one [`SortFilterSpec`]:
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!                 │ filtered_source(select, pred) │  FROM tour AS t WHERE 1=1 AND ...
//!                 └──────────────┬───────────────┘
//!           ┌────────────────────┼─────────────────────┐
//!           ▼                    ▼                     ▼
//!   COUNT(*) over it     + ORDER BY <sort>     + ORDER BY <sort> + paging,
//!                                               joined to tags/markers,
//!                                               + ORDER BY <sort>
//! ```
//!
//! All three go through [`QueryBuilder::compose`], so the id list and the
//! paged rows always agree on predicate and ordering.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::spec::SortFilterSpec;

/// Table holding one row per tour
pub const TOUR_TABLE: &str = "tour";
/// 1:N tag assignments
pub const TOUR_TAG_TABLE: &str = "tour_tag";
/// 1:N markers
pub const TOUR_MARKER_TABLE: &str = "tour_marker";

/// Scalar record columns, in the order the page query returns them
pub const RECORD_COLUMNS: &[&str] = &[
    "t.id",
    "t.start_time",
    "t.title",
    "t.distance",
    "t.elapsed_time",
    "t.moving_time",
    "t.avg_pulse",
    "t.calories",
    "t.start_place",
    "t.end_place",
    "t.tour_type_id",
    "t.import_file_name",
];

/// Index of the joined tag id in a page row; the marker id follows it
pub const JOINED_COLUMN_START: usize = RECORD_COLUMNS.len();

/// How the backing store spells offset paging
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagingSyntax {
    /// `OFFSET ? ROWS FETCH NEXT ? ROWS ONLY` (Derby, SQL:2008)
    OffsetFetch,
    /// `LIMIT ? OFFSET ?` (SQLite)
    #[default]
    LimitOffset,
}

impl PagingSyntax {
    /// Positions past `i64::MAX` saturate, which selects no rows
    fn clause(self, offset: usize, limit: usize) -> (&'static str, [i64; 2]) {
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        match self {
            PagingSyntax::OffsetFetch => ("OFFSET ? ROWS FETCH NEXT ? ROWS ONLY", [offset, limit]),
            PagingSyntax::LimitOffset => ("LIMIT ? OFFSET ?", [limit, offset]),
        }
    }
}

/// A statement with its positional parameters
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<i64>,
}

/// Which of the three forms to build
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueryForm {
    /// `COUNT(*)`, with or without the filter predicate
    Count { filtered: bool },
    /// Ordered distinct ids
    IdList,
    /// One page of hydrated rows
    Page { offset: usize, limit: usize },
}

/// Builds SQL for one sort/filter generation
#[derive(Clone, Debug)]
pub struct QueryBuilder {
    spec: Arc<SortFilterSpec>,
    paging: PagingSyntax,
}

impl QueryBuilder {
    pub fn new(spec: Arc<SortFilterSpec>, paging: PagingSyntax) -> Self {
        Self { spec, paging }
    }

    pub fn spec(&self) -> &SortFilterSpec {
        &self.spec
    }

    pub fn count(&self, filtered: bool) -> SqlQuery {
        self.compose(QueryForm::Count { filtered })
    }

    pub fn id_list(&self) -> SqlQuery {
        self.compose(QueryForm::IdList)
    }

    pub fn page(&self, offset: usize, limit: usize) -> SqlQuery {
        self.compose(QueryForm::Page { offset, limit })
    }

    /// The single composition path for every query form
    pub fn compose(&self, form: QueryForm) -> SqlQuery {
        match form {
            QueryForm::Count { filtered } => {
                let (source, params) = self.filtered_source("DISTINCT t.id", filtered);
                SqlQuery {
                    sql: format!("SELECT COUNT(*) FROM ({source}) AS filtered"),
                    params,
                }
            }

            QueryForm::IdList => {
                let mut select = vec!["t.id"];
                select.extend(
                    self.spec
                        .sort
                        .select_columns()
                        .into_iter()
                        .filter(|c| *c != "t.id"),
                );
                let (source, params) =
                    self.filtered_source(&format!("DISTINCT {}", select.join(", ")), true);
                SqlQuery {
                    sql: format!("{source} {}", self.order_by()),
                    params,
                }
            }

            QueryForm::Page { offset, limit } => {
                let columns = RECORD_COLUMNS.join(", ");
                let (source, mut params) = self.filtered_source(&columns, true);
                let (paging, paging_params) = self.paging.clause(offset, limit);
                params.extend(paging_params);

                let order_by = self.order_by();
                let sql = format!(
                    "SELECT {columns}, tag.tag_id, marker.id \
                     FROM ({source} {order_by} {paging}) AS t \
                     LEFT JOIN {TOUR_TAG_TABLE} AS tag ON tag.tour_id = t.id \
                     LEFT JOIN {TOUR_MARKER_TABLE} AS marker ON marker.tour_id = t.id \
                     {order_by}, tag.tag_id, marker.id"
                );
                SqlQuery { sql, params }
            }
        }
    }

    fn filtered_source(&self, select: &str, apply_filter: bool) -> (String, Vec<i64>) {
        let (predicate, params) = if apply_filter {
            self.spec.filter.predicate()
        } else {
            (String::new(), Vec::new())
        };

        let mut sql = format!("SELECT {select} FROM {TOUR_TABLE} AS t WHERE 1=1");
        if !predicate.is_empty() {
            sql.push(' ');
            sql.push_str(&predicate);
        }
        (sql, params)
    }

    fn order_by(&self) -> String {
        format!("ORDER BY {}", self.spec.sort.order_by_sql())
    }
}
