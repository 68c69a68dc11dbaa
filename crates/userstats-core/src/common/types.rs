//! # Shared domain types
//!
//! Types exchanged between the HTTP surface, the aggregation coordinator and
//! the repositories.
//!
//! - [`UserRecord`] - one row of the user table, plus its point balance.
//! - [`PageRequest`] - validated pagination and sort parameters.
//! - [`StatisticsSummary`] - table-wide aggregates, independent of the page.
//! - [`AggregationResult`] - a page of users together with the statistics.
//!
//! [`PageRequest::new`] is the only way to build a page request, so a value of
//! that type always satisfies the pagination rules: non-negative limit and
//! offset, a non-empty non-numeric `order_by`, and a sort of `asc` or `desc`.

use crate::{Error, Result};
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// A single user row.
///
/// `point` is not stored alongside the user; it defaults to zero and is only
/// filled in by the enrichment step from the points service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub department_id: String,
    pub age: i32,
    pub salary: f64,
    #[serde(default)]
    pub point: i64,
}

/// Sort direction for a page of users.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

impl FromStr for SortOrder {
    type Err = Error;

    /// Only the exact lowercase spellings are accepted.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(Error::invalid_input(format!(
                "invalid sort value '{other}', must be either 'asc' or 'desc'"
            ))),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Columns of the user table that a page may be ordered by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UserColumn {
    Id,
    Name,
    Email,
    DepartmentId,
    Age,
    Salary,
}

impl UserColumn {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Email => "email",
            Self::DepartmentId => "department_id",
            Self::Age => "age",
            Self::Salary => "salary",
        }
    }
}

impl FromStr for UserColumn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "id" => Ok(Self::Id),
            "name" => Ok(Self::Name),
            "email" => Ok(Self::Email),
            "department_id" => Ok(Self::DepartmentId),
            "age" => Ok(Self::Age),
            "salary" => Ok(Self::Salary),
            other => Err(Error::repository(format!("unknown user column '{other}'"))),
        }
    }
}

/// Validated pagination parameters for one aggregation call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    limit: u64,
    offset: u64,
    order_by: String,
    sort: SortOrder,
}

impl PageRequest {
    /// Validates raw pagination parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `limit` or `offset` is negative, if
    /// `order_by` is empty or parses as an integer, or if `sort` is not
    /// exactly `"asc"` or `"desc"`.
    pub fn new(limit: i64, offset: i64, order_by: &str, sort: &str) -> Result<Self> {
        let limit = u64::try_from(limit)
            .map_err(|_| Error::invalid_input(format!("limit must be non-negative, got {limit}")))?;
        let offset = u64::try_from(offset).map_err(|_| {
            Error::invalid_input(format!("offset must be non-negative, got {offset}"))
        })?;

        let order_by = order_by.trim();
        if order_by.is_empty() {
            return Err(Error::invalid_input("orderby must not be empty"));
        }
        if order_by.parse::<i64>().is_ok() {
            return Err(Error::invalid_input(format!(
                "invalid orderby value '{order_by}', must be a column name"
            )));
        }

        Ok(Self {
            limit,
            offset,
            order_by: order_by.to_owned(),
            sort: sort.parse()?,
        })
    }

    pub const fn limit(&self) -> u64 {
        self.limit
    }

    pub const fn offset(&self) -> u64 {
        self.offset
    }

    pub fn order_by(&self) -> &str {
        &self.order_by
    }

    pub const fn sort(&self) -> SortOrder {
        self.sort
    }
}

/// Table-wide statistics. Computed over every row, never just the page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatisticsSummary {
    pub count: u64,
    pub high_age: i32,
    pub low_age: i32,
    pub avg_age: f64,
    pub high_salary: f64,
    pub low_salary: f64,
    pub avg_salary: f64,
}

/// Output of a successful aggregation: a page of enriched users and the
/// table-wide statistics.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregationResult {
    pub users: Vec<UserRecord>,
    pub statistics: StatisticsSummary,
}
