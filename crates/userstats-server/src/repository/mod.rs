//! Data access for the user table.
//!
//! The aggregation coordinator only sees the [`Repository`] trait. Every
//! method is an independent call so the coordinator can run them
//! concurrently.
//!
//! ## Implementations
//!
//! - [`MemoryRepository`] - rows held in process, optionally seeded from JSON.
//! - [`PgRepository`] - PostgreSQL via `sqlx` (feature `postgres`).
//!
//! Point balances served by the points service sit behind [`PointsLedger`]:
//! [`MemoryLedger`] in process, [`PgLedger`] over the `points` table.

mod ledger;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use ledger::{MemoryLedger, PointsLedger};
pub use memory::MemoryRepository;
#[cfg(feature = "postgres")]
pub use postgres::{PgLedger, PgRepository};

use core::future::Future;
use userstats_core::{
    Result,
    types::{PageRequest, UserRecord},
};

/// Read access to the user table.
///
/// Statistics methods always cover the whole table, independent of any page.
pub trait Repository: Send + Sync + 'static {
    /// Returns one page of rows, ordered as requested, and the total number
    /// of rows in the table.
    fn user_page(
        &self,
        page: &PageRequest,
    ) -> impl Future<Output = Result<(Vec<UserRecord>, u64)>> + Send;

    fn high_age(&self) -> impl Future<Output = Result<i32>> + Send;

    fn low_age(&self) -> impl Future<Output = Result<i32>> + Send;

    fn avg_age(&self) -> impl Future<Output = Result<f64>> + Send;

    fn low_salary(&self) -> impl Future<Output = Result<f64>> + Send;

    fn high_salary(&self) -> impl Future<Output = Result<f64>> + Send;

    fn avg_salary(&self) -> impl Future<Output = Result<f64>> + Send;
}
