//! Concurrent aggregation of a user page and table-wide statistics.
//!
//! [`UserService`] answers one "paginated users + global statistics" request
//! with seven independent units of work instead of seven sequential round
//! trips:
//!
//! 1. Fetch the requested page and the row count, then borrow a pooled
//!    channel and enrich the page with point balances from the points
//!    service.
//! 2. Max age, min age, average age, min salary, max salary and average
//!    salary, each over the whole table.
//!
//! All seven run on a [`JoinSet`] and share one [`CancellationToken`]. The
//! first unit to fail cancels the token, the remaining units are shut down,
//! and its error becomes the result of the whole call. A result is only
//! assembled once every unit has reported success.

use crate::{
    pool::ConnectionPool,
    repository::Repository,
    service::enrichment::{EnrichmentClient, merge_points},
    telemetry::{
        increment_aggregation_errors, increment_aggregations, record_aggregation_duration,
        record_enrichment_misses,
    },
};
use core::future::Future;
use core::ops::Deref;
use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use userstats_core::{
    Error, Result,
    types::{AggregationResult, PageRequest, StatisticsSummary, UserRecord},
};

/// Aggregation coordinator for the user statistics endpoint.
///
/// Cheap to clone: the repository and the pool are shared behind [`Arc`]s,
/// and the pool is the only state shared between concurrent calls.
pub struct UserService<R, P> {
    repo: Arc<R>,
    pool: Arc<P>,
    enrichment: EnrichmentClient,
    acquire_timeout: Duration,
}

impl<R, P> Clone for UserService<R, P> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            pool: Arc::clone(&self.pool),
            enrichment: self.enrichment,
            acquire_timeout: self.acquire_timeout,
        }
    }
}

/// What a single unit of work produced.
enum Outcome {
    Page { users: Vec<UserRecord>, count: u64 },
    HighAge(i32),
    LowAge(i32),
    AvgAge(f64),
    LowSalary(f64),
    HighSalary(f64),
    AvgSalary(f64),
}

impl<R, P> UserService<R, P>
where
    R: Repository,
    P: ConnectionPool<Conn = Channel>,
{
    /// `acquire_timeout` bounds how long the enrichment unit waits for a
    /// pooled channel when the pool is exhausted.
    pub const fn new(
        repo: Arc<R>,
        pool: Arc<P>,
        enrichment: EnrichmentClient,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            pool,
            enrichment,
            acquire_timeout,
        }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Returns a page of enriched users together with statistics over the
    /// whole table.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if the parameters are rejected. Nothing is
    ///   read and no connection is borrowed in that case.
    /// - Otherwise the error of the first unit that failed: repository,
    ///   pool ([`Error::PoolTimeout`], [`Error::Connect`], ...) or
    ///   [`Error::Enrichment`].
    #[tracing::instrument(skip(self))]
    pub async fn get_all_user_statistics(
        &self,
        limit: i64,
        offset: i64,
        order_by: &str,
        sort: &str,
    ) -> Result<AggregationResult> {
        let page = PageRequest::new(limit, offset, order_by, sort)?;

        let start = Instant::now();
        increment_aggregations();

        let res = self.aggregate(page).await;
        match &res {
            Ok(result) => {
                record_aggregation_duration(start.elapsed().as_secs_f64() * 1000.0);
                tracing::debug!(
                    rows = result.users.len(),
                    count = result.statistics.count,
                    elapsed = ?start.elapsed(),
                    "aggregation complete"
                );
            }
            Err(err) => {
                increment_aggregation_errors();
                tracing::warn!(error = %err, "aggregation failed");
            }
        }
        res
    }

    async fn aggregate(&self, page: PageRequest) -> Result<AggregationResult> {
        let cancel = CancellationToken::new();
        let mut units = JoinSet::new();

        spawn_unit(
            &mut units,
            &cancel,
            enriched_page(
                Arc::clone(&self.repo),
                Arc::clone(&self.pool),
                self.enrichment,
                self.acquire_timeout,
                page,
            ),
        );

        let repo = Arc::clone(&self.repo);
        spawn_unit(&mut units, &cancel, async move {
            repo.high_age().await.map(Outcome::HighAge)
        });
        let repo = Arc::clone(&self.repo);
        spawn_unit(&mut units, &cancel, async move {
            repo.low_age().await.map(Outcome::LowAge)
        });
        let repo = Arc::clone(&self.repo);
        spawn_unit(&mut units, &cancel, async move {
            repo.avg_age().await.map(Outcome::AvgAge)
        });
        let repo = Arc::clone(&self.repo);
        spawn_unit(&mut units, &cancel, async move {
            repo.low_salary().await.map(Outcome::LowSalary)
        });
        let repo = Arc::clone(&self.repo);
        spawn_unit(&mut units, &cancel, async move {
            repo.high_salary().await.map(Outcome::HighSalary)
        });
        let repo = Arc::clone(&self.repo);
        spawn_unit(&mut units, &cancel, async move {
            repo.avg_salary().await.map(Outcome::AvgSalary)
        });

        let mut parts = Parts::default();
        while let Some(joined) = units.join_next().await {
            let outcome = joined
                .map_err(|e| Error::Task {
                    context: e.to_string(),
                })
                .and_then(|res| res);

            match outcome {
                Ok(outcome) => parts.record(outcome),
                Err(err) => {
                    cancel.cancel();
                    units.shutdown().await;
                    return Err(err);
                }
            }
        }

        parts.finish()
    }
}

/// Spawns one unit that gives up as soon as `cancel` fires.
fn spawn_unit<F>(units: &mut JoinSet<Result<Outcome>>, cancel: &CancellationToken, unit: F)
where
    F: Future<Output = Result<Outcome>> + Send + 'static,
{
    let cancel = cancel.clone();
    units.spawn(async move {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            res = unit => res,
        }
    });
}

/// Unit 1: the page itself, enriched with point balances.
async fn enriched_page<R, P>(
    repo: Arc<R>,
    pool: Arc<P>,
    enrichment: EnrichmentClient,
    acquire_timeout: Duration,
    page: PageRequest,
) -> Result<Outcome>
where
    R: Repository,
    P: ConnectionPool<Conn = Channel>,
{
    let (mut users, count) = repo.user_page(&page).await?;

    let channel = Lease::acquire(pool, acquire_timeout).await?;
    let user_ids = users.iter().map(|u| u.id.clone()).collect();
    let points = enrichment
        .user_list_points(Channel::clone(&channel), user_ids)
        .await?;
    drop(channel);

    let missing = merge_points(&mut users, &points);
    if missing > 0 {
        record_enrichment_misses(missing as u64);
        tracing::debug!(missing, "users without a point balance left at zero");
    }

    Ok(Outcome::Page { users, count })
}

/// A connection borrowed from a pool, returned when dropped.
///
/// Dropping covers every exit from the enrichment unit, including the unit
/// being cancelled or aborted while the RPC is in flight. Connections are
/// cheap handles, so the pool gets back a clone of the one held here.
struct Lease<P>
where
    P: ConnectionPool,
    P::Conn: Clone,
{
    pool: Arc<P>,
    conn: P::Conn,
}

impl<P> Lease<P>
where
    P: ConnectionPool,
    P::Conn: Clone,
{
    async fn acquire(pool: Arc<P>, wait: Duration) -> Result<Self> {
        let conn = tokio::time::timeout(wait, pool.get())
            .await
            .map_err(|_| Error::PoolTimeout {
                waited_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            })??;

        Ok(Self { pool, conn })
    }
}

impl<P> Deref for Lease<P>
where
    P: ConnectionPool,
    P::Conn: Clone,
{
    type Target = P::Conn;

    fn deref(&self) -> &P::Conn {
        &self.conn
    }
}

impl<P> Drop for Lease<P>
where
    P: ConnectionPool,
    P::Conn: Clone,
{
    fn drop(&mut self) {
        self.pool.put(self.conn.clone());
    }
}

/// Results collected from the units as they finish, in any order.
#[derive(Default)]
struct Parts {
    page: Option<(Vec<UserRecord>, u64)>,
    high_age: Option<i32>,
    low_age: Option<i32>,
    avg_age: Option<f64>,
    low_salary: Option<f64>,
    high_salary: Option<f64>,
    avg_salary: Option<f64>,
}

impl Parts {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Page { users, count } => self.page = Some((users, count)),
            Outcome::HighAge(v) => self.high_age = Some(v),
            Outcome::LowAge(v) => self.low_age = Some(v),
            Outcome::AvgAge(v) => self.avg_age = Some(v),
            Outcome::LowSalary(v) => self.low_salary = Some(v),
            Outcome::HighSalary(v) => self.high_salary = Some(v),
            Outcome::AvgSalary(v) => self.avg_salary = Some(v),
        }
    }

    fn finish(self) -> Result<AggregationResult> {
        fn unreported(unit: &str) -> Error {
            Error::Task {
                context: format!("{unit} unit finished without a result"),
            }
        }

        let (users, count) = self.page.ok_or_else(|| unreported("user page"))?;
        Ok(AggregationResult {
            users,
            statistics: StatisticsSummary {
                count,
                high_age: self.high_age.ok_or_else(|| unreported("high age"))?,
                low_age: self.low_age.ok_or_else(|| unreported("low age"))?,
                avg_age: self.avg_age.ok_or_else(|| unreported("average age"))?,
                high_salary: self.high_salary.ok_or_else(|| unreported("high salary"))?,
                low_salary: self.low_salary.ok_or_else(|| unreported("low salary"))?,
                avg_salary: self.avg_salary.ok_or_else(|| unreported("average salary"))?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pool;
    use crate::repository::MemoryRepository;
    use crate::testing::{
        FlakyRepository, StubPool, lazy_channel, sample_points, sample_users,
        spawn_points_server,
    };
    use core::sync::atomic::Ordering;

    const DEADLINE: Duration = Duration::from_secs(2);

    fn service<R: Repository, P: ConnectionPool<Conn = Channel>>(
        repo: Arc<R>,
        pool: Arc<P>,
    ) -> UserService<R, P> {
        UserService::new(repo, pool, EnrichmentClient::new(DEADLINE), DEADLINE)
    }

    #[tokio::test]
    async fn aggregates_page_and_statistics() {
        let server = spawn_points_server(sample_points()).await;
        let pool = Arc::new(Pool::grpc(server.target(), 2, DEADLINE).unwrap());
        let svc = service(Arc::new(MemoryRepository::new(sample_users())), Arc::clone(&pool));

        let result = svc
            .get_all_user_statistics(10, 0, "name", "asc")
            .await
            .unwrap();

        let stats = &result.statistics;
        assert_eq!(stats.count, 9);
        assert_eq!(stats.high_age, 40);
        assert_eq!(stats.low_age, 22);
        assert_eq!(format!("{:.2}", stats.avg_age), "31.22");
        assert_eq!(format!("{:.2}", stats.high_salary), "90000.00");
        assert_eq!(format!("{:.2}", stats.low_salary), "48000.00");
        assert_eq!(format!("{:.2}", stats.avg_salary), "68333.33");

        assert_eq!(result.users.len(), 9);
        let names: Vec<&str> = result.users.iter().map(|u| u.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);

        // The channel went back to the pool.
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test]
    async fn users_missing_from_points_service_keep_zero() {
        let server = spawn_points_server(sample_points()).await;
        let pool = Arc::new(Pool::grpc(server.target(), 1, DEADLINE).unwrap());
        let svc = service(Arc::new(MemoryRepository::new(sample_users())), pool);

        let result = svc
            .get_all_user_statistics(10, 0, "id", "asc")
            .await
            .unwrap();

        let points = sample_points();
        for user in &result.users {
            let expected = points
                .iter()
                .find(|(id, _)| *id == user.id)
                .map_or(0, |(_, p)| i64::from(*p));
            assert_eq!(user.point, expected, "user {}", user.id);
        }
        assert!(result.users.iter().any(|u| u.point == 0));
    }

    #[tokio::test]
    async fn invalid_sort_fails_before_any_io() {
        let repo = Arc::new(FlakyRepository::new(sample_users()));
        let pool = Arc::new(StubPool::new(lazy_channel("http://127.0.0.1:1")));
        let svc = service(Arc::clone(&repo), Arc::clone(&pool));

        for sort in ["ASC", "up", ""] {
            let err = svc
                .get_all_user_statistics(10, 0, "name", sort)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput { .. }), "{sort:?}");
        }
        let err = svc
            .get_all_user_statistics(-1, 0, "name", "asc")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));

        assert_eq!(repo.calls.load(Ordering::SeqCst), 0);
        assert_eq!(pool.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn statistics_ignore_pagination() {
        let server = spawn_points_server(sample_points()).await;
        let pool = Arc::new(Pool::grpc(server.target(), 2, DEADLINE).unwrap());
        let svc = service(Arc::new(MemoryRepository::new(sample_users())), pool);

        let first = svc.get_all_user_statistics(3, 0, "age", "asc").await.unwrap();
        let last = svc.get_all_user_statistics(3, 6, "age", "asc").await.unwrap();
        let all = svc.get_all_user_statistics(100, 0, "age", "asc").await.unwrap();

        assert_eq!(first.users.len(), 3);
        assert_eq!(last.users.len(), 3);
        assert_eq!(all.users.len(), 9);
        assert_eq!(first.statistics, last.statistics);
        assert_eq!(first.statistics, all.statistics);
        assert_eq!(first.users[0].age, 22);
        assert_eq!(last.users[2].age, 40);
    }

    #[tokio::test]
    async fn failing_statistic_fails_the_whole_call() {
        let server = spawn_points_server(sample_points()).await;
        let pool = Arc::new(StubPool::new(server.channel().await));
        let repo = Arc::new(FlakyRepository::failing(sample_users(), "avg_salary"));
        let svc = service(repo, Arc::clone(&pool));

        let err = svc
            .get_all_user_statistics(10, 0, "name", "asc")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Repository { .. }));
        // Whatever was borrowed was given back.
        assert_eq!(
            pool.gets.load(Ordering::SeqCst),
            pool.puts.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn first_failure_cancels_stalled_units() {
        let pool = Arc::new(StubPool::new(lazy_channel("http://127.0.0.1:1")));
        let repo = Arc::new(FlakyRepository::failing_while_stalling(
            sample_users(),
            "high_age",
            &["user_page", "low_age"],
        ));
        let svc = service(repo, Arc::clone(&pool));

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            svc.get_all_user_statistics(10, 0, "name", "asc"),
        )
        .await
        .expect("a failing unit must not wait for stalled siblings");

        assert!(matches!(result, Err(Error::Repository { .. })));
        assert_eq!(pool.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_page_query_fails_the_whole_call() {
        let pool = Arc::new(StubPool::new(lazy_channel("http://127.0.0.1:1")));
        let repo = Arc::new(FlakyRepository::failing(sample_users(), "user_page"));
        let svc = service(repo, Arc::clone(&pool));

        let err = svc
            .get_all_user_statistics(10, 0, "name", "asc")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Repository { .. }));
        assert_eq!(pool.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pool_failure_aborts_aggregation() {
        let pool = Arc::new(StubPool::refusing());
        let svc = service(Arc::new(MemoryRepository::new(sample_users())), pool);

        let err = svc
            .get_all_user_statistics(10, 0, "name", "asc")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
    }

    #[tokio::test]
    async fn enrichment_failure_aborts_aggregation() {
        let pool = Arc::new(StubPool::new(lazy_channel("http://127.0.0.1:1")));
        let svc = UserService::new(
            Arc::new(MemoryRepository::new(sample_users())),
            Arc::clone(&pool),
            EnrichmentClient::new(Duration::from_millis(500)),
            DEADLINE,
        );

        let err = svc
            .get_all_user_statistics(10, 0, "name", "asc")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Enrichment { .. }));
        assert_eq!(pool.gets.load(Ordering::SeqCst), 1);
        assert_eq!(pool.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let server = spawn_points_server(sample_points()).await;
        let pool = Arc::new(Pool::grpc(server.target(), 1, DEADLINE).unwrap());
        let held = pool.get().await.unwrap();

        let svc = UserService::new(
            Arc::new(MemoryRepository::new(sample_users())),
            Arc::clone(&pool),
            EnrichmentClient::new(DEADLINE),
            Duration::from_millis(50),
        );
        let err = svc
            .get_all_user_statistics(10, 0, "name", "asc")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PoolTimeout { waited_ms: 50 }));

        pool.put(held);
        assert!(svc.get_all_user_statistics(10, 0, "name", "asc").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_share_the_pool() {
        let server = spawn_points_server(sample_points()).await;
        let pool = Arc::new(Pool::grpc(server.target(), 2, DEADLINE).unwrap());
        let svc = service(Arc::new(MemoryRepository::new(sample_users())), Arc::clone(&pool));

        let mut calls = JoinSet::new();
        for _ in 0..16 {
            let svc = svc.clone();
            calls.spawn(async move { svc.get_all_user_statistics(5, 0, "salary", "desc").await });
        }
        while let Some(res) = calls.join_next().await {
            let result = res.unwrap().unwrap();
            assert_eq!(result.users.len(), 5);
            assert_eq!(result.users[0].salary, 90_000.0);
        }

        assert!(pool.active() <= 2);
        assert_eq!(pool.idle(), pool.active());
    }
}
