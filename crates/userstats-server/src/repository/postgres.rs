use super::{PointsLedger, Repository};
use sqlx::{
    FromRow,
    postgres::{PgPool, PgPoolOptions},
};
use std::collections::HashMap;
use userstats_core::{
    Error, Result,
    types::{PageRequest, UserColumn, UserRecord},
};

const SELECT_USERS: &str = r#"SELECT id::text AS id, name, email, department_id::text AS department_id, age::int4 AS age, salary::float8 AS salary FROM public."user""#;

async fn connect_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(Error::repository)
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    name: String,
    email: String,
    department_id: String,
    age: i32,
    salary: f64,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            department_id: row.department_id,
            age: row.age,
            salary: row.salary,
            point: 0,
        }
    }
}

/// User table in PostgreSQL (`public."user"`).
///
/// `ORDER BY` only accepts the columns of [`UserColumn`]; anything else is a
/// [`Error::Repository`] before a query is sent.
#[derive(Clone, Debug)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// # Errors
    ///
    /// Returns [`Error::Repository`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        connect_pool(database_url, max_connections)
            .await
            .map(Self::new)
    }

    async fn scalar_i32(&self, sql: &str) -> Result<i32> {
        let value: Option<i32> = sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::repository)?;
        Ok(value.unwrap_or_default())
    }

    async fn scalar_f64(&self, sql: &str) -> Result<f64> {
        let value: Option<f64> = sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::repository)?;
        Ok(value.unwrap_or_default())
    }
}

impl Repository for PgRepository {
    async fn user_page(&self, page: &PageRequest) -> Result<(Vec<UserRecord>, u64)> {
        let column: UserColumn = page.order_by().parse()?;
        let sql = format!(
            "{SELECT_USERS} ORDER BY {} {}, id LIMIT $1 OFFSET $2",
            column.as_str(),
            page.sort().as_str()
        );

        let rows: Vec<UserRow> = sqlx::query_as(&sql)
            .bind(i64::try_from(page.limit()).unwrap_or(i64::MAX))
            .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(Error::repository)?;

        let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM public."user""#)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::repository)?;

        Ok((
            rows.into_iter().map(UserRecord::from).collect(),
            u64::try_from(count).unwrap_or_default(),
        ))
    }

    async fn high_age(&self) -> Result<i32> {
        self.scalar_i32(r#"SELECT MAX(age)::int4 FROM public."user""#)
            .await
    }

    async fn low_age(&self) -> Result<i32> {
        self.scalar_i32(r#"SELECT MIN(age)::int4 FROM public."user""#)
            .await
    }

    async fn avg_age(&self) -> Result<f64> {
        self.scalar_f64(r#"SELECT AVG(age)::float8 FROM public."user""#)
            .await
    }

    async fn low_salary(&self) -> Result<f64> {
        self.scalar_f64(r#"SELECT MIN(salary)::float8 FROM public."user""#)
            .await
    }

    async fn high_salary(&self) -> Result<f64> {
        self.scalar_f64(r#"SELECT MAX(salary)::float8 FROM public."user""#)
            .await
    }

    async fn avg_salary(&self) -> Result<f64> {
        self.scalar_f64(r#"SELECT AVG(salary)::float8 FROM public."user""#)
            .await
    }
}

/// Point balances in PostgreSQL (`points` table: `user_id`, `points`).
#[derive(Clone, Debug)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// # Errors
    ///
    /// Returns [`Error::Repository`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        connect_pool(database_url, max_connections)
            .await
            .map(Self::new)
    }
}

impl PointsLedger for PgLedger {
    async fn user_points(&self, user_id: &str) -> Result<Option<i32>> {
        sqlx::query_scalar("SELECT points::int4 FROM points WHERE user_id = $1 LIMIT 1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::repository)
    }

    async fn user_list_points(&self, user_ids: Vec<String>) -> Result<HashMap<String, i32>> {
        let rows: Vec<(String, i32)> = sqlx::query_as(
            "SELECT user_id::text, points::int4 FROM points WHERE user_id = ANY($1)",
        )
        .bind(&user_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::repository)?;

        Ok(rows.into_iter().collect())
    }
}
