//! HTTP surface for the user statistics service.
//!
//! `GET /users` runs one aggregation and answers with the response envelope
//! below; `GET /health` reports liveness.
//!
//! ```json
//! {"result": "success", "data": {"high_age": "40", ..., "count": "9", "list": [...]}}
//! {"result": "failure", "data": {"message": "invalid sort value ..."}}
//! ```
//!
//! Invalid query parameters answer `400`, every other failure `500`.

use super::coordinator::UserService;
use crate::{pool::ConnectionPool, repository::Repository};
use axum::{
    Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tonic::transport::Channel;
use userstats_core::{
    Error, Result,
    types::{AggregationResult, UserRecord},
};

const JSON_UTF8: &str = "application/json;charset=utf-8";

const DEFAULT_LIMIT: i64 = 10;
const DEFAULT_PAGE: i64 = 0;
const DEFAULT_ORDER_BY: &str = "name";
const DEFAULT_SORT: &str = "asc";

pub fn router<R, P>(service: UserService<R, P>) -> Router
where
    R: Repository,
    P: ConnectionPool<Conn = Channel>,
{
    Router::new()
        .route("/users", get(get_all_users::<R, P>))
        .route("/health", get(health))
        .with_state(service)
}

/// Raw `/users` query string. Missing or empty values fall back to defaults.
#[derive(Debug, Default, Deserialize)]
pub struct UsersQuery {
    pub limit: Option<String>,
    pub page: Option<String>,
    pub orderby: Option<String>,
    pub sort: Option<String>,
}

/// `/users` parameters after defaulting and integer parsing.
#[derive(Debug, PartialEq, Eq)]
pub struct UsersParams {
    pub limit: i64,
    pub offset: i64,
    pub order_by: String,
    pub sort: String,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_int(name: &str, value: Option<&str>, default: i64) -> Result<i64> {
    match non_empty(value) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            Error::invalid_input(format!("invalid number '{raw}' for query parameter '{name}'"))
        }),
    }
}

impl TryFrom<&UsersQuery> for UsersParams {
    type Error = Error;

    /// Pages are 1-based: page `n != 0` starts at `limit * n - limit`. Page
    /// `0` is the same as page `1`. A negative page yields a negative offset,
    /// which the page request rejects.
    fn try_from(query: &UsersQuery) -> Result<Self> {
        let limit = parse_int("limit", query.limit.as_deref(), DEFAULT_LIMIT)?;
        let page = parse_int("page", query.page.as_deref(), DEFAULT_PAGE)?;

        let offset = if page != 0 {
            limit
                .checked_mul(page)
                .and_then(|v| v.checked_sub(limit))
                .ok_or_else(|| Error::invalid_input("page is out of range"))?
        } else {
            0
        };

        Ok(Self {
            limit,
            offset,
            order_by: non_empty(query.orderby.as_deref())
                .unwrap_or(DEFAULT_ORDER_BY)
                .to_owned(),
            sort: non_empty(query.sort.as_deref())
                .unwrap_or(DEFAULT_SORT)
                .to_owned(),
        })
    }
}

#[derive(Serialize)]
struct Envelope<T> {
    result: &'static str,
    data: T,
}

/// Body of a successful `/users` response. Numbers are rendered as strings,
/// averages and salaries with two decimals.
#[derive(Debug, Serialize)]
pub struct StatisticsBody {
    pub high_age: String,
    pub low_age: String,
    pub avg_age: String,
    pub high_salary: String,
    pub low_salary: String,
    pub avg_salary: String,
    pub count: String,
    pub list: Vec<UserRecord>,
}

impl From<AggregationResult> for StatisticsBody {
    fn from(result: AggregationResult) -> Self {
        let stats = result.statistics;
        Self {
            high_age: stats.high_age.to_string(),
            low_age: stats.low_age.to_string(),
            avg_age: format!("{:.2}", stats.avg_age),
            high_salary: format!("{:.2}", stats.high_salary),
            low_salary: format!("{:.2}", stats.low_salary),
            avg_salary: format!("{:.2}", stats.avg_salary),
            count: stats.count.to_string(),
            list: result.users,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

fn respond<T: Serialize>(status: StatusCode, result: &'static str, data: T) -> Response {
    match serde_json::to_vec(&Envelope { result, data }) {
        Ok(body) => (status, [(header::CONTENT_TYPE, JSON_UTF8)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn failure(err: &Error) -> Response {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    respond(
        status,
        "failure",
        ErrorBody {
            message: err.to_string(),
        },
    )
}

async fn get_all_users<R, P>(
    State(service): State<UserService<R, P>>,
    Query(query): Query<UsersQuery>,
) -> Response
where
    R: Repository,
    P: ConnectionPool<Conn = Channel>,
{
    let params = match UsersParams::try_from(&query) {
        Ok(params) => params,
        Err(e) => return failure(&e),
    };

    match service
        .get_all_user_statistics(params.limit, params.offset, &params.order_by, &params.sort)
        .await
    {
        Ok(result) => respond(StatusCode::OK, "success", StatisticsBody::from(result)),
        Err(e) => failure(&e),
    }
}

async fn health() -> Response {
    respond(StatusCode::OK, "success", "ok")
}
