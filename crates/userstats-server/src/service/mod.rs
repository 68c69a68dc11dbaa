//! Request handling for the user statistics service and the points service.
//!
//! - [`coordinator`] - concurrent aggregation behind `GET /users`.
//! - [`enrichment`] - client side of the points lookup.
//! - [`handler`] - axum routes and the JSON response envelope.
//! - [`points`] - server side of the points lookup.

pub mod coordinator;
pub mod enrichment;
pub mod handler;
pub mod points;

pub use coordinator::UserService;
pub use enrichment::EnrichmentClient;
pub use points::PointsService;
