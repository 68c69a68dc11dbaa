//! Outbound connection pooling for the points service.
//!
//! ## Structure
//!
//! - [`connector`] - dialers bound to one remote address ([`GrpcConnector`]).
//! - [`manager`] - the [`ConnectionPool`] contract and the bounded [`Pool`].

pub mod connector;
pub mod manager;

pub use connector::{Connector, GrpcConnector};
pub use manager::{ConnectionPool, Pool};
