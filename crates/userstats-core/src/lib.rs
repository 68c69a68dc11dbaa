#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

/// gRPC service and message definitions generated from `proto/points.proto`.
///
/// ## Service
///
/// - `GetUserPoints` - balance of one user, rendered as a decimal string.
/// - `GetUserListPoints` - balances of a batch of users keyed by user ID.
///   IDs the points service does not know are omitted from the reply.
pub mod proto {
    tonic::include_proto!("points");

    /// Encoded descriptor set for `tonic-reflection`.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("points_descriptor");
}
