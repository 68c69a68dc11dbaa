//! Point-balance lookups against the points service.
//!
//! [`EnrichmentClient`] holds no connection of its own: every call takes a
//! channel borrowed from the pool, issues exactly one RPC under the
//! configured deadline, and hands the result back. Returning the channel to
//! the pool is the caller's job.

use core::time::Duration;
use std::collections::HashMap;
use tonic::{Request, codec::CompressionEncoding, transport::Channel};
use userstats_core::{
    Error, Result,
    proto::{PointRequest, UserListRequest, point_server_client::PointServerClient},
    types::UserRecord,
};

#[derive(Clone, Copy, Debug)]
pub struct EnrichmentClient {
    deadline: Duration,
}

impl EnrichmentClient {
    pub const fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    fn client(channel: Channel) -> PointServerClient<Channel> {
        PointServerClient::new(channel).accept_compressed(CompressionEncoding::Zstd)
    }

    /// Looks up the balances of every user in `user_ids` in one call.
    ///
    /// IDs the points service does not know are simply absent from the map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Enrichment`] if the RPC fails or the deadline passes.
    pub async fn user_list_points(
        &self,
        channel: Channel,
        user_ids: Vec<String>,
    ) -> Result<HashMap<String, i32>> {
        let mut request = Request::new(UserListRequest { user_ids });
        request.set_timeout(self.deadline);

        let mut client = Self::client(channel);
        let reply = tokio::time::timeout(self.deadline, client.get_user_list_points(request))
            .await
            .map_err(|_| self.deadline_exceeded())?
            .map_err(|status| Error::enrichment(status.message()))?;

        Ok(reply.into_inner().user_points)
    }

    /// Looks up the balance of a single user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Enrichment`] if the RPC fails, the deadline passes, or
    /// the reply is not a decimal integer.
    pub async fn user_points(&self, channel: Channel, user_id: String) -> Result<i64> {
        let mut request = Request::new(PointRequest { user_id });
        request.set_timeout(self.deadline);

        let mut client = Self::client(channel);
        let reply = tokio::time::timeout(self.deadline, client.get_user_points(request))
            .await
            .map_err(|_| self.deadline_exceeded())?
            .map_err(|status| Error::enrichment(status.message()))?
            .into_inner();

        reply.user_point.trim().parse().map_err(|_| {
            Error::enrichment(format!(
                "points service returned a non-numeric balance '{}'",
                reply.user_point
            ))
        })
    }

    fn deadline_exceeded(&self) -> Error {
        Error::enrichment(format!(
            "points lookup exceeded its {}ms deadline",
            self.deadline.as_millis()
        ))
    }
}

/// Copies balances onto matching rows. Rows without an entry keep their
/// current balance. Returns how many rows had no entry.
pub fn merge_points(users: &mut [UserRecord], points: &HashMap<String, i32>) -> usize {
    let mut missing = 0;
    for user in users.iter_mut() {
        match points.get(&user.id) {
            Some(&balance) => user.point = i64::from(balance),
            None => missing += 1,
        }
    }
    missing
}
