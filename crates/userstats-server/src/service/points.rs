//! gRPC points service.
//!
//! Serves point balances from a [`PointsLedger`]. The batch call answers only
//! for IDs the ledger knows; the single call answers `"0"` for a user without
//! a balance.

use crate::repository::{MemoryLedger, PointsLedger};
use std::sync::Arc;
use tonic::{Request, Response, Status};
use userstats_core::{
    Error,
    proto::{
        PointReply, PointRequest, UserListPointResponse, UserListRequest,
        point_server_server::PointServer,
    },
};

pub struct PointsService<L = MemoryLedger> {
    ledger: Arc<L>,
}

impl<L> Clone for PointsService<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
        }
    }
}

impl Default for PointsService<MemoryLedger> {
    fn default() -> Self {
        Self::new(MemoryLedger::default())
    }
}

impl<L: PointsLedger> PointsService<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            ledger: Arc::new(ledger),
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }
}

#[tonic::async_trait]
impl<L: PointsLedger> PointServer for PointsService<L> {
    #[tracing::instrument(skip_all, fields(user_id = %request.get_ref().user_id))]
    async fn get_user_points(
        &self,
        request: Request<PointRequest>,
    ) -> Result<Response<PointReply>, Status> {
        let user_id = request.into_inner().user_id;
        if user_id.is_empty() {
            return Err(Error::invalid_input("user_id must not be empty").into());
        }

        let balance = self.ledger.user_points(&user_id).await?.unwrap_or_default();
        Ok(Response::new(PointReply {
            user_point: balance.to_string(),
        }))
    }

    #[tracing::instrument(skip_all, fields(requested = request.get_ref().user_ids.len()))]
    async fn get_user_list_points(
        &self,
        request: Request<UserListRequest>,
    ) -> Result<Response<UserListPointResponse>, Status> {
        let user_ids = request.into_inner().user_ids;
        let user_points = self.ledger.user_list_points(user_ids).await?;

        tracing::debug!(found = user_points.len(), "batch lookup");
        Ok(Response::new(UserListPointResponse { user_points }))
    }
}
