use core::future::Future;
use parking_lot::RwLock;
use std::{collections::HashMap, path::Path};
use userstats_core::{Error, Result};

/// Read access to per-user point balances.
pub trait PointsLedger: Send + Sync + 'static {
    /// Balance of one user, `None` if the ledger has no row for it.
    fn user_points(&self, user_id: &str) -> impl Future<Output = Result<Option<i32>>> + Send;

    /// Balances of every known user in `user_ids`. Unknown IDs are absent.
    fn user_list_points(
        &self,
        user_ids: Vec<String>,
    ) -> impl Future<Output = Result<HashMap<String, i32>>> + Send;
}

/// In-process ledger keyed by user ID.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    points: RwLock<HashMap<String, i32>>,
}

impl MemoryLedger {
    pub fn new(points: HashMap<String, i32>) -> Self {
        Self {
            points: RwLock::new(points),
        }
    }

    /// Loads balances from a JSON object mapping user IDs to points.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| Error::config(format!("reading {}: {e}", path.display())))?;
        let points: HashMap<String, i32> = serde_json::from_slice(&raw)
            .map_err(|e| Error::config(format!("parsing {}: {e}", path.display())))?;
        Ok(Self::new(points))
    }

    pub fn set_points(&self, user_id: impl Into<String>, points: i32) {
        self.points.write().insert(user_id.into(), points);
    }

    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }
}

impl PointsLedger for MemoryLedger {
    async fn user_points(&self, user_id: &str) -> Result<Option<i32>> {
        Ok(self.points.read().get(user_id).copied())
    }

    async fn user_list_points(&self, user_ids: Vec<String>) -> Result<HashMap<String, i32>> {
        let points = self.points.read();
        Ok(user_ids
            .into_iter()
            .filter_map(|id| points.get(&id).copied().map(|p| (id, p)))
            .collect())
    }
}
