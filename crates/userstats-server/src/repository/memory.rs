use super::Repository;
use core::cmp::Ordering;
use parking_lot::RwLock;
use std::path::Path;
use userstats_core::{
    Error, Result,
    types::{PageRequest, SortOrder, UserColumn, UserRecord},
};

/// In-process user table.
///
/// Stored rows never carry a point balance; [`Repository::user_page`] always
/// returns `point == 0` and leaves enrichment to the coordinator.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    users: RwLock<Vec<UserRecord>>,
}

impl MemoryRepository {
    pub fn new(users: Vec<UserRecord>) -> Self {
        Self {
            users: RwLock::new(users),
        }
    }

    /// Loads rows from a JSON array of users.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Repository`] if the file cannot be read or parsed.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| Error::repository(format!("reading {}: {e}", path.display())))?;
        let users: Vec<UserRecord> = serde_json::from_slice(&raw)
            .map_err(|e| Error::repository(format!("parsing {}: {e}", path.display())))?;
        Ok(Self::new(users))
    }

    pub fn insert(&self, user: UserRecord) {
        self.users.write().push(user);
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    fn fold_ages<F>(&self, pick: F) -> i32
    where
        F: Fn(i32, i32) -> i32,
    {
        self.users
            .read()
            .iter()
            .map(|u| u.age)
            .reduce(pick)
            .unwrap_or_default()
    }

    fn fold_salaries<F>(&self, pick: F) -> f64
    where
        F: Fn(f64, f64) -> f64,
    {
        self.users
            .read()
            .iter()
            .map(|u| u.salary)
            .reduce(pick)
            .unwrap_or_default()
    }

    fn mean<F>(&self, field: F) -> f64
    where
        F: Fn(&UserRecord) -> f64,
    {
        let users = self.users.read();
        if users.is_empty() {
            return 0.0;
        }
        users.iter().map(field).sum::<f64>() / users.len() as f64
    }
}

fn compare(column: UserColumn, a: &UserRecord, b: &UserRecord) -> Ordering {
    let primary = match column {
        UserColumn::Id => a.id.cmp(&b.id),
        UserColumn::Name => a.name.cmp(&b.name),
        UserColumn::Email => a.email.cmp(&b.email),
        UserColumn::DepartmentId => a.department_id.cmp(&b.department_id),
        UserColumn::Age => a.age.cmp(&b.age),
        UserColumn::Salary => a.salary.total_cmp(&b.salary),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

impl Repository for MemoryRepository {
    async fn user_page(&self, page: &PageRequest) -> Result<(Vec<UserRecord>, u64)> {
        let column: UserColumn = page.order_by().parse()?;
        let users = self.users.read();

        let mut sorted: Vec<&UserRecord> = users.iter().collect();
        sorted.sort_by(|a, b| match page.sort() {
            SortOrder::Asc => compare(column, a, b),
            SortOrder::Desc => compare(column, b, a),
        });

        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);
        let rows = sorted
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|u| UserRecord {
                point: 0,
                ..u.clone()
            })
            .collect();

        Ok((rows, users.len() as u64))
    }

    async fn high_age(&self) -> Result<i32> {
        Ok(self.fold_ages(i32::max))
    }

    async fn low_age(&self) -> Result<i32> {
        Ok(self.fold_ages(i32::min))
    }

    async fn avg_age(&self) -> Result<f64> {
        Ok(self.mean(|u| f64::from(u.age)))
    }

    async fn low_salary(&self) -> Result<f64> {
        Ok(self.fold_salaries(f64::min))
    }

    async fn high_salary(&self) -> Result<f64> {
        Ok(self.fold_salaries(f64::max))
    }

    async fn avg_salary(&self) -> Result<f64> {
        Ok(self.mean(|u| u.salary))
    }
}
