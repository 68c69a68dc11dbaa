//! Fixtures shared by the unit tests of this crate.

use crate::{
    pool::ConnectionPool,
    repository::{MemoryLedger, MemoryRepository, Repository},
    service::points::PointsService,
};
use core::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use std::{collections::HashMap, net::SocketAddr};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Endpoint, Server};
use userstats_core::{
    Error, Result,
    proto::point_server_server::PointServerServer,
    types::{PageRequest, UserRecord},
};

/// Nine users: ages 22..=40 (mean 31.22), salaries 48000..=90000 (mean
/// 68333.33).
pub(crate) fn sample_users() -> Vec<UserRecord> {
    [
        ("u1", "Alice", 30, 65_000.0),
        ("u2", "Bob", 25, 55_000.0),
        ("u3", "Charlie", 35, 75_000.0),
        ("u4", "Diana", 28, 60_000.0),
        ("u5", "Ethan", 40, 90_000.0),
        ("u6", "Fiona", 22, 48_000.0),
        ("u7", "George", 33, 72_000.0),
        ("u8", "Hannah", 37, 82_000.0),
        ("u9", "Ivan", 31, 68_000.0),
    ]
    .into_iter()
    .map(|(id, name, age, salary)| UserRecord {
        id: id.into(),
        name: name.into(),
        email: format!("{}@example.com", name.to_lowercase()),
        department_id: if age < 30 { "d1" } else { "d2" }.into(),
        age,
        salary,
        point: 0,
    })
    .collect()
}

/// Balances for every sample user except `u9`.
pub(crate) fn sample_points() -> Vec<(&'static str, i32)> {
    vec![
        ("u1", 120),
        ("u2", 80),
        ("u3", 45),
        ("u4", 300),
        ("u5", 15),
        ("u6", 60),
        ("u7", 210),
        ("u8", 5),
    ]
}

/// A points server on an ephemeral local port. Stops when dropped.
pub(crate) struct TestPointsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestPointsServer {
    pub(crate) fn target(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) async fn channel(&self) -> Channel {
        Endpoint::from_shared(self.target())
            .unwrap()
            .connect()
            .await
            .unwrap()
    }
}

impl Drop for TestPointsServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

pub(crate) async fn spawn_points_server<'a>(
    points: impl IntoIterator<Item = (&'a str, i32)>,
) -> TestPointsServer {
    let ledger: HashMap<String, i32> = points
        .into_iter()
        .map(|(id, p)| (id.to_owned(), p))
        .collect();
    let service = PointsService::new(MemoryLedger::new(ledger));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(PointServerServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });

    TestPointsServer {
        addr,
        shutdown: Some(tx),
        handle,
    }
}

/// A channel that only dials on first use.
pub(crate) fn lazy_channel(uri: &'static str) -> Channel {
    Endpoint::from_static(uri).connect_lazy()
}

/// How long a stalled [`FlakyRepository`] operation hangs.
pub(crate) const STALL: Duration = Duration::from_secs(30);

/// Memory repository that counts calls, can fail one named operation and can
/// stall others.
pub(crate) struct FlakyRepository {
    inner: MemoryRepository,
    fail: Option<&'static str>,
    stall: Vec<&'static str>,
    pub(crate) calls: AtomicUsize,
}

impl FlakyRepository {
    pub(crate) fn new(users: Vec<UserRecord>) -> Self {
        Self {
            inner: MemoryRepository::new(users),
            fail: None,
            stall: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(users: Vec<UserRecord>, op: &'static str) -> Self {
        Self {
            fail: Some(op),
            ..Self::new(users)
        }
    }

    /// Fails `op` at once while every operation in `stall` hangs for
    /// [`STALL`].
    pub(crate) fn failing_while_stalling(
        users: Vec<UserRecord>,
        op: &'static str,
        stall: &[&'static str],
    ) -> Self {
        Self {
            stall: stall.to_vec(),
            ..Self::failing(users, op)
        }
    }

    async fn check(&self, op: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall.iter().any(|s| *s == op) {
            tokio::time::sleep(STALL).await;
        }
        if self.fail == Some(op) {
            return Err(Error::repository(format!("{op}: connection reset")));
        }
        Ok(())
    }
}

impl Repository for FlakyRepository {
    async fn user_page(&self, page: &PageRequest) -> Result<(Vec<UserRecord>, u64)> {
        self.check("user_page").await?;
        self.inner.user_page(page).await
    }

    async fn high_age(&self) -> Result<i32> {
        self.check("high_age").await?;
        self.inner.high_age().await
    }

    async fn low_age(&self) -> Result<i32> {
        self.check("low_age").await?;
        self.inner.low_age().await
    }

    async fn avg_age(&self) -> Result<f64> {
        self.check("avg_age").await?;
        self.inner.avg_age().await
    }

    async fn low_salary(&self) -> Result<f64> {
        self.check("low_salary").await?;
        self.inner.low_salary().await
    }

    async fn high_salary(&self) -> Result<f64> {
        self.check("high_salary").await?;
        self.inner.high_salary().await
    }

    async fn avg_salary(&self) -> Result<f64> {
        self.check("avg_salary").await?;
        self.inner.avg_salary().await
    }
}

/// Pool that hands out clones of one channel and counts borrows and returns.
pub(crate) struct StubPool {
    channel: Option<Channel>,
    pub(crate) gets: AtomicUsize,
    pub(crate) puts: AtomicUsize,
}

impl StubPool {
    pub(crate) fn new(channel: Channel) -> Self {
        Self {
            channel: Some(channel),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    /// A pool whose every `get` fails to connect.
    pub(crate) fn refusing() -> Self {
        Self {
            channel: None,
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }
}

impl ConnectionPool for StubPool {
    type Conn = Channel;

    async fn get(&self) -> Result<Channel> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.channel.clone().ok_or_else(|| Error::Connect {
            target: "http://127.0.0.1:1".into(),
            reason: "connection refused".into(),
        })
    }

    fn put(&self, _conn: Channel) {
        self.puts.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {}
}
