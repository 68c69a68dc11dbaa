use core::{hint::black_box, time::Duration};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::{net::TcpListener, runtime::Builder, task::JoinSet};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use userstats_core::{Result, proto::point_server_server::PointServerServer, types::UserRecord};
use userstats_server::{
    pool::{ConnectionPool, Connector, Pool},
    repository::{MemoryLedger, MemoryRepository},
    service::{EnrichmentClient, PointsService, UserService},
};

/// Connector whose connections cost nothing to open, so only the pool's own
/// bookkeeping is measured.
struct NullConnector;

impl Connector for NullConnector {
    type Conn = u64;

    fn target(&self) -> &str {
        "null://"
    }

    async fn connect(&self) -> Result<u64> {
        Ok(0)
    }
}

#[derive(Clone, Copy, Debug)]
struct PoolBenchParams {
    capacity: usize,
    concurrency: usize,
}

const BORROWS_PER_TASK: u64 = 1_000;

fn pool_bench(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();

    let mut cases = Vec::new();
    for &capacity in &[1, 10, 64] {
        for &concurrency in &[1, 8, 64] {
            cases.push(PoolBenchParams {
                capacity,
                concurrency,
            });
        }
    }

    for params in cases {
        let mut group = c.benchmark_group("pool/get_put");
        group.throughput(Throughput::Elements(
            BORROWS_PER_TASK * params.concurrency as u64,
        ));

        group.bench_function(
            format!("cap/{}/conc/{}", params.capacity, params.concurrency),
            |b| {
                let pool = Arc::new(Pool::new(NullConnector, params.capacity).unwrap());
                b.to_async(&rt).iter_custom(|iters| {
                    let pool = Arc::clone(&pool);
                    async move {
                        let start = Instant::now();
                        for _ in 0..iters {
                            run_pool_bench(&pool, params.concurrency).await;
                        }
                        start.elapsed()
                    }
                });
            },
        );

        group.finish();
    }
}

async fn run_pool_bench(pool: &Arc<Pool<NullConnector>>, concurrency: usize) {
    let mut tasks = JoinSet::new();
    for _ in 0..concurrency {
        let pool = Arc::clone(pool);
        tasks.spawn(async move {
            for _ in 0..BORROWS_PER_TASK {
                let conn = pool.get().await.unwrap();
                black_box(&conn);
                pool.put(conn);
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}

fn sample_users(n: usize) -> (Vec<UserRecord>, HashMap<String, i32>) {
    let users: Vec<UserRecord> = (0..n)
        .map(|i| UserRecord {
            id: format!("u{i}"),
            name: format!("user-{i:05}"),
            email: format!("user{i}@example.com"),
            department_id: format!("d{}", i % 7),
            age: 20 + (i % 45) as i32,
            salary: 30_000.0 + (i % 100) as f64 * 750.0,
            point: 0,
        })
        .collect();
    let points = users
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 10 != 0)
        .map(|(i, u)| (u.id.clone(), i as i32))
        .collect();
    (users, points)
}

fn aggregation_bench(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let (users, points) = sample_users(10_000);

    // In-process points server on an ephemeral port.
    let target = rt.block_on(async move {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(
            Server::builder()
                .add_service(PointServerServer::new(PointsService::new(MemoryLedger::new(points))))
                .serve_with_incoming(TcpListenerStream::new(listener)),
        );
        format!("http://{addr}")
    });

    let deadline = Duration::from_secs(5);
    let pool = Arc::new(Pool::grpc(target, 10, deadline).unwrap());
    let service = UserService::new(
        Arc::new(MemoryRepository::new(users)),
        pool,
        EnrichmentClient::new(deadline),
        deadline,
    );

    let mut group = c.benchmark_group("aggregation/get_all_user_statistics");
    for &limit in &[10_i64, 100, 1_000] {
        group.throughput(Throughput::Elements(limit as u64));
        group.bench_function(format!("limit/{limit}"), |b| {
            b.to_async(&rt).iter(|| {
                let service = service.clone();
                async move {
                    let result = service
                        .get_all_user_statistics(limit, 0, "salary", "desc")
                        .await
                        .unwrap();
                    black_box(result);
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, pool_bench, aggregation_bench);
criterion_main!(benches);
