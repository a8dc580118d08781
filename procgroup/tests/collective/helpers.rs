use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use procgroup::sim::{self, SimBackend, SimFabric, SimRuntime};
use procgroup::{CommContext, MemoryStore, ProcessGroup, ProcessGroupConfig, Result, Store};

/// [`MemoryStore`] that counts traffic.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    sets: AtomicUsize,
    gets: AtomicUsize,
}

impl CountingStore {
    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

impl Store for CountingStore {
    fn set<'a>(&'a self, key: &'a str, value: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value)
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key)
    }
}

/// Everything one simulated process owns.
pub struct SimProcess {
    pub rank: u32,
    pub size: u32,
    pub rt: Arc<SimRuntime>,
    pub backend: Arc<SimBackend>,
    pub pg: ProcessGroup,
}

/// State shared by all simulated processes of one job.
pub struct World {
    pub fabric: Arc<SimFabric>,
    pub store: Arc<CountingStore>,
    pub config: ProcessGroupConfig,
}

impl World {
    pub fn new() -> Self {
        Self {
            fabric: SimFabric::new(),
            store: Arc::new(CountingStore::default()),
            config: ProcessGroupConfig::default(),
        }
    }

    pub fn with_config(config: ProcessGroupConfig) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    /// Build process `rank` of `size`, with `devices` local devices.
    pub fn process(&self, rank: u32, size: u32, devices: usize) -> SimProcess {
        let (rt, backend) = sim::local_backend(devices, &self.fabric);
        let ctx = CommContext::new(rt.clone(), backend.clone(), self.config.clone());
        let pg = ProcessGroup::new(ctx, self.store.clone(), rank, size).unwrap();
        SimProcess {
            rank,
            size,
            rt,
            backend,
            pg,
        }
    }
}

/// Helper: run `f` once per simulated process, each on its own thread with
/// its own runtime, and return the results in rank order.
pub async fn run_ranks<F, Fut, T>(size: u32, devices: usize, f: F) -> Vec<T>
where
    F: Fn(SimProcess) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T>,
    T: Send + 'static,
{
    run_ranks_in(&World::new(), size, devices, f).await
}

pub async fn run_ranks_in<F, Fut, T>(world: &World, size: u32, devices: usize, f: F) -> Vec<T>
where
    F: Fn(SimProcess) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T>,
    T: Send + 'static,
{
    let f = Arc::new(f);
    let threads: Vec<_> = (0..size)
        .map(|rank| {
            let process = world.process(rank, size, devices);
            let f = Arc::clone(&f);
            std::thread::Builder::new()
                .name(format!("sim-rank-{rank}"))
                .spawn(move || {
                    let rt = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .unwrap();
                    rt.block_on(f(process))
                })
                .unwrap()
        })
        .collect();

    tokio::task::spawn_blocking(move || {
        threads
            .into_iter()
            .map(|t| t.join().expect("rank thread panicked"))
            .collect()
    })
    .await
    .unwrap()
}
