//! Bounded connection pool bound to a single host.
//!
//! Every pool a connection manager creates draws on one shared [`Slots`]
//! budget: a semaphore bounding checked-out handles and a count of physical
//! connections, idle ones included. A pool that needs a new connection while
//! the budget is spent closes an idle connection of a sibling pool first, so
//! installing a replacement pool never exceeds the configured limit.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;

use super::candidates::HostCandidate;
use super::connector::Connector;
use super::error::DbError;

/// Pool sizing, queueing and keep-alive settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on concurrently open physical connections.
    pub max_connections: usize,
    /// Callers allowed to wait for a free connection before `PoolExhausted`.
    pub max_waiters: usize,
    pub connect_timeout: Duration,
    /// How long a queued caller waits for a free connection.
    pub acquire_timeout: Duration,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Option<Duration>,
    /// Connections older than this are closed on release.
    pub max_lifetime: Option<Duration>,
    /// Ping idle connections before handing them out.
    pub test_on_acquire: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_waiters: 64,
            connect_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(300)),
            max_lifetime: Some(Duration::from_secs(1800)),
            test_on_acquire: true,
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub generation: u64,
    pub host: String,
    pub max_connections: usize,
    pub open: usize,
    pub idle: usize,
    pub waiters: usize,
    /// Physical connections across every pool sharing the budget.
    pub physical: usize,
}

/// Connection budget shared by every pool of one manager.
pub struct Slots<C: Connector> {
    max: usize,
    checkouts: Arc<Semaphore>,
    physical: AtomicUsize,
    pools: Mutex<Vec<Weak<PoolShared<C>>>>,
}

impl<C: Connector> Slots<C> {
    pub fn new(max_connections: usize) -> Arc<Self> {
        Arc::new(Self {
            max: max_connections,
            checkouts: Arc::new(Semaphore::new(max_connections)),
            physical: AtomicUsize::new(0),
            pools: Mutex::new(Vec::new()),
        })
    }

    /// Physical connections currently open, idle or checked out, in any pool.
    pub fn physical(&self) -> usize {
        self.physical.load(Ordering::SeqCst)
    }

    fn register(&self, pool: &Arc<PoolShared<C>>) {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        pools.retain(|p| p.strong_count() > 0);
        pools.push(Arc::downgrade(pool));
    }

    fn try_reserve(&self) -> bool {
        self.physical
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max).then_some(n + 1)
            })
            .is_ok()
    }

    /// Takes an idle connection out of any pool other than `except`.
    fn take_foreign_idle(
        &self,
        except: &Arc<PoolShared<C>>,
    ) -> Option<(Arc<PoolShared<C>>, IdleConnection<C::Connection>)> {
        let pools: Vec<_> = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|pool| !Arc::ptr_eq(pool, except))
            .collect();
        pools.into_iter().find_map(|pool| {
            let idle = pool.idle().pop_front()?;
            Some((pool, idle))
        })
    }
}

struct IdleConnection<T> {
    conn: T,
    created_at: Instant,
    idle_since: Instant,
}

struct PoolShared<C: Connector> {
    generation: u64,
    target: HostCandidate,
    connector: Arc<C>,
    config: PoolConfig,
    slots: Arc<Slots<C>>,
    idle: Mutex<VecDeque<IdleConnection<C::Connection>>>,
    open: AtomicUsize,
    waiters: AtomicUsize,
    retired: AtomicBool,
}

impl<C: Connector> PoolShared<C> {
    fn idle(&self) -> MutexGuard<'_, VecDeque<IdleConnection<C::Connection>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expired(&self, created_at: Instant, idle_since: Option<Instant>) -> bool {
        let now = Instant::now();
        let too_old = self
            .config
            .max_lifetime
            .is_some_and(|max| now.duration_since(created_at) >= max);
        let idle_too_long = match (self.config.idle_timeout, idle_since) {
            (Some(max), Some(since)) => now.duration_since(since) >= max,
            _ => false,
        };
        too_old || idle_too_long
    }

    /// Closes a connection this pool counted in `open`.
    async fn discard(&self, conn: C::Connection) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        let _slot = CounterGuard::adopt(&self.slots.physical);
        self.connector.close(conn).await;
    }

    /// Same as [`PoolShared::discard`] for callers that cannot await.
    fn discard_detached(self: &Arc<Self>, conn: C::Connection) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let shared = Arc::clone(self);
                runtime.spawn(async move {
                    let _slot = CounterGuard::adopt(&shared.slots.physical);
                    shared.connector.close(conn).await;
                });
            }
            Err(_) => {
                drop(conn);
                self.slots.physical.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

impl<C: Connector> Drop for PoolShared<C> {
    fn drop(&mut self) {
        let idle = self.idle.get_mut().unwrap_or_else(PoisonError::into_inner);
        self.slots.physical.fetch_sub(idle.len(), Ordering::SeqCst);
    }
}

/// Decrements a counter when dropped, so cancelled futures leave no trace.
struct CounterGuard<'a> {
    counter: &'a AtomicUsize,
    armed: bool,
}

impl<'a> CounterGuard<'a> {
    fn increment(counter: &'a AtomicUsize) -> (Self, usize) {
        let previous = counter.fetch_add(1, Ordering::SeqCst);
        (
            Self {
                counter,
                armed: true,
            },
            previous,
        )
    }

    fn adopt(counter: &'a AtomicUsize) -> Self {
        Self {
            counter,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Pool of physical connections to one host.
pub struct ConnectionPool<C: Connector> {
    shared: Arc<PoolShared<C>>,
}

impl<C: Connector> ConnectionPool<C> {
    /// Creates a pool without opening any connection.
    pub fn new(
        target: HostCandidate,
        connector: Arc<C>,
        config: PoolConfig,
        slots: Arc<Slots<C>>,
        generation: u64,
    ) -> Self {
        let shared = Arc::new(PoolShared {
            generation,
            target,
            connector,
            config,
            slots,
            idle: Mutex::new(VecDeque::new()),
            open: AtomicUsize::new(0),
            waiters: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
        });
        shared.slots.register(&shared);
        Self { shared }
    }

    /// Creates a pool and validates it with one connection and the liveness query.
    ///
    /// The validated connection stays in the pool as its first idle member.
    pub async fn open(
        target: HostCandidate,
        connector: Arc<C>,
        config: PoolConfig,
        slots: Arc<Slots<C>>,
        generation: u64,
    ) -> Result<Self, DbError> {
        let pool = Self::new(target, connector, config, slots, generation);
        let host = pool.shared.target.address();

        let mut conn = pool.acquire().await.map_err(|e| match e {
            DbError::PoolExhausted { .. } => DbError::ConnectFailed {
                host: host.clone(),
                message: e.to_string(),
            },
            other => other,
        })?;

        if let Err(message) = pool.liveness(&mut conn).await {
            conn.mark_broken();
            return Err(DbError::LivenessCheckFailed { host, message });
        }

        Ok(pool)
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation
    }

    pub fn target(&self) -> &HostCandidate {
        &self.shared.target
    }

    pub fn is_retired(&self) -> bool {
        self.shared.retired.load(Ordering::SeqCst)
    }

    /// Returns a usable connection, waiting in line when every slot is busy.
    pub async fn acquire(&self) -> Result<PooledConnection<C>, DbError> {
        if self.is_retired() {
            return Err(DbError::NotConnected);
        }
        let started = Instant::now();
        let permit = self.reserve_slot().await?;
        let shared = &self.shared;

        loop {
            let reused = shared.idle().pop_back();
            if let Some(IdleConnection {
                conn,
                created_at,
                idle_since,
            }) = reused
            {
                if shared.expired(created_at, Some(idle_since)) {
                    tracing::debug!("Closing expired idle connection to {}", shared.target.address());
                    shared.discard(conn).await;
                    continue;
                }

                let mut handle = PooledConnection {
                    conn: Some(conn),
                    created_at,
                    broken: false,
                    shared: Arc::clone(shared),
                    _permit: None,
                };
                if shared.config.test_on_acquire {
                    if let Err(reason) = self.liveness(&mut handle).await {
                        tracing::warn!(
                            "Idle connection to {} failed its ping, discarding: {}",
                            shared.target.address(),
                            reason
                        );
                        handle.close().await;
                        continue;
                    }
                }
                handle._permit = Some(permit);
                return Ok(handle);
            }

            if shared.slots.try_reserve() {
                let physical = CounterGuard::adopt(&shared.slots.physical);
                return self.connect_new(permit, physical).await;
            }

            // The budget is held by idle connections of another pool, or by
            // connections still closing.
            match shared.slots.take_foreign_idle(shared) {
                Some((owner, idle)) => {
                    tracing::debug!(
                        "Closing idle connection to {} (generation {}) to make room for {}",
                        owner.target.address(),
                        owner.generation,
                        shared.target.address()
                    );
                    owner.discard(idle.conn).await;
                }
                None if started.elapsed() >= shared.config.acquire_timeout => {
                    return Err(DbError::PoolExhausted {
                        waited: started.elapsed(),
                    });
                }
                None => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    }

    async fn reserve_slot(&self) -> Result<OwnedSemaphorePermit, DbError> {
        let shared = &self.shared;
        let checkouts = &shared.slots.checkouts;
        match Arc::clone(checkouts).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(DbError::NotConnected),
            Err(TryAcquireError::NoPermits) => {}
        }

        let started = Instant::now();
        let (waiting, ahead) = CounterGuard::increment(&shared.waiters);
        if ahead >= shared.config.max_waiters {
            drop(waiting);
            return Err(DbError::PoolExhausted {
                waited: Duration::ZERO,
            });
        }

        // Dropping the timed-out acquire future removes us from the semaphore queue.
        let result = tokio::time::timeout(
            shared.config.acquire_timeout,
            Arc::clone(checkouts).acquire_owned(),
        )
        .await;
        drop(waiting);

        match result {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(DbError::NotConnected),
            Err(_elapsed) => Err(DbError::PoolExhausted {
                waited: started.elapsed(),
            }),
        }
    }

    /// Opens a physical connection on a budget slot the caller already reserved.
    async fn connect_new(
        &self,
        permit: OwnedSemaphorePermit,
        physical: CounterGuard<'_>,
    ) -> Result<PooledConnection<C>, DbError> {
        let shared = &self.shared;
        let (opened, _) = CounterGuard::increment(&shared.open);

        let connected = tokio::time::timeout(
            shared.config.connect_timeout,
            shared.connector.connect(&shared.target),
        )
        .await;

        match connected {
            Ok(Ok(conn)) => {
                opened.disarm();
                physical.disarm();
                tracing::debug!(
                    "Opened connection to {} (generation {})",
                    shared.target.address(),
                    shared.generation
                );
                Ok(PooledConnection {
                    conn: Some(conn),
                    created_at: Instant::now(),
                    broken: false,
                    shared: Arc::clone(shared),
                    _permit: Some(permit),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DbError::ConnectFailed {
                host: shared.target.address(),
                message: format!("timed out after {:?}", shared.config.connect_timeout),
            }),
        }
    }

    /// Runs the liveness query, giving up after the connect timeout.
    async fn liveness(&self, conn: &mut PooledConnection<C>) -> Result<(), String> {
        let shared = &self.shared;
        let ping = tokio::time::timeout(
            shared.config.connect_timeout,
            shared.connector.ping(&mut **conn),
        )
        .await;
        match ping {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "no answer within {:?}",
                shared.config.connect_timeout
            )),
        }
    }

    /// Returns a connection to the pool. Dropping the handle does the same.
    pub fn release(&self, conn: PooledConnection<C>) {
        drop(conn);
    }

    /// Stops handing out connections and closes the idle ones.
    ///
    /// Handles still checked out finish their work and are closed on release.
    pub async fn retire(&self) {
        let drained: Vec<_> = {
            let mut idle = self.shared.idle();
            self.shared.retired.store(true, Ordering::SeqCst);
            idle.drain(..).collect()
        };
        tracing::info!(
            "Retiring pool for {} (generation {}), closing {} idle connections",
            self.shared.target.address(),
            self.shared.generation,
            drained.len()
        );
        for idle in drained {
            self.shared.discard(idle.conn).await;
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            generation: self.shared.generation,
            host: self.shared.target.address(),
            max_connections: self.shared.config.max_connections,
            open: self.shared.open.load(Ordering::SeqCst),
            idle: self.shared.idle().len(),
            waiters: self.shared.waiters.load(Ordering::SeqCst),
            physical: self.shared.slots.physical(),
        }
    }
}

/// A checked-out connection. Returned to its pool on drop.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    created_at: Instant,
    broken: bool,
    shared: Arc<PoolShared<C>>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl<C: Connector> PooledConnection<C> {
    /// Closes the connection on release instead of pooling it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Generation of the pool this handle belongs to.
    pub fn generation(&self) -> u64 {
        self.shared.generation
    }

    pub fn target(&self) -> &HostCandidate {
        &self.shared.target
    }

    /// Closes the connection now instead of pooling it.
    async fn close(mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.discard(conn).await;
        }
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("connection is only taken when the handle drops")
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("connection is only taken when the handle drops")
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let shared = &self.shared;
        let expired = shared.expired(self.created_at, None);

        let mut idle = shared.idle();
        if self.broken || expired || shared.retired.load(Ordering::SeqCst) {
            drop(idle);
            shared.discard_detached(conn);
            return;
        }
        idle.push_back(IdleConnection {
            conn,
            created_at: self.created_at,
            idle_since: Instant::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::candidates::CandidateSource;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingConnector {
        open: AtomicUsize,
        peak: AtomicUsize,
        connects: AtomicUsize,
        closes: AtomicUsize,
        silent: AtomicBool,
    }

    struct CountedConnection {
        connector: Arc<CountingConnector>,
    }

    impl Drop for CountedConnection {
        fn drop(&mut self) {
            self.connector.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl Connector for Arc<CountingConnector> {
        type Connection = CountedConnection;

        async fn connect(&self, _target: &HostCandidate) -> Result<CountedConnection, DbError> {
            let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(CountedConnection {
                connector: Arc::clone(self),
            })
        }

        async fn ping(&self, _conn: &mut CountedConnection) -> Result<(), DbError> {
            if self.silent.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn close(&self, _conn: CountedConnection) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    type TestPool = ConnectionPool<Arc<CountingConnector>>;

    fn target() -> HostCandidate {
        HostCandidate {
            source: CandidateSource::Primary,
            host: "db.test".into(),
            port: 3306,
            user: "app".into(),
            password: None,
            database: "registry".into(),
        }
    }

    fn config(max: usize, waiters: usize) -> PoolConfig {
        PoolConfig {
            max_connections: max,
            max_waiters: waiters,
            acquire_timeout: Duration::from_secs(1),
            ..PoolConfig::default()
        }
    }

    fn pool(max: usize, waiters: usize) -> (TestPool, Arc<CountingConnector>) {
        let counting = Arc::new(CountingConnector::default());
        let pool = ConnectionPool::new(
            target(),
            Arc::new(Arc::clone(&counting)),
            config(max, waiters),
            Slots::new(max),
            1,
        );
        (pool, counting)
    }

    /// Lets detached closes run.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn released_connections_are_reused() {
        let (pool, counting) = pool(2, 4);
        for _ in 0..5 {
            let conn = pool.acquire().await.unwrap();
            pool.release(conn);
        }
        assert_eq!(counting.connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_times_out_without_phantom_waiters() {
        let (pool, _) = pool(1, 4);
        let held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, DbError::PoolExhausted { .. }));
        assert_eq!(pool.stats().waiters, 0);

        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn full_wait_queue_fails_fast() {
        let (pool, _) = pool(1, 0);
        let _held = pool.acquire().await.unwrap();
        match pool.acquire().await {
            Err(DbError::PoolExhausted { waited }) => assert_eq!(waited, Duration::ZERO),
            other => panic!("expected PoolExhausted, got {:?}", other.err()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn broken_connections_are_closed_through_the_connector() {
        let (pool, counting) = pool(2, 4);
        let mut conn = pool.acquire().await.unwrap();
        conn.mark_broken();
        drop(conn);
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().open, 0);

        settle().await;
        assert_eq!(counting.closes.load(Ordering::SeqCst), 1);
        assert_eq!(counting.open.load(Ordering::SeqCst), 0);
        assert_eq!(pool.stats().physical, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retired_pool_closes_idle_and_in_flight_on_release() {
        let (pool, counting) = pool(3, 4);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        drop(a);

        pool.retire().await;
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(counting.open.load(Ordering::SeqCst), 1);

        drop(b);
        settle().await;
        assert_eq!(counting.open.load(Ordering::SeqCst), 0);
        assert_eq!(counting.closes.load(Ordering::SeqCst), 2);
        assert!(matches!(pool.acquire().await, Err(DbError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_forces_reconnect() {
        let (pool, counting) = pool(1, 4);
        drop(pool.acquire().await.unwrap());
        tokio::time::advance(Duration::from_secs(301)).await;
        drop(pool.acquire().await.unwrap());
        assert_eq!(counting.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_idle_connection_is_replaced_after_the_connect_timeout() {
        let (pool, counting) = pool(1, 4);
        drop(pool.acquire().await.unwrap());
        counting.silent.store(true, Ordering::SeqCst);

        let started = Instant::now();
        let conn = pool.acquire().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(counting.connects.load(Ordering::SeqCst), 2);
        assert_eq!(counting.closes.load(Ordering::SeqCst), 1);
        assert_eq!(counting.open.load(Ordering::SeqCst), 1);
        drop(conn);
        assert_eq!(pool.stats().open, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connections_of_a_sibling_pool_make_room() {
        let counting = Arc::new(CountingConnector::default());
        let connector = Arc::new(Arc::clone(&counting));
        let slots = Slots::new(2);
        let old = ConnectionPool::new(target(), Arc::clone(&connector), config(2, 4), Arc::clone(&slots), 1);
        let new = ConnectionPool::new(target(), connector, config(2, 4), Arc::clone(&slots), 2);

        let a = old.acquire().await.unwrap();
        let b = old.acquire().await.unwrap();
        drop((a, b));
        assert_eq!(old.stats().idle, 2);

        let first = new.acquire().await.unwrap();
        let second = new.acquire().await.unwrap();
        assert_eq!(first.generation(), 2);
        assert_eq!(old.stats().idle, 0);
        assert_eq!(old.stats().open, 0);
        assert_eq!(slots.physical(), 2);
        assert_eq!(counting.peak.load(Ordering::SeqCst), 2);
        drop((first, second));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_held_by_checked_out_connections_times_out() {
        let counting = Arc::new(CountingConnector::default());
        let connector = Arc::new(Arc::clone(&counting));
        let slots = Slots::new(1);
        let old = ConnectionPool::new(target(), Arc::clone(&connector), config(1, 4), Arc::clone(&slots), 1);
        let new = ConnectionPool::new(target(), connector, config(1, 4), slots, 2);

        let _held = old.acquire().await.unwrap();
        assert!(matches!(new.acquire().await, Err(DbError::PoolExhausted { .. })));
        assert_eq!(counting.connects.load(Ordering::SeqCst), 1);
    }
}
