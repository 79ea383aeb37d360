//! In-memory connector and resolver used by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use citizen_registry_api::db::{
    BackoffPolicy, CandidateSource, ConnectionManager, Connector, DatabaseSettings, DbError,
    FatalPolicy, HostCandidate, HostResolver, PoolConfig, RetryPolicy, Secret, TargetConfig,
};

#[derive(Default)]
struct FakeState {
    reachable: Mutex<HashSet<String>>,
    connects: Mutex<Vec<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    open: AtomicUsize,
    peak: AtomicUsize,
}

/// Connector whose hosts are switched on and off by the test.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<FakeState>,
}

pub struct FakeConnection {
    pub host: String,
    state: Arc<FakeState>,
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.state.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeConnector {
    pub fn with_reachable(hosts: &[&str]) -> Self {
        let connector = Self::default();
        for host in hosts {
            connector.set_reachable(host, true);
        }
        connector
    }

    pub fn set_reachable(&self, host: &str, up: bool) {
        let mut reachable = self.state.reachable.lock().unwrap();
        if up {
            reachable.insert(host.to_string());
        } else {
            reachable.remove(host);
        }
    }

    /// Makes every later `connect` to `host` take `delay` before answering.
    pub fn set_connect_delay(&self, host: &str, delay: Duration) {
        self.state
            .delays
            .lock()
            .unwrap()
            .insert(host.to_string(), delay);
    }

    fn is_reachable(&self, host: &str) -> bool {
        self.state.reachable.lock().unwrap().contains(host)
    }

    /// Hosts passed to `connect`, in call order.
    pub fn connect_log(&self) -> Vec<String> {
        self.state.connects.lock().unwrap().clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connects.lock().unwrap().len()
    }

    pub fn open(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self, target: &HostCandidate) -> Result<FakeConnection, DbError> {
        self.state.connects.lock().unwrap().push(target.host.clone());
        let delay = self.state.delays.lock().unwrap().get(&target.host).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.is_reachable(&target.host) {
            return Err(DbError::ConnectFailed {
                host: target.address(),
                message: "connection refused".into(),
            });
        }
        let now = self.state.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(now, Ordering::SeqCst);
        Ok(FakeConnection {
            host: target.host.clone(),
            state: Arc::clone(&self.state),
        })
    }

    async fn ping(&self, conn: &mut FakeConnection) -> Result<(), DbError> {
        if self.is_reachable(&conn.host) {
            Ok(())
        } else {
            Err(DbError::ConnectionLost(format!("{} went away", conn.host)))
        }
    }

    async fn close(&self, _conn: FakeConnection) {}
}

/// Resolver that fails for the listed hosts and records every lookup.
#[derive(Clone, Default)]
pub struct FakeResolver {
    failing: Arc<HashSet<String>>,
    lookups: Arc<Mutex<Vec<String>>>,
}

impl FakeResolver {
    pub fn failing(hosts: &[&str]) -> Self {
        Self {
            failing: Arc::new(hosts.iter().map(|h| h.to_string()).collect()),
            lookups: Arc::default(),
        }
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostResolver for FakeResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, DbError> {
        self.lookups.lock().unwrap().push(host.to_string());
        if self.failing.contains(host) {
            return Err(DbError::DnsResolutionFailed {
                host: host.to_string(),
                message: "no such host".into(),
            });
        }
        Ok(vec![SocketAddr::from(([10, 0, 0, 1], port))])
    }
}

/// Candidate list `external, primary, internal` without the local fallback.
pub fn targets(external: Option<&str>, primary: Option<&str>, internal: Option<&str>) -> TargetConfig {
    TargetConfig {
        external: external.map(|host| HostCandidate {
            source: CandidateSource::External,
            host: host.to_string(),
            port: 3306,
            user: "registry".into(),
            password: Some(Secret::new("s3cret-password")),
            database: "railway".into(),
        }),
        primary_host: primary.map(str::to_string),
        internal_host: internal.map(str::to_string),
        local_fallback: false,
        port: 3306,
        user: "registry".into(),
        password: Some(Secret::new("s3cret-password")),
        database: "railway".into(),
    }
}

pub fn settings(targets: TargetConfig, max_connections: usize, max_passes: Option<u32>) -> DatabaseSettings {
    DatabaseSettings {
        targets,
        pool: PoolConfig {
            max_connections,
            max_waiters: 64,
            connect_timeout: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(10),
            ..PoolConfig::default()
        },
        retry: RetryPolicy {
            max_passes,
            backoff: BackoffPolicy::Fixed(Duration::from_secs(1)),
            on_fatal: FatalPolicy::Stay,
        },
        dns_probe: true,
        health_timeout: Duration::from_secs(2),
    }
}

/// Lets connections released in the background finish closing.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Waits until `done` holds, re-checking after every status change.
pub async fn wait_until<C: Connector>(
    db: &ConnectionManager<C>,
    mut done: impl FnMut(&ConnectionManager<C>) -> bool,
) {
    let mut changes = db.subscribe();
    tokio::time::timeout(Duration::from_secs(3600), async {
        while !done(db) {
            if changes.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .expect("condition not reached in time");
}
