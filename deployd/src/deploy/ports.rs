//! Port allocation for published deployments

use std::collections::{BTreeSet, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::errors::OrchestratorError;

/// Inclusive-exclusive port range `[base, base + count)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub base: u16,
    pub count: u16,
}

impl PortRange {
    pub fn new(base: u16, count: u16) -> Result<Self, OrchestratorError> {
        if count == 0 {
            return Err(OrchestratorError::ConfigError(
                "port range must contain at least one port".to_string(),
            ));
        }
        if base as u32 + count as u32 > u16::MAX as u32 + 1 {
            return Err(OrchestratorError::ConfigError(format!(
                "port range {}+{} exceeds 65535",
                base, count
            )));
        }
        Ok(Self { base, count })
    }

    /// One past the last port, widened so the range may end at 65535
    pub fn end(&self) -> u32 {
        self.base as u32 + self.count as u32
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.base && (port as u32) < self.end()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        (self.base as u32..self.end()).map(|p| p as u16)
    }
}

/// Observes host-level port usage
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Whether the port can currently be bound on this host
    fn is_bindable(&self, port: u16) -> bool;

    /// Whether something accepts TCP connections on the port
    async fn is_listening(&self, port: u16) -> bool;
}

/// Probe backed by real sockets
pub struct TcpPortProbe {
    bind_addr: IpAddr,
    connect_addr: IpAddr,
    connect_timeout: Duration,
}

impl TcpPortProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            connect_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            connect_timeout,
        }
    }
}

#[async_trait]
impl PortProbe for TcpPortProbe {
    fn is_bindable(&self, port: u16) -> bool {
        std::net::TcpListener::bind(SocketAddr::new(self.bind_addr, port)).is_ok()
    }

    async fn is_listening(&self, port: u16) -> bool {
        let addr = SocketAddr::new(self.connect_addr, port);
        matches!(
            tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

/// Hands out ports from a fixed range.
///
/// The scan-and-reserve step runs under a single lock, so concurrent callers
/// never receive the same port.
pub struct PortAllocator {
    range: PortRange,
    probe: Arc<dyn PortProbe>,
    reserved: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    pub fn new(range: PortRange, probe: Arc<dyn PortProbe>) -> Self {
        Self {
            range,
            probe,
            reserved: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Reserve the lowest port that is neither reserved, listed in `held`,
    /// nor bound by another process on the host.
    pub fn allocate(&self, held: &HashSet<u16>) -> Result<u16, OrchestratorError> {
        let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());

        for port in self.range.iter() {
            if reserved.contains(&port) || held.contains(&port) {
                continue;
            }
            if !self.probe.is_bindable(port) {
                debug!("Port {} is bound outside the orchestrator, skipping", port);
                continue;
            }
            reserved.insert(port);
            debug!("Reserved port {}", port);
            return Ok(port);
        }

        Err(OrchestratorError::NoFreePort {
            base: self.range.base,
            end: self.range.end(),
        })
    }

    /// Mark a port as taken without probing it (used when restoring records).
    /// Returns false if it was already reserved.
    pub fn reserve(&self, port: u16) -> bool {
        let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        reserved.insert(port)
    }

    /// Return a port to the pool. Idempotent.
    pub fn release(&self, port: u16) {
        let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        if reserved.remove(&port) {
            debug!("Released port {}", port);
        }
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        let reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        reserved.contains(&port)
    }

    /// Snapshot of reserved ports in ascending order
    pub fn reserved(&self) -> Vec<u16> {
        let reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        reserved.iter().copied().collect()
    }
}
