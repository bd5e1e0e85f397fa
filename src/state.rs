use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ServerConfig;
use crate::core::realtime::{OpenAIRealtimeFactory, RealtimeConfig, RealtimeFactory};

/// Why a relay connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    /// The server-wide session cap is reached
    GlobalLimitReached,
    /// The per-IP session cap is reached
    PerIpLimitReached,
}

/// Application state shared by every handler
pub struct AppState {
    pub config: ServerConfig,
    /// Builds one upstream provider per relay session
    pub realtime_factory: Arc<dyn RealtimeFactory>,

    // Connection tracking
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_factory(config, Arc::new(OpenAIRealtimeFactory))
    }

    /// Build state around a custom upstream factory.
    pub fn with_factory(config: ServerConfig, realtime_factory: Arc<dyn RealtimeFactory>) -> Arc<Self> {
        if config.openai_api_key.is_none() {
            tracing::warn!("OPENAI_API_KEY is not set; relay sessions will fail to connect upstream");
        }

        Arc::new(Self {
            config,
            realtime_factory,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Upstream settings shared by every relay session.
    pub fn realtime_config(&self) -> RealtimeConfig {
        self.config.realtime_config()
    }

    // =========================================================================
    // Connection tracking
    // =========================================================================

    /// Reserve a relay slot for `ip`.
    ///
    /// Both counters are only incremented when both limits allow it.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        // The per-IP entry guard serializes acquisitions from the same address.
        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_connections_per_ip {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }

        match self.config.max_websocket_connections {
            Some(max) => {
                let acquired = self
                    .ws_connections
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                        (current < max).then_some(current + 1)
                    });
                if acquired.is_err() {
                    drop(per_ip);
                    self.ip_connections.remove_if(&ip, |_, count| *count == 0);
                    return Err(ConnectionLimitError::GlobalLimitReached);
                }
            }
            None => {
                self.ws_connections.fetch_add(1, Ordering::AcqRel);
            }
        }

        *per_ip += 1;
        Ok(())
    }

    /// Release a slot taken by [`try_acquire_connection`](Self::try_acquire_connection).
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });

        let emptied = match self.ip_connections.get_mut(&ip) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if emptied {
            self.ip_connections.remove_if(&ip, |_, count| *count == 0);
        }
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|c| *c).unwrap_or(0)
    }
}
