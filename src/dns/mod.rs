//! DNS resolver, fake-IP enhancer and the listening DNS service seam
//!
//! The reconciler builds a fresh [`Resolver`] and [`Enhancer`] on every
//! apply and publishes them together with a [`LocalServer`]. The listening
//! service itself sits behind [`DnsServer`].

mod enhancer;
pub mod pool;
mod resolver;

pub use enhancer::Enhancer;
pub use pool::{FakeIpEntry, FakeIpPool, FakeIpState};
pub use resolver::{LocalServer, Resolver};

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ipnet::Ipv4Net;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnhancedMode {
    #[default]
    Normal,
    FakeIp,
    #[serde(rename = "redir-host")]
    Mapping,
}

impl fmt::Display for EnhancedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnhancedMode::Normal => write!(f, "normal"),
            EnhancedMode::FakeIp => write!(f, "fake-ip"),
            EnhancedMode::Mapping => write!(f, "redir-host"),
        }
    }
}

/// Built DNS settings
#[derive(Debug, Clone, Default)]
pub struct DnsConfig {
    pub enable: bool,
    pub ipv6: bool,
    pub listen: String,
    pub enhanced_mode: EnhancedMode,
    pub nameserver: Vec<String>,
    pub fallback: Vec<String>,
    pub default_nameserver: Vec<String>,
    /// Present only in fake-ip mode
    pub fake_ip_range: Option<Ipv4Net>,
    pub fake_ip_filter: Vec<String>,
    pub hosts: HashMap<String, IpAddr>,
    pub remote_dns_resolve: bool,
}

/// The listening DNS service
pub trait DnsServer: Send + Sync {
    /// Serve on `listen` with the given resolver pair, replacing any running instance.
    fn recreate(&self, listen: &str, resolver: Arc<Resolver>, enhancer: Arc<Enhancer>);

    fn stop(&self);
}

struct Serving {
    listen: String,
    resolver: Arc<Resolver>,
    enhancer: Arc<Enhancer>,
}

/// Holds the service's desired state for the accept loop to pick up
#[derive(Default)]
pub struct DnsServerSlot {
    serving: Mutex<Option<Serving>>,
    recreations: AtomicUsize,
}

impl DnsServerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen_addr(&self) -> Option<String> {
        self.serving.lock().as_ref().map(|s| s.listen.clone())
    }

    pub fn is_running(&self) -> bool {
        self.serving.lock().is_some()
    }

    pub fn local_server(&self) -> Option<LocalServer> {
        self.serving
            .lock()
            .as_ref()
            .map(|s| LocalServer::new(s.resolver.clone(), s.enhancer.clone()))
    }

    pub fn recreations(&self) -> usize {
        self.recreations.load(Ordering::Relaxed)
    }
}

impl DnsServer for DnsServerSlot {
    fn recreate(&self, listen: &str, resolver: Arc<Resolver>, enhancer: Arc<Enhancer>) {
        if listen.is_empty() {
            self.stop();
            return;
        }

        *self.serving.lock() = Some(Serving {
            listen: listen.to_string(),
            resolver,
            enhancer,
        });
        self.recreations.fetch_add(1, Ordering::Relaxed);
        info!("[DNS] server listening at {}", listen);
    }

    fn stop(&self) {
        if self.serving.lock().take().is_some() {
            info!("[DNS] server stopped");
        }
    }
}
