//! Read-mostly interface cache
//!
//! A generation is an immutable map published through `ArcSwapOption`;
//! readers racing a flush see the old or the new generation, never a mix.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use tracing::debug;

use crate::error::{Error, Result};

use super::{Interface, InterfaceSource, SystemInterfaces};

const DEFAULT_TTL: Duration = Duration::from_secs(20);

struct Generation {
    loaded_at: Instant,
    interfaces: HashMap<String, Arc<Interface>>,
}

pub struct InterfaceCache {
    source: Arc<dyn InterfaceSource>,
    ttl: Duration,
    current: ArcSwapOption<Generation>,
}

impl InterfaceCache {
    pub fn new(source: Arc<dyn InterfaceSource>) -> Self {
        Self {
            source,
            ttl: DEFAULT_TTL,
            current: ArcSwapOption::empty(),
        }
    }

    /// Cache backed by the host's interface table
    pub fn system() -> Self {
        Self::new(Arc::new(SystemInterfaces))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<Interface>> {
        self.generation()?
            .interfaces
            .get(name)
            .cloned()
            .ok_or_else(|| Error::InterfaceNotFound(name.to_string()))
    }

    pub fn interfaces(&self) -> Result<Vec<Arc<Interface>>> {
        Ok(self.generation()?.interfaces.values().cloned().collect())
    }

    /// Drop the current generation; the next lookup re-enumerates.
    pub fn flush(&self) {
        self.current.store(None);
    }

    fn generation(&self) -> Result<Arc<Generation>> {
        if let Some(generation) = self.current.load_full() {
            if generation.loaded_at.elapsed() < self.ttl {
                return Ok(generation);
            }
        }

        let interfaces = self
            .source
            .interfaces()?
            .into_iter()
            .map(|iface| (iface.name.clone(), Arc::new(iface)))
            .collect::<HashMap<_, _>>();
        debug!("[Iface] enumerated {} interfaces", interfaces.len());

        let generation = Arc::new(Generation {
            loaded_at: Instant::now(),
            interfaces,
        });
        self.current.store(Some(generation.clone()));
        Ok(generation)
    }
}

impl Default for InterfaceCache {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    impl InterfaceSource for CountingSource {
        fn interfaces(&self) -> io::Result<Vec<Interface>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Interface::new(
                1,
                "eth0",
                vec![format!("10.0.0.{}/24", n + 1).parse().unwrap()],
            )])
        }
    }

    #[test]
    fn test_cache_hit_until_flush() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0) });
        let cache = InterfaceCache::new(source.clone());

        let first = cache.resolve("eth0").unwrap();
        let second = cache.resolve("eth0").unwrap();
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        cache.flush();
        let third = cache.resolve("eth0").unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_ne!(first.addrs, third.addrs);
    }

    #[test]
    fn test_unknown_interface() {
        let cache = InterfaceCache::new(Arc::new(super::super::StaticInterfaces::default()));
        assert!(matches!(cache.resolve("nope0"), Err(Error::InterfaceNotFound(name)) if name == "nope0"));
    }

    #[test]
    fn test_expired_generation_reloads() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0) });
        let cache = InterfaceCache::new(source.clone()).with_ttl(Duration::ZERO);

        cache.resolve("eth0").unwrap();
        cache.resolve("eth0").unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
