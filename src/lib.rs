//! Waypoint - control and addressing core of a policy-routed proxy engine
//!
//! # Architecture
//!
//! ```text
//! config file ─parse→ Config ─apply→ Executor ─swap→ LiveState
//!                                                    ├── Tunnel (proxies, rules, mode)
//!                                                    ├── ResolverState (resolver, fake-ip)
//!                                                    └── Dialer (interface, routing mark)
//! ```
//!
//! ## Core Principles
//!
//! - Adapters share one base and compose into selector groups
//! - Every connection carries the chain of adapters it went through
//! - Live state is replaced a piece at a time, never mutated in place
//! - Listeners, DNS server and the profile store sit behind traits
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Core types: Stream, Metadata, Address
//! ├── adapter/         # Outbound adapters, chains, packet bridging
//! ├── dialer/          # Socket creation, interface binding
//! ├── iface/           # Interface address cache
//! ├── dns/             # Resolver, fake-ip pool, DNS server slot
//! ├── listener/        # Inbound settings and listener manager
//! ├── profile/         # Persisted selections and fake-ip state
//! ├── config/          # Parsing and validation
//! └── app/             # Tunnel, live state, reconciler, control API
//! ```

// Core types
pub mod common;
pub mod error;

// Outbound side
pub mod adapter;
pub mod dialer;
pub mod iface;

// Policy and state
pub mod app;
pub mod auth;
pub mod config;
pub mod dns;
pub mod listener;
pub mod log;
pub mod profile;
pub mod rules;

// Re-exports for convenience
pub use adapter::{Proxy, ProxyAdapter};
pub use app::{Executor, LiveState, ReconfigScope};
pub use common::{Address, Metadata, Network, Stream};
pub use config::Config;
pub use error::{Error, Result};
