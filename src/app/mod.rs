//! Application Layer
//!
//! This module contains:
//! - Tunnel: live proxy, rule and mode tables
//! - State: the shared live-state handle
//! - Executor: configuration reconciliation
//! - Api: HTTP control and Prometheus endpoints

pub mod api;
mod executor;
pub mod metrics;
mod state;
mod tunnel;

pub use executor::{Executor, GeneralSnapshot, ReconfigScope};
pub use state::{LiveState, ResolverState};
pub use tunnel::{InboundQueues, ProviderTable, ProxyTable, Tunnel};
