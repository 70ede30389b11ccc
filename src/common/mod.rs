//! Common types shared by adapters, the dialer and the reconciler
//!
//! - Stream: unified async I/O abstraction
//! - Metadata: connection context for routing and dialing
//! - Address: network address representation

mod address;
mod metadata;
mod stream;

pub use address::Address;
pub use metadata::{Metadata, Network};
pub use stream::{AsyncReadWrite, NopStream, Stream};

pub use crate::error::{Error, Result};
