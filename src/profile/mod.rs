//! Persisted profile state: selected group members and fake-IP allocations

mod cachefile;

pub use cachefile::CacheFile;

use std::collections::HashMap;

use crate::dns::FakeIpState;

pub trait SelectionStore: Send + Sync {
    /// Group name to chosen member; `None` when the store is unreadable.
    fn selected_map(&self) -> Option<HashMap<String, String>>;

    fn set_selected(&self, group: &str, selected: &str);

    fn fake_ip_state(&self) -> Option<FakeIpState>;

    fn store_fake_ip_state(&self, state: FakeIpState);
}
