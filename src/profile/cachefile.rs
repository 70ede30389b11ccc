use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dns::FakeIpState;

use super::SelectionStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CacheData {
    #[serde(default)]
    selected: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fake_ip: Option<FakeIpState>,
}

/// JSON-backed [`SelectionStore`], rewritten on every change
#[derive(Debug)]
pub struct CacheFile {
    path: Option<PathBuf>,
    /// `None` while the on-disk cache is unreadable and nothing was written since
    data: Mutex<Option<CacheData>>,
}

impl CacheFile {
    /// Load the cache at `path`. A missing file starts empty; a corrupt one
    /// is reported as unreadable until the next write replaces it.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<CacheData>(&bytes) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!("[CacheFile] {} is corrupt: {}", path.display(), e);
                    None
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Some(CacheData::default()),
            Err(e) => {
                warn!("[CacheFile] can't read {}: {}", path.display(), e);
                None
            }
        };

        Self {
            path: Some(path),
            data: Mutex::new(data),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(Some(CacheData::default())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn update(&self, f: impl FnOnce(&mut CacheData)) {
        let mut guard = self.data.lock();
        let data = guard.get_or_insert_with(CacheData::default);
        f(data);

        if let Some(path) = &self.path {
            if let Err(e) = write_atomic(path, data) {
                warn!("[CacheFile] can't write {}: {}", path.display(), e);
            }
        }
    }
}

fn write_atomic(path: &Path, data: &CacheData) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(data)?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    debug!("[CacheFile] saved {}", path.display());
    Ok(())
}

impl SelectionStore for CacheFile {
    fn selected_map(&self) -> Option<HashMap<String, String>> {
        self.data.lock().as_ref().map(|d| d.selected.clone())
    }

    fn set_selected(&self, group: &str, selected: &str) {
        self.update(|d| {
            d.selected.insert(group.to_string(), selected.to_string());
        });
    }

    fn fake_ip_state(&self) -> Option<FakeIpState> {
        self.data.lock().as_ref().and_then(|d| d.fake_ip.clone())
    }

    fn store_fake_ip_state(&self, state: FakeIpState) {
        self.update(|d| d.fake_ip = Some(state));
    }
}
