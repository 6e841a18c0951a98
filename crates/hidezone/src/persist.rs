//! Key/value persistence for session state.
//!
//! Values are opaque JSON text; the session decides what goes under which key.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const KEY_QUESTIONS: &str = "questions";
pub const KEY_SETTINGS: &str = "settings";
pub const KEY_DISABLED_STATIONS: &str = "disabledStations";
pub const KEY_BASE_AREA: &str = "baseArea";

pub trait Persistence {
    fn load(&self, key: &str) -> Option<String>;
    fn save(&mut self, key: &str, value: &str) -> io::Result<()>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryPersistence {
    entries: HashMap<String, String>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn save(&mut self, key: &str, value: &str) -> io::Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One `<key>.json` file per key inside `root`.
#[derive(Clone, Debug)]
pub struct DirPersistence {
    root: PathBuf,
}

impl DirPersistence {
    /// Creates `root` if it does not exist yet.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl Persistence for DirPersistence {
    fn load(&self, key: &str) -> Option<String> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(s) => Some(s),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "persist_load_failed");
                None
            }
        }
    }

    fn save(&mut self, key: &str, value: &str) -> io::Result<()> {
        // Readers never see a partially written file.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)
    }
}
