use std::fs;
use std::path::{Path, PathBuf};

use pb_core::{decode_str, encode_string, RuleTree};
use pb_runtime::{Config, FileStorage, PersistenceBridge};

/// Everything a command needs to reach the stored tree.
pub struct Store {
    pub config: Config,
    pub dir: PathBuf,
    pub storage: FileStorage,
}

impl Store {
    /// Open the storage directory named by `--store-dir`, or the configured one.
    pub fn open(config: Config, store_dir: Option<&Path>) -> Result<Self, String> {
        let dir = store_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config.storage_dir());
        let storage = FileStorage::open(&dir)
            .map_err(|e| format!("Failed to open store '{}': {}", dir.display(), e))?;
        log::debug!("Using store at {}", dir.display());
        Ok(Self { config, dir, storage })
    }

    pub fn bridge(&self) -> PersistenceBridge<FileStorage> {
        PersistenceBridge::with_key(self.storage.clone(), self.config.storage.key.clone())
    }
}

pub fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start tokio runtime: {}", e))
}

/// Read a document file of either schema version.
pub fn read_document(path: &Path) -> Result<RuleTree, String> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    decode_str(&text).map_err(|e| format!("Invalid document '{}': {}", path.display(), e))
}

pub fn write_document(path: &Path, tree: &RuleTree) -> Result<(), String> {
    let text = encode_string(tree).map_err(|e| format!("Failed to encode rule tree: {}", e))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
    }
    fs::write(path, text).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))
}
