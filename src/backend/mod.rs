pub mod fs;
pub mod ordered;

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::item::Item;

pub use fs::FileSystemBackend;
pub use ordered::OrderedStoreBackend;

/// Key-value persistence underneath [`crate::Storage`].
///
/// Absence is never an error: `get` yields `None` and `exists` yields `false`.
pub trait Backend: Send + Sync {
    fn put(&self, id: &str, item: &Item) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<Item>>;

    fn exists(&self, id: &str) -> Result<bool>;

    /// Deleting an absent key succeeds.
    fn delete(&self, id: &str) -> Result<()>;

    /// Keys starting with `prefix`, in ascending byte order.
    fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    fn kind(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub enum BackendConfig {
    FileSystem { root: PathBuf },
    Ordered { path: PathBuf, key_prefix: String },
}

pub fn open_backend(config: &BackendConfig) -> Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match config {
        BackendConfig::FileSystem { root } => Arc::new(FileSystemBackend::new(root.clone())?),
        BackendConfig::Ordered { path, key_prefix } => {
            Arc::new(OrderedStoreBackend::open(path, key_prefix.clone())?)
        }
    };
    tracing::info!("opened {} backend", backend.kind());
    Ok(backend)
}
