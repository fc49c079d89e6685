pub mod api;
pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod id;
pub mod item;
pub mod secret;
pub mod storage;

pub use backend::{Backend, BackendConfig, open_backend};
pub use error::{Result, StorageError};
pub use item::{Item, ItemMeta, Source};
pub use storage::{Fetched, Storage};
