use parking_lot::Mutex;
use ulid::Generator;

use crate::error::{Result, StorageError};

/// Joins a caller namespace and an identifier into one backend key.
pub const NAMESPACE_SEPARATOR: char = ':';

/// Produces ULIDs that sort lexicographically in creation order and are
/// strictly increasing within this process, even inside one millisecond.
pub struct IdGenerator {
    inner: Mutex<Generator>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }

    /// An empty namespace is the same as none.
    pub fn generate(&self, namespace: Option<&str>) -> Result<String> {
        let ulid = self
            .inner
            .lock()
            .generate()
            .map_err(|err| StorageError::Identifier(err.to_string()))?;
        Ok(match namespace.filter(|namespace| !namespace.is_empty()) {
            Some(namespace) => format!("{namespace}{NAMESPACE_SEPARATOR}{ulid}"),
            None => ulid.to_string(),
        })
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
