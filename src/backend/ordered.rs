use std::path::Path;

use redb::{Database, TableDefinition};

use super::Backend;
use crate::error::Result;
use crate::item::Item;

const ITEMS: TableDefinition<&str, &[u8]> = TableDefinition::new("items");

/// Default tag in front of every key, so several logical tables can share a
/// single database file.
pub const DEFAULT_KEY_PREFIX: &str = "data:";

/// Items encoded as MessagePack in one embedded ordered table.
///
/// The database is opened once and shared by every caller; each operation
/// runs in its own short read or write transaction.
pub struct OrderedStoreBackend {
    db: Database,
    key_prefix: String,
}

impl OrderedStoreBackend {
    pub fn open(path: &Path, key_prefix: String) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(ITEMS)?;
        txn.commit()?;

        Ok(Self { db, key_prefix })
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id)
    }
}

impl Backend for OrderedStoreBackend {
    fn put(&self, id: &str, item: &Item) -> Result<()> {
        let value = item.to_bytes()?;
        let key = self.key(id);
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ITEMS)?;
            table.insert(key.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Item>> {
        let key = self.key(id);
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ITEMS)?;
        let item = match table.get(key.as_str())? {
            Some(value) => Some(Item::from_bytes(value.value())?),
            None => None,
        };
        Ok(item)
    }

    fn exists(&self, id: &str) -> Result<bool> {
        let key = self.key(id);
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ITEMS)?;
        let found = table.get(key.as_str())?.is_some();
        Ok(found)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let key = self.key(id);
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ITEMS)?;
            table.remove(key.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let start = self.key(prefix);
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ITEMS)?;

        let mut keys = Vec::new();
        for entry in table.range(start.as_str()..)? {
            let (key, _) = entry?;
            let key = key.value();
            if !key.starts_with(start.as_str()) {
                break;
            }
            keys.push(key[self.key_prefix.len()..].to_string());
        }
        Ok(keys)
    }

    fn kind(&self) -> &'static str {
        "ordered"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(id: &str) -> Item {
        let now = Utc::now();
        Item {
            id: id.to_string(),
            width: 1,
            height: 1,
            created_at: now,
            updated_at: now,
            source_ip: String::new(),
            source_agent: String::new(),
            image: vec![1, 2, 3],
            metadata_raw: None,
        }
    }

    fn open(dir: &tempfile::TempDir, key_prefix: &str) -> OrderedStoreBackend {
        OrderedStoreBackend::open(&dir.path().join("db/kis.redb"), key_prefix.to_string()).unwrap()
    }

    #[test]
    fn test_ordered_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(&dir, DEFAULT_KEY_PREFIX);

        assert!(backend.get("missing").unwrap().is_none());
        assert!(!backend.exists("missing").unwrap());

        backend.put("abc", &item("abc")).unwrap();
        assert!(backend.exists("abc").unwrap());
        assert_eq!(backend.get("abc").unwrap().unwrap().image, vec![1, 2, 3]);

        backend.delete("abc").unwrap();
        assert!(!backend.exists("abc").unwrap());
        backend.delete("abc").unwrap();
    }

    #[test]
    fn test_ordered_backend_lists_in_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(&dir, DEFAULT_KEY_PREFIX);
        for id in ["b:2", "a:9", "b:1", "c:0", "a:1"] {
            backend.put(id, &item(id)).unwrap();
        }

        assert_eq!(backend.list_by_prefix("").unwrap(), vec!["a:1", "a:9", "b:1", "b:2", "c:0"]);
        assert_eq!(backend.list_by_prefix("b:").unwrap(), vec!["b:1", "b:2"]);
        assert!(backend.list_by_prefix("d:").unwrap().is_empty());
    }

    #[test]
    fn test_ordered_backend_key_prefixes_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        {
            let images = open(&dir, "data:");
            images.put("x", &item("x")).unwrap();
        }
        let other = open(&dir, "other:");
        assert!(!other.exists("x").unwrap());
        assert!(other.list_by_prefix("").unwrap().is_empty());
        drop(other);

        let reopened = open(&dir, "data:");
        assert_eq!(reopened.list_by_prefix("").unwrap(), vec!["x"]);
    }
}
