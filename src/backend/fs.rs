use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::Backend;
use crate::codec::CANONICAL_FORMAT;
use crate::error::{Result, StorageError};
use crate::item::Item;

const SIDECAR_EXT: &str = "meta";

/// One canonical image file per identifier: `<root>/<id>.webp`.
///
/// The remaining record fields live next to it in `<root>/<id>.meta`. Both
/// files are staged first; the image is renamed in last and a failed image
/// rename puts the previous sidecar back, so a failed `put` leaves the old
/// record (or nothing) behind.
/// `put`, `delete` and `exists` serialize on a single lock.
#[derive(Debug)]
pub struct FileSystemBackend {
    root: PathBuf,
    lock: Mutex<()>,
}

#[derive(Serialize, Deserialize)]
struct Sidecar {
    width: u32,
    height: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(rename = "ip", default)]
    source_ip: String,
    #[serde(rename = "ua", default)]
    source_agent: String,
    #[serde(rename = "data", default, with = "serde_bytes")]
    metadata_raw: Option<Vec<u8>>,
}

impl FileSystemBackend {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn image_path(&self, id: &str) -> Result<PathBuf> {
        self.resolve_path(id, CANONICAL_FORMAT.extension())
    }

    fn sidecar_path(&self, id: &str) -> Result<PathBuf> {
        self.resolve_path(id, SIDECAR_EXT)
    }

    fn resolve_path(&self, id: &str, ext: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\', '\0']) || id.starts_with('.') {
            return Err(StorageError::InvalidIdentifier(id.to_string()));
        }
        Ok(self.root.join(format!("{id}.{ext}")))
    }
}

/// Writes `data` next to `path` under a unique temp name and returns it.
fn write_temp(path: &Path, data: &[u8]) -> Result<PathBuf> {
    let tmp_path = path.with_extension(format!("{}.tmp", ulid::Ulid::new()));
    if let Err(err) = fs::write(&tmp_path, data) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(tmp_path)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = write_temp(path, data)?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn remove_optional(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

impl Backend for FileSystemBackend {
    fn put(&self, id: &str, item: &Item) -> Result<()> {
        let image_path = self.image_path(id)?;
        let sidecar_path = self.sidecar_path(id)?;
        let sidecar = Sidecar {
            width: item.width,
            height: item.height,
            created_at: item.created_at,
            updated_at: item.updated_at,
            source_ip: item.source_ip.clone(),
            source_agent: item.source_agent.clone(),
            metadata_raw: item.metadata_raw.clone(),
        };
        let sidecar = rmp_serde::to_vec_named(&sidecar)?;

        let _guard = self.lock.lock();
        let previous = read_optional(&sidecar_path)?;
        let sidecar_tmp = write_temp(&sidecar_path, &sidecar)?;
        let image_tmp = match write_temp(&image_path, &item.image) {
            Ok(path) => path,
            Err(err) => {
                let _ = fs::remove_file(&sidecar_tmp);
                return Err(err);
            }
        };
        if let Err(err) = fs::rename(&sidecar_tmp, &sidecar_path) {
            let _ = fs::remove_file(&sidecar_tmp);
            let _ = fs::remove_file(&image_tmp);
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&image_tmp, &image_path) {
            let _ = fs::remove_file(&image_tmp);
            // put the old sidecar back so the stored record stays consistent
            let restored = match previous {
                Some(previous) => write_atomic(&sidecar_path, &previous),
                None => remove_optional(&sidecar_path),
            };
            if let Err(restore_err) = restored {
                tracing::error!("restoring sidecar for {} failed: {}", id, restore_err);
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Item>> {
        let Some(image) = read_optional(&self.image_path(id)?)? else {
            return Ok(None);
        };
        let Some(sidecar) = read_optional(&self.sidecar_path(id)?)? else {
            return Ok(None);
        };
        let sidecar: Sidecar = rmp_serde::from_slice(&sidecar)?;
        Ok(Some(Item {
            id: id.to_string(),
            width: sidecar.width,
            height: sidecar.height,
            created_at: sidecar.created_at,
            updated_at: sidecar.updated_at,
            source_ip: sidecar.source_ip,
            source_agent: sidecar.source_agent,
            image,
            metadata_raw: sidecar.metadata_raw,
        }))
    }

    fn exists(&self, id: &str) -> Result<bool> {
        let path = self.image_path(id)?;
        let _guard = self.lock.lock();
        match fs::metadata(path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, id: &str) -> Result<()> {
        let image_path = self.image_path(id)?;
        let sidecar_path = self.sidecar_path(id)?;
        let _guard = self.lock.lock();
        remove_optional(&image_path)?;
        remove_optional(&sidecar_path)
    }

    fn list_by_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
        Err(StorageError::ListingUnsupported(self.kind()))
    }

    fn kind(&self) -> &'static str {
        "filesystem"
    }
}
