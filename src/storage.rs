use std::io::Read;
use std::sync::Arc;

use chrono::Utc;
use image::GenericImageView;
use serde_json::Value;

use crate::backend::Backend;
use crate::codec::{self, CANONICAL_FORMAT, ImageFormat};
use crate::error::Result;
use crate::id::{IdGenerator, NAMESPACE_SEPARATOR};
use crate::item::{Item, ItemMeta, Source, encode_metadata};

/// An encoded image ready to be served.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

/// Public storage API over one backend chosen at construction.
pub struct Storage {
    backend: Arc<dyn Backend>,
    ids: IdGenerator,
}

impl Storage {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            ids: IdGenerator::new(),
        }
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Returns an identifier that does not exist in the backend yet.
    pub fn generate_id(&self, namespace: Option<&str>) -> Result<String> {
        loop {
            let id = self.ids.generate(namespace)?;
            if !self.backend.exists(&id)? {
                return Ok(id);
            }
            tracing::warn!("generated id {} already exists, retrying", id);
        }
    }

    pub fn save<R: Read>(&self, id: &str, reader: R, metadata: Option<&Value>) -> Result<()> {
        self.save_with_source(id, reader, metadata, &Source::default())
    }

    pub fn save_with_source<R: Read>(
        &self,
        id: &str,
        mut reader: R,
        metadata: Option<&Value>,
        source: &Source,
    ) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        let (image, canonical) = codec::canonicalize(&data)?;
        let metadata_raw = metadata.map(encode_metadata).transpose()?;
        let (width, height) = image.dimensions();

        let now = Utc::now();
        let created_at = match self.backend.get(id)? {
            Some(previous) => previous.created_at,
            None => now,
        };
        let item = Item {
            id: id.to_string(),
            width,
            height,
            created_at,
            updated_at: now,
            source_ip: source.ip.clone(),
            source_agent: source.agent.clone(),
            image: canonical,
            metadata_raw,
        };
        self.backend.put(id, &item)?;
        tracing::debug!("saved {} ({}x{}, {} bytes)", id, width, height, item.image.len());
        Ok(())
    }

    /// Loads `id` and encodes it for `extension` (".png", ".gif", ".jpg",
    /// ".webp" or "" for JPEG). `None` when the id does not exist.
    pub fn fetch(&self, id: &str, extension: &str) -> Result<Option<Fetched>> {
        let Some(item) = self.backend.get(id)? else {
            return Ok(None);
        };
        let format = ImageFormat::from_extension(extension)?;
        if format == CANONICAL_FORMAT {
            return Ok(Some(Fetched {
                bytes: item.image,
                mime_type: format.mime_type(),
            }));
        }

        let image = codec::decode(&item.image, CANONICAL_FORMAT)?;
        let bytes = codec::encode(&image, format)?;
        Ok(Some(Fetched {
            bytes,
            mime_type: format.mime_type(),
        }))
    }

    pub fn read_metadata(&self, id: &str) -> Result<Option<ItemMeta>> {
        self.backend
            .get(id)?
            .map(|item| item.to_meta())
            .transpose()
    }

    /// Lists identifiers in key order whose key starts with the prefixes
    /// joined by `:`. This is a raw string prefix: `["tenantA"]` also matches
    /// `tenantAB:*`, pass `["tenantA:"]` to stay inside one namespace.
    pub fn keys(&self, prefixes: &[&str]) -> Result<Vec<String>> {
        let separator = NAMESPACE_SEPARATOR.to_string();
        let prefix = prefixes.join(separator.as_str());
        self.backend.list_by_prefix(&prefix)
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        self.backend.exists(id)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        self.backend.delete(id)?;
        tracing::debug!("removed {}", id);
        Ok(())
    }
}
