use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StorageError};

/// The durable record persisted per identifier.
///
/// Field names are kept short on the wire since every record is stored
/// as named MessagePack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "ip", default)]
    pub source_ip: String,
    #[serde(rename = "ua", default)]
    pub source_agent: String,
    /// Canonical (lossless WebP) encoding of the image.
    #[serde(rename = "file", with = "serde_bytes")]
    pub image: Vec<u8>,
    #[serde(rename = "data", default, with = "serde_bytes")]
    pub metadata_raw: Option<Vec<u8>>,
}

/// Public view of an [`Item`]: no image bytes, no provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemMeta {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub data: Option<Value>,
}

/// Where an upload came from.
#[derive(Debug, Clone, Default)]
pub struct Source {
    pub ip: String,
    pub agent: String,
}

/// Encodes caller metadata. Only JSON objects are accepted.
pub fn encode_metadata(metadata: &Value) -> Result<Vec<u8>> {
    if !metadata.is_object() {
        return Err(StorageError::InvalidMetadata(
            "metadata must be a JSON object".to_string(),
        ));
    }
    rmp_serde::to_vec_named(metadata).map_err(|err| StorageError::InvalidMetadata(err.to_string()))
}

pub fn decode_metadata(raw: &[u8]) -> Result<Value> {
    Ok(rmp_serde::from_slice(raw)?)
}

impl Item {
    pub fn metadata(&self) -> Result<Option<Value>> {
        self.metadata_raw.as_deref().map(decode_metadata).transpose()
    }

    pub fn to_meta(&self) -> Result<ItemMeta> {
        Ok(ItemMeta {
            id: self.id.clone(),
            width: self.width,
            height: self.height,
            created_at: self.created_at,
            updated_at: self.updated_at,
            data: self.metadata()?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
