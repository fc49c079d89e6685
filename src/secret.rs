use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use rand::RngCore;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

const SECRET_KEY: &str = "secret";
const SECRET_BYTES: usize = 0x16;

pub fn compute_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Admin secret gate. Only the SHA-256 digest of the secret is kept.
#[derive(Clone)]
pub struct AdminSecret {
    hashed: String,
}

impl AdminSecret {
    pub fn from_plain(secret: &str) -> Self {
        Self {
            hashed: compute_hash(secret),
        }
    }

    /// Reads `{"secret": "..."}` from `path`, generating and writing a random
    /// secret first if the file or the key is missing.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .with_context(|| format!("open secret file {}", path.display()))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let mut key_data: Map<String, Value> = if contents.trim().is_empty() {
            Map::new()
        } else {
            serde_json::from_str(&contents)
                .with_context(|| format!("parse secret file {}", path.display()))?
        };

        if let Some(secret) = key_data.get(SECRET_KEY) {
            let secret = secret
                .as_str()
                .ok_or_else(|| anyhow!("\"{SECRET_KEY}\" in {} is not a string", path.display()))?;
            return Ok(Self::from_plain(secret));
        }

        let mut random = [0u8; SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut random);
        let secret = hex::encode(random);
        key_data.insert(SECRET_KEY.to_string(), Value::String(secret.clone()));

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&serde_json::to_vec(&key_data)?)?;
        tracing::info!("generated admin secret in {}", path.display());
        Ok(Self::from_plain(&secret))
    }

    pub fn verify(&self, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }
        compute_hash(candidate) == self.hashed
    }
}
