use std::path::PathBuf;

use serde::Deserialize;

use crate::backend::BackendConfig;
use crate::backend::ordered::DEFAULT_KEY_PREFIX;

const CONFIG_FILE: &str = "kis";
const ENV_PREFIX: &str = "KIS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Ordered,
    Filesystem,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub port: u16,
    pub backend: BackendKind,
    pub data_dir: PathBuf,
    pub key_prefix: String,
    pub secret_file: PathBuf,
    pub max_upload_bytes: usize,
}

impl Settings {
    /// Defaults, then an optional `kis.toml`, then `KIS_*` environment
    /// variables (after `.env` has been loaded).
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_file(CONFIG_FILE)
    }

    /// Layers `<config_file>.toml` (optional) over the defaults. Only TOML is
    /// read, so the `kis.json` secret file beside it is never picked up.
    pub fn from_file(config_file: &str) -> Result<Self, config::ConfigError> {
        let data_dir = default_data_dir();
        let settings = config::Config::builder()
            .set_default("port", 3000)?
            .set_default("backend", "ordered")?
            .set_default("data_dir", data_dir.to_string_lossy().to_string())?
            .set_default("key_prefix", DEFAULT_KEY_PREFIX)?
            .set_default("secret_file", "kis.json")?
            .set_default("max_upload_bytes", 50 * 1024 * 1024)?
            .add_source(config::File::new(config_file, config::FileFormat::Toml).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?;
        settings.try_deserialize()
    }

    pub fn backend_config(&self) -> BackendConfig {
        match self.backend {
            BackendKind::Ordered => BackendConfig::Ordered {
                path: self.data_dir.join("kis.redb"),
                key_prefix: self.key_prefix.clone(),
            },
            BackendKind::Filesystem => BackendConfig::FileSystem {
                root: self.data_dir.join("store"),
            },
        }
    }
}

fn default_data_dir() -> PathBuf {
    let mut base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push("kis");
    base
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn settings(backend: BackendKind) -> Settings {
        Settings {
            port: 3000,
            backend,
            data_dir: PathBuf::from("/var/lib/kis"),
            key_prefix: "data:".to_string(),
            secret_file: PathBuf::from("kis.json"),
            max_upload_bytes: 1024,
        }
    }

    #[test]
    fn test_backend_config() {
        match settings(BackendKind::Ordered).backend_config() {
            BackendConfig::Ordered { path, key_prefix } => {
                assert_eq!(path, PathBuf::from("/var/lib/kis/kis.redb"));
                assert_eq!(key_prefix, "data:");
            }
            other => panic!("unexpected {other:?}"),
        }
        match settings(BackendKind::Filesystem).backend_config() {
            BackendConfig::FileSystem { root } => {
                assert_eq!(root, PathBuf::from("/var/lib/kis/store"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_secret_json_is_not_configuration() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("kis.json"), r#"{"secret":"abc","port":9}"#).unwrap();
        let base = dir.path().join("kis");

        let loaded = Settings::from_file(base.to_str().unwrap()).unwrap();
        assert_ne!(loaded.port, 9);

        fs::write(dir.path().join("kis.toml"), "port = 8123\nbackend = \"filesystem\"\n").unwrap();
        let loaded = Settings::from_file(base.to_str().unwrap()).unwrap();
        assert_eq!(loaded.port, 8123);
        assert_eq!(loaded.backend, BackendKind::Filesystem);
    }

    #[test]
    fn test_backend_kind_names() {
        let kind: BackendKind = serde_json::from_str("\"filesystem\"").unwrap();
        assert_eq!(kind, BackendKind::Filesystem);
        let kind: BackendKind = serde_json::from_str("\"ordered\"").unwrap();
        assert_eq!(kind, BackendKind::Ordered);
    }
}
