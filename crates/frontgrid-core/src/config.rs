//! frontgrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontgridConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub admin: AdminConfig,
    pub consumer: ConsumerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8443,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding `frontgrid.redb`.
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/frontgrid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Tombstone lifetime for an individually deleted microfrontend.
    pub delete_expiry_minutes: u64,
    /// Tombstone lifetime for a deleted project.
    pub project_delete_expiry_secs: u64,
    /// Items per page on admin list endpoints.
    pub page_size: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            delete_expiry_minutes: 60,
            project_delete_expiry_secs: 120,
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Cookie carrying the anonymous user identifier.
    pub cookie_name: String,
    /// Extra attributes appended to `Set-Cookie`, e.g. `Path=/; Secure`.
    pub cookie_settings: Option<String>,
    /// Consumer views returned per page.
    pub page_size: usize,
    /// Origin allowed to call the consumer endpoint with credentials.
    pub allow_origin: Option<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            cookie_name: "USER_TOKEN".to_string(),
            cookie_settings: None,
            page_size: 100,
            allow_origin: None,
        }
    }
}

impl FrontgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FrontgridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Path of the redb database inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.store.data_dir.join("frontgrid.redb")
    }
}
