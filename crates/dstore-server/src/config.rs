use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dstore_engine::{CollectionConfig, ExportConfig};
use dstore_store::{LiveObjectStore, ObjectStore};
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Object store backend selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    S3 {
        bucket: String,
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
    },
    Local {
        root: PathBuf,
    },
    Memory,
}

impl StoreConfig {
    pub fn connect(&self) -> ServerResult<Arc<dyn ObjectStore>> {
        let store = match self {
            Self::S3 {
                bucket,
                region,
                endpoint,
            } => LiveObjectStore::s3(bucket, region, endpoint.as_deref())?,
            Self::Local { root } => LiveObjectStore::local(root)?,
            Self::Memory => LiveObjectStore::in_memory(),
        };
        Ok(Arc::new(store))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Fetch workers per bulk export.
    pub workers: usize,
    /// System code reported by the health endpoint.
    pub system_code: String,
    /// Key probed by the health and good-to-go checks.
    pub health_key: String,
    pub store: StoreConfig,
    pub collections: Vec<CollectionConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            workers: ExportConfig::DEFAULT_WORKERS,
            system_code: "dstore".to_string(),
            health_key: "__health".to_string(),
            store: StoreConfig::Memory,
            collections: vec![
                CollectionConfig::new("content", "content", true),
                CollectionConfig::new("concept", "concepts", false),
                CollectionConfig::new("generic", "generic", false),
            ],
        }
    }
}

impl ServerConfig {
    pub fn from_toml(text: &str) -> ServerResult<Self> {
        toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn export_config(&self) -> ExportConfig {
        ExportConfig::default().with_workers(self.workers)
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionConfig> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn collection_mut(&mut self, name: &str) -> Option<&mut CollectionConfig> {
        self.collections.iter_mut().find(|c| c.name == name)
    }

    /// Reject configurations that would mount two collections on one path or
    /// let two collections share a bucket prefix.
    pub fn validate(&self) -> ServerResult<()> {
        for (i, a) in self.collections.iter().enumerate() {
            for b in &self.collections[i + 1..] {
                if a.route() == b.route() {
                    return Err(ServerError::Config(format!(
                        "collections {} and {} share the path /{}",
                        a.name,
                        b.name,
                        a.route()
                    )));
                }
                if prefixes_overlap(&a.prefix, &b.prefix) {
                    return Err(ServerError::Config(format!(
                        "collections {} and {} have overlapping prefixes {:?} and {:?}",
                        a.name, b.name, a.prefix, b.prefix
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Whether one prefix lists the objects of the other. The empty prefix
/// covers the whole bucket.
fn prefixes_overlap(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim_matches('/'), b.trim_matches('/'));
    let nested = |outer: &str, inner: &str| {
        outer.is_empty() || inner.strip_prefix(outer).is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    };
    nested(a, b) || nested(b, a)
}
