//! Parsed configuration of a bus participant and the factory turning it into a [`Backend`]
//!
//! A configuration document is a flat JSON object. The `backend` field selects the transport
//! family, the remaining fields depend on it:
//!
//! ```json
//! {
//!     "run_id": "42",
//!     "rank": 0,
//!     "worker_ids": [7, 8],
//!     "backend": "broker+blobstore",
//!     "broker": { "url": "redis://127.0.0.1:6379/" },
//!     "blob_store": { "kind": "memory", "name": "run-42" }
//! }
//! ```

use super::transport::{
    Backend, BrokerBackend, CollectiveBackend, CollectiveWorld, RpcBackend, RpcPeer,
    TransportBackend,
};
use super::{BlobStore, PayloadOffloader, Topology, DEFAULT_URL_EXPIRY_SECS};
use crate::constants::RPC_BASE_PORT;
use crate::library::communication::frame::DEFAULT_MAX_FRAME_LENGTH;
use crate::library::communication::implementation::memory::InMemoryBroker;
use crate::library::communication::implementation::redis::RedisPubSubConnector;
use crate::library::storage::{InMemoryStorageBackend, S3StorageBackend, StorageBackend};
use crate::library::BoxedError;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const MEMORY_SCHEME: &str = "memory://";
const DEFAULT_READINESS_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Errors raised while loading a configuration or constructing a backend from it
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("unable to read configuration file")]
    Io(#[from] std::io::Error),
    /// Document is not valid
    #[error("unable to parse configuration")]
    Parse(#[from] serde_json::Error),
    /// Values contradict each other
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Backend could not be constructed
    #[error("unable to construct backend")]
    Backend(#[source] BoxedError),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Identifier {
    Text(String),
    Number(i64),
}

impl From<Identifier> for String {
    fn from(identifier: Identifier) -> Self {
        match identifier {
            Identifier::Text(text) => text,
            Identifier::Number(number) => number.to_string(),
        }
    }
}

fn deserialize_identifier<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Identifier::deserialize(deserializer).map(Into::into)
}

fn deserialize_identifiers<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<String>, D::Error> {
    Vec::<Identifier>::deserialize(deserializer)
        .map(|identifiers| identifiers.into_iter().map(Into::into).collect())
}

fn default_readiness_timeout_ms() -> Option<u64> {
    Some(DEFAULT_READINESS_TIMEOUT_MS)
}

fn default_url_expiry_secs() -> u32 {
    DEFAULT_URL_EXPIRY_SECS
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_LENGTH
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

/// Configuration of one participant
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Identifier of the run, shared by all participants
    #[serde(deserialize_with = "deserialize_identifier")]
    pub run_id: String,
    /// Logical rank of this participant
    pub rank: usize,
    /// External identifiers of all workers, ordered by rank
    #[serde(default, deserialize_with = "deserialize_identifiers")]
    pub worker_ids: Vec<String>,
    /// Transport selection and settings
    #[serde(flatten)]
    pub backend: BackendConfig,
    /// Upper bound for sends waiting on inbound channels to be confirmed, `null` waits forever
    #[serde(default = "default_readiness_timeout_ms")]
    pub send_readiness_timeout_ms: Option<u64>,
}

/// Transport family and its settings
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend")]
pub enum BackendConfig {
    /// Publish/subscribe broker with payloads offloaded to a blob store
    #[serde(rename = "broker+blobstore")]
    BrokerWithBlobStore {
        /// Broker connection
        broker: BrokerConfig,
        /// Blob store connection
        blob_store: BlobStoreConfig,
    },
    /// Publish/subscribe broker with all payloads inline
    #[serde(rename = "broker")]
    Broker {
        /// Broker connection
        broker: BrokerConfig,
    },
    /// Direct TCP connections between all participants
    #[serde(rename = "rpc")]
    Rpc(RpcConfig),
    /// In-process collective world
    #[serde(rename = "collective")]
    Collective(CollectiveConfig),
}

/// Connection to a publish/subscribe broker
///
/// `redis://` URLs connect to a redis server while `memory://<name>` joins the in-process
/// broker with the given name.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Location of the broker
    pub url: String,
    /// Optional user name
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password
    #[serde(default)]
    pub password: Option<String>,
}

impl BrokerConfig {
    /// URL with the credentials embedded
    pub fn connection_url(&self) -> Result<String, ConfigError> {
        if self.username.is_none() && self.password.is_none() {
            return Ok(self.url.clone());
        }

        let (scheme, rest) = self
            .url
            .split_once("://")
            .ok_or_else(|| ConfigError::Invalid(format!("broker url {} lacks a scheme", self.url)))?;

        let username = self.username.as_deref().unwrap_or_default();
        let credentials = match &self.password {
            Some(password) => format!("{}:{}", username, password),
            None => username.to_string(),
        };

        Ok(format!("{}://{}@{}", scheme, credentials, rest))
    }
}

/// Connection to the blob store and offload policy
#[derive(Debug, Clone, Deserialize)]
pub struct BlobStoreConfig {
    /// Storage backend
    #[serde(flatten)]
    pub storage: StorageConfig,
    /// Largest serialized payload which is still sent inline
    #[serde(default)]
    pub inline_threshold_bytes: usize,
    /// Validity of retrieval links
    #[serde(default = "default_url_expiry_secs")]
    pub url_expiry_secs: u32,
}

/// Storage backend of a blob store
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    /// S3 compatible object storage
    S3 {
        /// Endpoint URL
        endpoint: String,
        /// Region name
        region: String,
        /// Pre-existing bucket
        bucket: String,
        /// Access key
        access_key: String,
        /// Secret key
        secret_key: String,
        /// Whether to use path-style addressing (e.g. for minio)
        #[serde(default)]
        path_style: bool,
    },
    /// Named in-process store
    Memory {
        /// Name shared by all participants of the process
        name: String,
    },
}

impl StorageConfig {
    fn build(&self) -> Result<Arc<dyn StorageBackend + Send + Sync>, ConfigError> {
        match self {
            StorageConfig::S3 {
                endpoint,
                region,
                bucket,
                access_key,
                secret_key,
                path_style,
            } => {
                let backend = S3StorageBackend::with_static_credentials(
                    endpoint,
                    region,
                    bucket,
                    access_key,
                    secret_key,
                    *path_style,
                )
                .map_err(|e| ConfigError::Backend(e.into()))?;

                Ok(Arc::new(backend))
            }
            StorageConfig::Memory { name } => Ok(Arc::new(InMemoryStorageBackend::named(name))),
        }
    }
}

/// Location of one participant of an RPC run
#[derive(Debug, Clone, Deserialize)]
pub struct RpcPeerConfig {
    /// Logical rank
    pub id: i64,
    /// Host name or address
    pub host: String,
    /// Listening port, defaults to the base port plus the rank
    #[serde(default)]
    pub port: Option<u16>,
}

/// Settings of the RPC transport
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// All participants including the local one
    pub peers: Vec<RpcPeerConfig>,
    /// Largest accepted frame
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Upper bound for establishing a connection to a peer
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl RpcConfig {
    fn peers(&self) -> Result<Vec<RpcPeer>, ConfigError> {
        self.peers
            .iter()
            .map(|peer| {
                let port = match peer.port {
                    Some(port) => port,
                    None => u16::try_from(peer.id)
                        .ok()
                        .and_then(|id| RPC_BASE_PORT.checked_add(id))
                        .ok_or_else(|| {
                            ConfigError::Invalid(format!("no default port for peer {}", peer.id))
                        })?,
                };

                Ok(RpcPeer {
                    id: peer.id,
                    host: peer.host.clone(),
                    port,
                })
            })
            .collect()
    }
}

/// Settings of the collective transport
#[derive(Debug, Clone, Deserialize)]
pub struct CollectiveConfig {
    /// Name of the in-process world
    pub world: String,
    /// Number of ranks in the world
    pub size: usize,
}

impl BusConfig {
    /// Parses a JSON document
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(document)?)
    }

    /// Reads and parses a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let document = std::fs::read_to_string(path)?;
        Self::from_json_str(&document)
    }

    /// Layout of the run as seen from this participant
    pub fn topology(&self) -> Result<Topology, ConfigError> {
        Topology::new(self.run_id.clone(), self.rank, self.worker_ids.clone())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Upper bound for sends waiting on inbound channels
    pub fn readiness_timeout(&self) -> Option<Duration> {
        self.send_readiness_timeout_ms.map(Duration::from_millis)
    }
}

fn broker_transport(
    config: &BrokerConfig,
    topology: Topology,
) -> Result<Box<dyn TransportBackend>, ConfigError> {
    let url = config.connection_url()?;

    if let Some(name) = url.strip_prefix(MEMORY_SCHEME) {
        return Ok(Box::new(BrokerBackend::new(
            InMemoryBroker::named(name),
            topology,
        )));
    }

    let connector = RedisPubSubConnector::new(&url).map_err(ConfigError::Backend)?;
    Ok(Box::new(BrokerBackend::new(connector, topology)))
}

/// Constructs the transport described by a configuration without connecting it
///
/// This is the only place where transport families are told apart.
pub fn select_backend(config: &BusConfig) -> Result<Backend, ConfigError> {
    let topology = config.topology()?;

    let backend = match &config.backend {
        BackendConfig::BrokerWithBlobStore { broker, blob_store } => {
            let store = BlobStore::new(blob_store.storage.build()?, blob_store.url_expiry_secs);
            let offloader = PayloadOffloader::new(store, blob_store.inline_threshold_bytes);

            Backend {
                transport: broker_transport(broker, topology)?,
                offloader: Some(offloader),
            }
        }
        BackendConfig::Broker { broker } => Backend {
            transport: broker_transport(broker, topology)?,
            offloader: None,
        },
        BackendConfig::Rpc(rpc) => Backend::new(RpcBackend::new(
            &topology,
            rpc.peers()?,
            rpc.max_frame_bytes,
            Duration::from_millis(rpc.connect_timeout_ms),
        )),
        BackendConfig::Collective(collective) => {
            let world = CollectiveWorld::join(&collective.world, collective.size)
                .map_err(|e| ConfigError::Backend(e.into()))?;
            let transport = CollectiveBackend::new(config.rank, world)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;

            Backend::new(transport)
        }
    };

    info!(
        transport = backend.transport.name(),
        offload = backend.offloader.is_some(),
        rank = config.rank,
        "Selected backend"
    );

    Ok(backend)
}
