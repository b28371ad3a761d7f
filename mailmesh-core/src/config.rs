// Mailmesh configuration management.
//
// Configuration is loaded from a JSON file next to the binary, with
// environment overrides for the handful of settings that differ per node in
// containerized deployments. A missing file is not an error: defaults are
// written back so a fresh checkout produces a working single-node setup.
//
// Sources, in order of precedence:
// 1. Environment variables (MAILMESH_NODE_ID, MAILMESH_CLUSTER_NODES,
//    MAILMESH_BIND, MAILMESH_PORT)
// 2. mailmesh.json
// 3. Built-in defaults

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use mailmesh_cluster::ClusterPeer;

pub const DEFAULT_CONFIG_PATH: &str = "mailmesh.json";

/// A misconfiguration that makes the node unable to participate safely.
/// All of these are fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("node_id must not be empty")]
    EmptyNodeId,
    #[error("cluster_nodes must not be empty")]
    EmptyCluster,
    #[error("node {0} does not appear in cluster_nodes")]
    LocalNodeMissing(String),
    #[error("replication_factor must be at least 1")]
    ZeroReplicationFactor,
    #[error("healthy_interval must be non-zero")]
    ZeroHealthyInterval,
}

/// Root configuration for one coordinator node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    pub node: NodeConfig,
    pub cluster: ClusterConfig,
    pub health: HealthConfig,
    pub replication: ReplicationConfig,
    pub logging: LoggingConfig,
}

/// Identity and local binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Stable name of this node; must appear in the cluster roster.
    pub node_id: String,
    /// Interface the HTTP surface binds to.
    pub bind_address: String,
    pub port: u16,
    /// Specializations this node serves and advertises in heartbeats.
    pub specializations: Vec<String>,
}

/// Cluster roster and consensus timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Ordered roster, identical on every node. Quorum is derived from its
    /// size.
    pub nodes: Vec<ClusterPeer>,
    /// Deadline for one peer RPC.
    pub rpc_timeout: Duration,
    /// Initial backoff after a failed consensus round; doubles per attempt.
    pub retry_interval: Duration,
    pub max_consensus_attempts: u32,
}

/// Failure detector timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Scan period; a peer is stale after missing two of these.
    pub healthy_interval: Duration,
    /// Consecutive stale scans before a peer is declared failed.
    pub failure_threshold: u32,
}

/// Conversation state replication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Copies per conversation, clamped to the cluster size.
    pub replication_factor: usize,
    /// Period of the anti-entropy re-push of locally originated state.
    pub sync_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                node_id: "node-1".to_string(),
                bind_address: "0.0.0.0".to_string(),
                port: 7400,
                specializations: vec![
                    "support".to_string(),
                    "sales".to_string(),
                    "general".to_string(),
                ],
            },
            cluster: ClusterConfig {
                nodes: vec![ClusterPeer {
                    id: "node-1".to_string(),
                    address: "127.0.0.1:7400".to_string(),
                }],
                rpc_timeout: Duration::from_secs(5),
                retry_interval: Duration::from_secs(1),
                max_consensus_attempts: 3,
            },
            health: HealthConfig {
                healthy_interval: Duration::from_secs(10),
                failure_threshold: 3,
            },
            replication: ReplicationConfig {
                replication_factor: 3,
                sync_interval: Duration::from_secs(5),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl MeshConfig {
    /// Load from the default path, apply environment overrides, validate.
    pub async fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH)).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Err(_) => {
                let default_config = Self::default();
                default_config.save_to(path).await?;
                info!(path = %path.display(), "wrote default configuration");
                default_config
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(node_id) = std::env::var("MAILMESH_NODE_ID") {
            self.node.node_id = node_id;
        }
        if let Ok(bind) = std::env::var("MAILMESH_BIND") {
            self.node.bind_address = bind;
        }
        if let Ok(port) = std::env::var("MAILMESH_PORT") {
            self.node.port = port
                .parse()
                .with_context(|| format!("invalid MAILMESH_PORT: {port}"))?;
        }
        if let Ok(roster) = std::env::var("MAILMESH_CLUSTER_NODES") {
            self.cluster.nodes = parse_roster(&roster)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.node_id.trim().is_empty() {
            return Err(ConfigError::EmptyNodeId);
        }
        if self.cluster.nodes.is_empty() {
            return Err(ConfigError::EmptyCluster);
        }
        if !self.cluster.nodes.iter().any(|p| p.id == self.node.node_id) {
            return Err(ConfigError::LocalNodeMissing(self.node.node_id.clone()));
        }
        if self.replication.replication_factor == 0 {
            return Err(ConfigError::ZeroReplicationFactor);
        }
        if self.health.healthy_interval.is_zero() {
            return Err(ConfigError::ZeroHealthyInterval);
        }
        Ok(())
    }

    /// Replication factor clamped to what the roster can hold.
    pub fn effective_replication_factor(&self) -> usize {
        self.replication.replication_factor.min(self.cluster.nodes.len())
    }
}

/// Parse `id=host:port,id=host:port` roster notation used by the
/// environment override.
fn parse_roster(raw: &str) -> Result<Vec<ClusterPeer>> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let (id, address) = entry
                .trim()
                .split_once('=')
                .with_context(|| format!("malformed cluster node entry: {entry}"))?;
            Ok(ClusterPeer {
                id: id.trim().to_string(),
                address: address.trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_node_config() -> MeshConfig {
        let mut config = MeshConfig::default();
        config.node.node_id = "node-a".to_string();
        config.cluster.nodes = ["node-a", "node-b", "node-c"]
            .iter()
            .enumerate()
            .map(|(i, id)| ClusterPeer {
                id: id.to_string(),
                address: format!("127.0.0.1:{}", 7400 + i),
            })
            .collect();
        config
    }

    #[test]
    fn default_config_is_valid() {
        assert_eq!(MeshConfig::default().validate(), Ok(()));
    }

    #[test]
    fn empty_node_id_is_fatal() {
        let mut config = three_node_config();
        config.node.node_id = "  ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::EmptyNodeId));
    }

    #[test]
    fn empty_cluster_is_fatal() {
        let mut config = three_node_config();
        config.cluster.nodes.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptyCluster));
    }

    #[test]
    fn local_node_must_be_in_the_roster() {
        let mut config = three_node_config();
        config.node.node_id = "node-z".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::LocalNodeMissing("node-z".to_string()))
        );
    }

    #[test]
    fn zero_replication_factor_is_fatal() {
        let mut config = three_node_config();
        config.replication.replication_factor = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroReplicationFactor));
    }

    #[test]
    fn replication_factor_clamps_to_cluster_size() {
        let mut config = three_node_config();
        config.replication.replication_factor = 10;
        assert_eq!(config.effective_replication_factor(), 3);
    }

    #[test]
    fn roster_notation_parses() {
        let roster = parse_roster("node-a=127.0.0.1:7400, node-b=127.0.0.1:7401").unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].id, "node-a");
        assert_eq!(roster[1].address, "127.0.0.1:7401");
    }

    #[test]
    fn malformed_roster_entry_is_rejected() {
        assert!(parse_roster("node-a:127.0.0.1").is_err());
    }

    #[tokio::test]
    async fn missing_file_writes_defaults_back() {
        let path = std::env::temp_dir().join(format!("mailmesh-config-{}.json", std::process::id()));
        let _ = tokio::fs::remove_file(&path).await;

        let loaded = MeshConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded.node.node_id, "node-1");
        assert!(path.exists(), "defaults should be persisted");

        let reloaded = MeshConfig::load_from(&path).await.unwrap();
        assert_eq!(reloaded.cluster.nodes.len(), 1);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
