/// Lookup of servers and clusters by id
use super::cluster::Cluster;
use super::document::{ClusterDocument, ServerDocument, ServerKind};
use super::server::Server;
use super::sharded::ShardedCluster;
use super::RunContext;
use crate::config::Config;
use crate::error::{MongoctlError, MongoctlResult};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Registry of descriptors. Server and cluster objects are fresh views built
/// on every lookup; only the documents are owned here.
pub trait Repository: Send + Sync {
    fn context(&self) -> Arc<RunContext>;

    fn server_document(&self, id: &str) -> Option<ServerDocument>;

    fn cluster_document(&self, id: &str) -> Option<ClusterDocument>;

    fn server_documents(&self) -> Vec<ServerDocument>;

    fn cluster_documents(&self) -> Vec<ClusterDocument>;

    fn lookup_server(&self, id: &str) -> Option<Server> {
        self.server_document(id)
            .map(|document| Server::new(document, self.context()))
    }

    fn lookup_cluster(&self, id: &str) -> MongoctlResult<Option<Cluster>> {
        match self.cluster_document(id) {
            Some(document) => Cluster::from_document(document, self).map(Some),
            None => Ok(None),
        }
    }

    /// First cluster that has `server_id` as a direct member
    fn lookup_cluster_by_server(&self, server_id: &str) -> MongoctlResult<Option<Cluster>> {
        match self
            .cluster_documents()
            .into_iter()
            .find(|document| document.has_member_server(server_id))
        {
            Some(document) => Cluster::from_document(document, self).map(Some),
            None => Ok(None),
        }
    }

    /// Sharded cluster that has `shard_id` (a server or cluster id) as a shard
    fn lookup_cluster_by_shard(&self, shard_id: &str) -> MongoctlResult<Option<ShardedCluster>> {
        let document = self
            .cluster_documents()
            .into_iter()
            .find(|document| document.has_shard(shard_id));

        match document {
            Some(ClusterDocument::Sharded(document)) => ShardedCluster::new(document, self).map(Some),
            _ => Ok(None),
        }
    }

    fn lookup_all_servers(&self) -> Vec<Server> {
        self.server_documents()
            .into_iter()
            .map(|document| Server::new(document, self.context()))
            .collect()
    }

    /// Structural checks that construction alone does not enforce
    fn validate_cluster(&self, cluster: &Cluster) -> MongoctlResult<()> {
        let mut seen = HashSet::new();
        let mut check_unique = |id: &str| {
            if seen.insert(id.to_string()) {
                Ok(())
            } else {
                Err(MongoctlError::configuration(format!(
                    "Member '{}' appears more than once in cluster '{}'",
                    id,
                    cluster.id()
                )))
            }
        };

        match cluster {
            Cluster::ReplicaSet(replica_set) => {
                for member in replica_set.members() {
                    check_unique(member.server().id())?;
                    expect_kind(member.server().document(), ServerKind::Mongod, "replica set member")?;
                }
            }
            Cluster::Sharded(sharded) => {
                for member in sharded.config_servers() {
                    check_unique(member.server().id())?;
                    expect_kind(member.server().document(), ServerKind::Mongod, "config server")?;
                }
                for member in sharded.routers() {
                    check_unique(member.server().id())?;
                    expect_kind(member.server().document(), ServerKind::Mongos, "router")?;
                }
                for member in sharded.shard_members() {
                    let document = member.document();
                    match (&document.server, &document.cluster) {
                        (Some(server_id), None) => {
                            check_unique(server_id)?;
                            let server = self.server_document(server_id).ok_or_else(|| {
                                MongoctlError::configuration(format!("Unknown shard server '{}'", server_id))
                            })?;
                            expect_kind(&server, ServerKind::Mongod, "shard")?;
                        }
                        (None, Some(cluster_id)) => {
                            check_unique(cluster_id)?;
                            match self.cluster_document(cluster_id) {
                                Some(ClusterDocument::ReplicaSet(_)) => {}
                                Some(ClusterDocument::Sharded(_)) => {
                                    return Err(MongoctlError::configuration(format!(
                                        "Shard cluster '{}' must be a replica set",
                                        cluster_id
                                    )));
                                }
                                None => {
                                    return Err(MongoctlError::configuration(format!(
                                        "Unknown shard cluster '{}'",
                                        cluster_id
                                    )));
                                }
                            }
                        }
                        _ => {
                            return Err(MongoctlError::configuration(format!(
                                "A shard of cluster '{}' must reference exactly one of 'server' or 'cluster'",
                                cluster.id()
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn lookup_and_validate_cluster(&self, id: &str) -> MongoctlResult<Cluster> {
        let cluster = self
            .lookup_cluster(id)?
            .ok_or_else(|| MongoctlError::configuration(format!("Unknown cluster '{}'", id)))?;
        self.validate_cluster(&cluster)?;
        Ok(cluster)
    }
}

fn expect_kind(server: &ServerDocument, kind: ServerKind, role: &str) -> MongoctlResult<()> {
    if server.kind == kind {
        return Ok(());
    }
    Err(MongoctlError::configuration(format!(
        "Server '{}' is a {} and cannot be used as a {}",
        server.id(),
        server.kind.binary(),
        role
    )))
}

/// Repository over descriptors held in memory, usually from the config file
#[derive(Debug)]
pub struct InMemoryRepository {
    context: Arc<RunContext>,
    servers: BTreeMap<String, ServerDocument>,
    clusters: Vec<ClusterDocument>,
}

impl InMemoryRepository {
    pub fn new(context: Arc<RunContext>) -> Self {
        Self {
            context,
            servers: BTreeMap::new(),
            clusters: Vec::new(),
        }
    }

    pub fn from_config(config: &Config, context: Arc<RunContext>) -> Self {
        let mut repo = Self::new(context);
        for server in &config.servers {
            repo.add_server(server.clone());
        }
        for cluster in &config.clusters {
            repo.add_cluster(cluster.clone());
        }
        repo
    }

    pub fn add_server(&mut self, document: ServerDocument) {
        self.servers.insert(document.id().to_string(), document);
    }

    pub fn add_cluster(&mut self, document: ClusterDocument) {
        self.clusters.retain(|existing| existing.id() != document.id());
        self.clusters.push(document);
    }

    pub fn with_server(mut self, document: ServerDocument) -> Self {
        self.add_server(document);
        self
    }

    pub fn with_cluster(mut self, document: ClusterDocument) -> Self {
        self.add_cluster(document);
        self
    }
}

impl Repository for InMemoryRepository {
    fn context(&self) -> Arc<RunContext> {
        Arc::clone(&self.context)
    }

    fn server_document(&self, id: &str) -> Option<ServerDocument> {
        self.servers.get(id).cloned()
    }

    fn cluster_document(&self, id: &str) -> Option<ClusterDocument> {
        self.clusters.iter().find(|cluster| cluster.id() == id).cloned()
    }

    fn server_documents(&self) -> Vec<ServerDocument> {
        self.servers.values().cloned().collect()
    }

    fn cluster_documents(&self) -> Vec<ClusterDocument> {
        self.clusters.clone()
    }
}
