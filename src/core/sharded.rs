/// Sharded clusters and their topology mutation protocol
///
/// A shard moves from unconfigured to configured once a router accepted its
/// `addShard` and `listShards` reports it. Every command goes through the
/// first router, in declared order, that answers a probe.
use super::cluster::{resolve_members, Cluster, Member, ReplicaSetCluster};
use super::document::{ShardMemberDocument, ShardedClusterDocument};
use super::repository::Repository;
use super::server::Server;
use crate::error::{MongoctlError, MongoctlResult};
use crate::utils::{document_pretty_string, format_duration};
use mongodb::bson::{doc, Bson, Document};
use std::time::Duration;
use tracing::{debug, error, info};

/// What a shard member resolves to
#[derive(Debug)]
pub enum Shard {
    Server(Server),
    ReplicaSet(ReplicaSetCluster),
}

impl Shard {
    pub fn id(&self) -> &str {
        match self {
            Shard::Server(server) => server.id(),
            Shard::ReplicaSet(cluster) => cluster.id(),
        }
    }

    /// Address used in `addShard`: the server's own address, or
    /// `<replicaSetId>/<member addresses>` for a replica set
    pub fn address(&self) -> String {
        match self {
            Shard::Server(server) => server.address_display(),
            Shard::ReplicaSet(cluster) => {
                format!("{}/{}", cluster.id(), cluster.member_addresses().join(","))
            }
        }
    }
}

/// A by-id reference to a shard, resolved on first access and then cached
#[derive(Debug)]
pub struct ShardMember {
    document: ShardMemberDocument,
    shard: Option<Shard>,
}

impl ShardMember {
    pub fn new(document: ShardMemberDocument) -> Self {
        Self {
            document,
            shard: None,
        }
    }

    pub fn document(&self) -> &ShardMemberDocument {
        &self.document
    }

    pub fn shard_id(&self) -> Option<&str> {
        self.document.shard_id()
    }

    pub fn shard(&mut self, repo: &dyn Repository) -> MongoctlResult<&mut Shard> {
        let shard = match self.shard.take() {
            Some(shard) => shard,
            None => self.resolve(repo)?,
        };
        Ok(self.shard.insert(shard))
    }

    fn resolve(&self, repo: &dyn Repository) -> MongoctlResult<Shard> {
        match (&self.document.server, &self.document.cluster) {
            (Some(server_id), None) => repo
                .lookup_server(server_id)
                .map(Shard::Server)
                .ok_or_else(|| MongoctlError::configuration(format!("Unknown shard server '{}'", server_id))),
            (None, Some(cluster_id)) => match repo.lookup_cluster(cluster_id)? {
                Some(Cluster::ReplicaSet(cluster)) => Ok(Shard::ReplicaSet(cluster)),
                Some(Cluster::Sharded(_)) => Err(MongoctlError::configuration(format!(
                    "Shard cluster '{}' must be a replica set",
                    cluster_id
                ))),
                None => Err(MongoctlError::configuration(format!(
                    "Unknown shard cluster '{}'",
                    cluster_id
                ))),
            },
            _ => Err(MongoctlError::configuration(
                "A shard member must reference exactly one of 'server' or 'cluster'",
            )),
        }
    }
}

#[derive(Debug)]
pub struct ShardedCluster {
    document: ShardedClusterDocument,
    config_servers: Vec<Member>,
    shards: Vec<ShardMember>,
    routers: Vec<Member>,
    poll_interval: Duration,
}

impl ShardedCluster {
    pub fn new<R: Repository + ?Sized>(document: ShardedClusterDocument, repo: &R) -> MongoctlResult<Self> {
        if document.config_servers.is_empty() || document.shards.is_empty() || document.members.is_empty() {
            return Err(MongoctlError::configuration(format!(
                "Please specify config, shard, and mongos servers for cluster '{}'",
                document.id()
            )));
        }

        let config_servers = resolve_members(&document.config_servers, document.id(), repo)?;
        let routers = resolve_members(&document.members, document.id(), repo)?;
        let shards = document.shards.iter().cloned().map(ShardMember::new).collect();

        Ok(Self {
            config_servers,
            shards,
            routers,
            poll_interval: repo.context().settings.remove_shard_poll_interval,
            document,
        })
    }

    pub fn id(&self) -> &str {
        self.document.id()
    }

    pub fn document(&self) -> &ShardedClusterDocument {
        &self.document
    }

    pub fn repl_key(&self) -> Option<&str> {
        self.document.repl_key.as_deref()
    }

    pub fn config_servers(&self) -> &[Member] {
        &self.config_servers
    }

    pub fn config_servers_mut(&mut self) -> &mut [Member] {
        &mut self.config_servers
    }

    pub fn routers(&self) -> &[Member] {
        &self.routers
    }

    pub fn routers_mut(&mut self) -> &mut [Member] {
        &mut self.routers
    }

    pub fn shard_members(&self) -> &[ShardMember] {
        &self.shards
    }

    pub fn shard_member_mut(&mut self, index: usize) -> Option<&mut ShardMember> {
        self.shards.get_mut(index)
    }

    pub fn shard_ids(&self) -> Vec<String> {
        self.shards
            .iter()
            .filter_map(|member| member.shard_id().map(str::to_string))
            .collect()
    }

    pub fn config_member_addresses(&self) -> Vec<String> {
        self.config_servers
            .iter()
            .map(|member| member.server().address_display())
            .collect()
    }

    pub fn router_addresses(&self) -> Vec<String> {
        self.routers
            .iter()
            .map(|member| member.server().address_display())
            .collect()
    }

    pub fn shard_member_index(&self, shard_id: &str) -> MongoctlResult<usize> {
        self.shards
            .iter()
            .position(|member| member.shard_id() == Some(shard_id))
            .ok_or_else(|| {
                MongoctlError::configuration(format!(
                    "Shard '{}' is not a member of cluster '{}'",
                    shard_id,
                    self.id()
                ))
            })
    }

    pub fn shard_member_address(&mut self, shard_id: &str, repo: &dyn Repository) -> MongoctlResult<String> {
        let index = self.shard_member_index(shard_id)?;
        Ok(self.shards[index].shard(repo)?.address())
    }

    pub fn add_shard_command(&mut self, shard_id: &str, repo: &dyn Repository) -> MongoctlResult<Document> {
        let address = self.shard_member_address(shard_id, repo)?;
        Ok(doc! { "addShard": address, "name": shard_id })
    }

    pub fn remove_shard_command(shard_id: &str) -> Document {
        doc! { "removeShard": shard_id }
    }

    /// `addShard` commands for every declared shard, in declaration order
    pub fn configure_commands(&mut self, repo: &dyn Repository) -> MongoctlResult<Vec<Document>> {
        self.shard_ids()
            .iter()
            .map(|shard_id| self.add_shard_command(shard_id, repo))
            .collect()
    }

    /// First router, in declared order, that answers a probe
    pub async fn online_router(&mut self) -> MongoctlResult<&mut Server> {
        let mut online = None;
        for (index, router) in self.routers.iter_mut().enumerate() {
            if router.server_mut().is_online().await {
                online = Some(index);
                break;
            }
        }

        match online {
            Some(index) => Ok(self.routers[index].server_mut()),
            None => Err(MongoctlError::no_router(self.id())),
        }
    }

    pub async fn router_command(&mut self, command: Document) -> MongoctlResult<Document> {
        let router = self.online_router().await?;
        debug!("Sending command via router '{}'", router.id());
        router.db_command(command, "admin").await
    }

    /// Shards reported by the live topology
    pub async fn list_shards(&mut self) -> MongoctlResult<Vec<Document>> {
        let result = self.router_command(doc! { "listShards": 1 }).await?;
        let shards = result
            .get_array("shards")
            .map_err(|e| MongoctlError::command("listShards".to_string(), e.to_string()))?;

        Ok(shards
            .iter()
            .filter_map(|shard| match shard {
                Bson::Document(shard) => Some(shard.clone()),
                _ => None,
            })
            .collect())
    }

    pub async fn is_shard_configured(&mut self, shard_id: &str) -> MongoctlResult<bool> {
        let shards = self.list_shards().await?;
        Ok(shards
            .iter()
            .any(|shard| shard.get_str("_id").map_or(false, |id| id == shard_id)))
    }

    /// Add every declared shard to a cluster that has none yet
    pub async fn configure_shardset(&mut self, repo: &dyn Repository) -> MongoctlResult<Vec<Document>> {
        if !self.list_shards().await?.is_empty() {
            return Err(MongoctlError::already_configured(self.id()));
        }

        info!("Configuring shardset of cluster '{}'", self.id());
        let mut commands = Vec::new();
        for shard_id in self.shard_ids() {
            if let Some(command) = self.add_shard(&shard_id, repo).await? {
                commands.push(command);
            }
        }
        Ok(commands)
    }

    /// Add one shard; returns the submitted command, or `None` when the
    /// shard was already configured
    pub async fn add_shard(&mut self, shard_id: &str, repo: &dyn Repository) -> MongoctlResult<Option<Document>> {
        let command = self.add_shard_command(shard_id, repo)?;
        if self.is_shard_configured(shard_id).await? {
            info!("Shard '{}' is already added to cluster '{}'", shard_id, self.id());
            return Ok(None);
        }

        info!("Adding shard '{}' to cluster '{}'", shard_id, self.id());
        debug!("{}", document_pretty_string(&command));
        let result = self.router_command(command.clone()).await?;
        info!("Shard '{}' added: {}", shard_id, document_pretty_string(&result));
        Ok(Some(command))
    }

    /// Submit `removeShard`. When `synchronous`, keep re-submitting until the
    /// drain completes or the shard disappears from the topology. Databases
    /// the reply lists in `dbsToMove` are moved to `destination` if given.
    pub async fn remove_shard(
        &mut self,
        shard_id: &str,
        destination: Option<&str>,
        synchronous: bool,
    ) -> MongoctlResult<Document> {
        self.shard_member_index(shard_id)?;
        if let Some(destination) = destination {
            if destination == shard_id {
                return Err(MongoctlError::configuration(format!(
                    "Cannot move unsharded data of shard '{}' to itself",
                    shard_id
                )));
            }
            self.shard_member_index(destination)?;
        }

        if !self.is_shard_configured(shard_id).await? {
            error!("Shard '{}' is not configured in cluster '{}'", shard_id, self.id());
        }

        let command = Self::remove_shard_command(shard_id);
        loop {
            info!("Removing shard '{}' from cluster '{}'", shard_id, self.id());
            let result = self.router_command(command.clone()).await?;
            debug!("{}", document_pretty_string(&result));

            if let Some(destination) = destination {
                let dbs = dbs_to_move(&result);
                if !dbs.is_empty() {
                    self.move_dbs_primary(&dbs, destination).await?;
                }
            }

            if !synchronous || matches!(result.get_str("state"), Ok("completed")) {
                return Ok(result);
            }
            if !self.is_shard_configured(shard_id).await? {
                return Ok(result);
            }

            info!(
                "Shard '{}' is still draining, checking again in {}",
                shard_id,
                format_duration(self.poll_interval)
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn move_dbs_primary(&mut self, dbs: &[String], destination: &str) -> MongoctlResult<()> {
        for db in dbs {
            info!("Moving primary of database '{}' to shard '{}'", db, destination);
            let result = self
                .router_command(doc! { "movePrimary": db.as_str(), "to": destination })
                .await?;
            debug!("{}", document_pretty_string(&result));
        }
        Ok(())
    }
}

fn dbs_to_move(result: &Document) -> Vec<String> {
    match result.get_array("dbsToMove") {
        Ok(dbs) => dbs.iter().filter_map(|db| db.as_str().map(str::to_string)).collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MockCredentials;
    use crate::core::testing::{context, sharded_fixture};
    use crate::core::{InMemoryRepository, ServerDocument, ServerKind};
    use crate::driver::mock::MockConnector;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    fn synthesis_repo() -> InMemoryRepository {
        let connector = MockConnector::new();
        let credentials = Arc::new(MockCredentials::default());
        InMemoryRepository::new(Arc::new(context(&connector, &credentials)))
            .with_server(ServerDocument::new("s1", ServerKind::Mongod).with_address("10.0.0.1:27018"))
            .with_server(ServerDocument::new("rs0a", ServerKind::Mongod).with_address("10.0.0.2:27018"))
            .with_server(ServerDocument::new("rs0b", ServerKind::Mongod).with_address("10.0.0.3:27018"))
            .with_server(ServerDocument::new("cfg", ServerKind::Mongod).with_address("10.0.0.4:27019"))
            .with_server(ServerDocument::new("router", ServerKind::Mongos).with_address("10.0.0.5:27017"))
            .with_cluster(
                toml::from_str(
                    r#"
                    type = "replicaSet"
                    id = "rs0"
                    members = [{ server = "rs0a" }, { server = "rs0b" }]
                    "#,
                )
                .unwrap(),
            )
            .with_cluster(
                toml::from_str(
                    r#"
                    type = "sharded"
                    id = "main"
                    configServers = [{ server = "cfg" }]
                    shards = [{ server = "s1" }, { cluster = "rs0" }]
                    members = [{ server = "router" }]
                    "#,
                )
                .unwrap(),
            )
    }

    fn lookup_sharded(repo: &dyn Repository, id: &str) -> ShardedCluster {
        match repo.lookup_cluster(id).unwrap() {
            Some(Cluster::Sharded(cluster)) => cluster,
            other => panic!("Expected sharded cluster, got {:?}", other),
        }
    }

    #[test]
    fn test_shard_address_synthesis() {
        let repo = synthesis_repo();
        let mut cluster = lookup_sharded(&repo, "main");

        assert_eq!(cluster.shard_member_address("s1", &repo).unwrap(), "10.0.0.1:27018");
        assert_eq!(
            cluster.shard_member_address("rs0", &repo).unwrap(),
            "rs0/10.0.0.2:27018,10.0.0.3:27018"
        );
        assert_eq!(cluster.config_member_addresses(), vec!["10.0.0.4:27019"]);

        let commands = cluster.configure_commands(&repo).unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1], doc! { "addShard": "rs0/10.0.0.2:27018,10.0.0.3:27018", "name": "rs0" });
    }

    #[test]
    fn test_missing_members_rejected() {
        let repo = synthesis_repo().with_cluster(
            toml::from_str(
                r#"
                type = "sharded"
                id = "empty"
                configServers = [{ server = "cfg" }]
                members = [{ server = "router" }]
                "#,
            )
            .unwrap(),
        );
        let err = repo.lookup_cluster("empty").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid descriptor: Please specify config, shard, and mongos servers for cluster 'empty'"
        );
    }

    #[tokio::test]
    async fn test_no_router_available() {
        let connector = MockConnector::new();
        let credentials = Arc::new(MockCredentials::default());
        let repo = sharded_fixture(&connector, &credentials);
        let mut cluster = lookup_sharded(&repo, "main");

        let err = cluster.list_shards().await.unwrap_err();
        assert!(matches!(err, MongoctlError::NoRouterAvailable { .. }));
    }

    #[tokio::test]
    async fn test_add_shard_is_idempotent() {
        let connector = MockConnector::new().with_reachable(&["localhost:27017"]);
        let credentials = Arc::new(MockCredentials::default());
        let repo = sharded_fixture(&connector, &credentials);
        let mut cluster = lookup_sharded(&repo, "main");

        let first = cluster.add_shard("shard1", &repo).await.unwrap();
        assert_eq!(first, Some(doc! { "addShard": "localhost:27018", "name": "shard1" }));

        let second = cluster.add_shard("shard1", &repo).await.unwrap();
        assert_eq!(second, None);
        assert_eq!(connector.commands_named("addShard").len(), 1);
        assert_eq!(connector.configured_shards(), vec!["shard1"]);
    }

    #[tokio::test]
    async fn test_configure_shardset() {
        let connector = MockConnector::new().with_reachable(&["localhost:27017"]);
        let credentials = Arc::new(MockCredentials::default());
        let repo = sharded_fixture(&connector, &credentials);
        let mut cluster = lookup_sharded(&repo, "main");

        let commands = cluster.configure_shardset(&repo).await.unwrap();
        assert_eq!(commands.len(), 3);
        assert_eq!(connector.configured_shards(), vec!["shard1", "shard2", "shard3"]);

        let err = cluster.configure_shardset(&repo).await.unwrap_err();
        assert!(matches!(err, MongoctlError::AlreadyConfigured { .. }));
    }

    #[tokio::test]
    async fn test_router_selection_in_declared_order() {
        let connector = MockConnector::new().with_reachable(&["localhost:27027"]);
        let credentials = Arc::new(MockCredentials::default());
        let repo = sharded_fixture(&connector, &credentials);
        let mut cluster = lookup_sharded(&repo, "main");

        let router = cluster.online_router().await.unwrap();
        assert_eq!(router.id(), "router2");
    }

    #[tokio::test]
    async fn test_remove_shard_synchronous_polls_until_completed() {
        let connector = MockConnector::new().with_reachable(&["localhost:27017"]);
        connector.add_configured_shard("shard1", "localhost:27018");
        connector.push_remove_reply(doc! { "msg": "draining started", "state": "in progress", "ok": 1 });
        connector.push_remove_reply(doc! { "msg": "draining ongoing", "state": "in progress", "ok": 1 });
        let credentials = Arc::new(MockCredentials::default());
        let repo = sharded_fixture(&connector, &credentials);
        let mut cluster = lookup_sharded(&repo, "main");

        let result = cluster.remove_shard("shard1", None, true).await.unwrap();
        assert_eq!(result.get_str("state").unwrap(), "completed");
        assert_eq!(connector.commands_named("removeShard").len(), 3);
        assert!(connector.configured_shards().is_empty());
    }

    #[tokio::test]
    async fn test_remove_shard_asynchronous_submits_once() {
        let connector = MockConnector::new().with_reachable(&["localhost:27017"]);
        connector.add_configured_shard("shard1", "localhost:27018");
        connector.push_remove_reply(doc! { "msg": "draining started", "state": "started", "ok": 1 });
        let credentials = Arc::new(MockCredentials::default());
        let repo = sharded_fixture(&connector, &credentials);
        let mut cluster = lookup_sharded(&repo, "main");

        let result = cluster.remove_shard("shard1", None, false).await.unwrap();
        assert_eq!(result.get_str("state").unwrap(), "started");
        assert_eq!(connector.commands_named("removeShard").len(), 1);
    }

    #[tokio::test]
    async fn test_remove_shard_moves_unsharded_dbs() {
        let connector = MockConnector::new().with_reachable(&["localhost:27017"]);
        connector.add_configured_shard("shard1", "localhost:27018");
        connector.push_remove_reply(doc! { "state": "ongoing", "dbsToMove": ["app", "logs"], "ok": 1 });
        let credentials = Arc::new(MockCredentials::default());
        let repo = sharded_fixture(&connector, &credentials);
        let mut cluster = lookup_sharded(&repo, "main");

        assert_ok!(cluster.remove_shard("shard1", Some("shard2"), true).await);

        let moves = connector.commands_named("movePrimary");
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[0].command, doc! { "movePrimary": "app", "to": "shard2" });
        assert_eq!(connector.commands_named("removeShard").len(), 2);

        let err = cluster.remove_shard("shard1", Some("nowhere"), true).await.unwrap_err();
        assert!(matches!(err, MongoctlError::Configuration { .. }));
    }
}
