/// Replica set clusters and the `Cluster` union
use super::document::{ClusterDocument, MemberDocument, ReplicaSetDocument};
use super::repository::Repository;
use super::server::Server;
use super::sharded::ShardedCluster;
use super::uri_template;
use crate::error::{MongoctlError, MongoctlResult};

/// A cluster member entry resolved to its server
#[derive(Debug)]
pub struct Member {
    document: MemberDocument,
    server: Server,
}

impl Member {
    /// Resolve `document.server` through the repository
    pub fn resolve<R: Repository + ?Sized>(
        document: MemberDocument,
        cluster_id: &str,
        repo: &R,
    ) -> MongoctlResult<Self> {
        match repo.lookup_server(&document.server) {
            Some(server) => Ok(Self { document, server }),
            None => Err(MongoctlError::configuration(format!(
                "Unknown server '{}' in cluster '{}'",
                document.server, cluster_id
            ))),
        }
    }

    pub fn document(&self) -> &MemberDocument {
        &self.document
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut Server {
        &mut self.server
    }
}

pub(crate) fn resolve_members<R: Repository + ?Sized>(
    documents: &[MemberDocument],
    cluster_id: &str,
    repo: &R,
) -> MongoctlResult<Vec<Member>> {
    documents
        .iter()
        .cloned()
        .map(|document| Member::resolve(document, cluster_id, repo))
        .collect()
}

#[derive(Debug)]
pub struct ReplicaSetCluster {
    document: ReplicaSetDocument,
    members: Vec<Member>,
}

impl ReplicaSetCluster {
    pub fn new<R: Repository + ?Sized>(document: ReplicaSetDocument, repo: &R) -> MongoctlResult<Self> {
        let members = resolve_members(&document.members, document.id(), repo)?;
        Ok(Self { document, members })
    }

    pub fn id(&self) -> &str {
        self.document.id()
    }

    pub fn document(&self) -> &ReplicaSetDocument {
        &self.document
    }

    pub fn repl_key(&self) -> Option<&str> {
        self.document.repl_key.as_deref()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn members_mut(&mut self) -> &mut [Member] {
        &mut self.members
    }

    pub fn member_addresses(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|member| member.server().address_display())
            .collect()
    }

    pub fn has_member_server(&self, server_id: &str) -> bool {
        self.members.iter().any(|m| m.server().id() == server_id)
    }
}

#[derive(Debug)]
pub enum Cluster {
    ReplicaSet(ReplicaSetCluster),
    Sharded(ShardedCluster),
}

impl Cluster {
    pub fn from_document<R: Repository + ?Sized>(document: ClusterDocument, repo: &R) -> MongoctlResult<Self> {
        match document {
            ClusterDocument::ReplicaSet(doc) => Ok(Cluster::ReplicaSet(ReplicaSetCluster::new(doc, repo)?)),
            ClusterDocument::Sharded(doc) => Ok(Cluster::Sharded(ShardedCluster::new(doc, repo)?)),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Cluster::ReplicaSet(cluster) => cluster.id(),
            Cluster::Sharded(cluster) => cluster.id(),
        }
    }

    pub fn repl_key(&self) -> Option<&str> {
        match self {
            Cluster::ReplicaSet(cluster) => cluster.repl_key(),
            Cluster::Sharded(cluster) => cluster.repl_key(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Cluster::ReplicaSet(_) => "replica set",
            Cluster::Sharded(_) => "sharded cluster",
        }
    }

    pub fn has_member_server(&self, server_id: &str) -> bool {
        match self {
            Cluster::ReplicaSet(cluster) => cluster.has_member_server(server_id),
            Cluster::Sharded(cluster) => cluster.document().has_member_server(server_id),
        }
    }

    /// Connection URI template over the members, or the routers of a
    /// sharded cluster
    pub fn mongo_uri_template(&self, db: Option<&str>) -> String {
        let addresses = match self {
            Cluster::ReplicaSet(cluster) => cluster.member_addresses(),
            Cluster::Sharded(cluster) => cluster.router_addresses(),
        };
        uri_template(&addresses, db, self.repl_key().is_some())
    }
}
