/// Typed server and cluster descriptors
///
/// Descriptors are the persisted shape of the registry. Every descriptor
/// carries an immutable `id`, the sole equality key across the model, and an
/// `extra` table that keeps keys this version does not understand.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw `mongod`/`mongos` command line options, keyed by option name
pub type CmdOptions = toml::Table;

/// Process binary a server runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    #[default]
    Mongod,
    Mongos,
}

impl ServerKind {
    pub fn binary(&self) -> &'static str {
        match self {
            ServerKind::Mongod => "mongod",
            ServerKind::Mongos => "mongos",
        }
    }
}

/// A user created when the server is first initialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedUser {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDocument {
    #[serde(alias = "_id")]
    id: String,
    #[serde(default)]
    pub kind: ServerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_home: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongo_version: Option<String>,
    #[serde(default)]
    pub cmd_options: CmdOptions,
    /// database name -> users seeded in it
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub seed_users: BTreeMap<String, Vec<SeedUser>>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl ServerDocument {
    pub fn new<S: Into<String>>(id: S, kind: ServerKind) -> Self {
        Self {
            id: id.into(),
            kind,
            description: None,
            address: None,
            server_home: None,
            mongo_version: None,
            cmd_options: CmdOptions::new(),
            seed_users: BTreeMap::new(),
            extra: toml::Table::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn with_address<S: Into<String>>(mut self, address: S) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_option<V: Into<toml::Value>>(mut self, name: &str, value: V) -> Self {
        self.cmd_options.insert(name.to_string(), value.into());
        self
    }

    /// Seeded password of `username` in `dbname`, if one is recorded
    pub fn seed_password(&self, dbname: &str, username: &str) -> Option<&str> {
        self.seed_users
            .get(dbname)?
            .iter()
            .find(|user| user.username == username)
            .and_then(|user| user.password.as_deref())
    }
}

impl PartialEq for ServerDocument {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// One entry of a replica set's `members` or a sharded cluster's
/// `configServers`/`members` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDocument {
    pub server: String,
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl MemberDocument {
    pub fn new<S: Into<String>>(server: S) -> Self {
        Self {
            server: server.into(),
            extra: toml::Table::new(),
        }
    }
}

/// One entry of a sharded cluster's `shards` list. Exactly one of the two
/// references is expected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardMemberDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

impl ShardMemberDocument {
    pub fn server<S: Into<String>>(id: S) -> Self {
        Self {
            server: Some(id.into()),
            cluster: None,
        }
    }

    pub fn cluster<S: Into<String>>(id: S) -> Self {
        Self {
            server: None,
            cluster: Some(id.into()),
        }
    }

    /// Id of the referenced shard, server reference first
    pub fn shard_id(&self) -> Option<&str> {
        self.server.as_deref().or(self.cluster.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetDocument {
    #[serde(alias = "_id")]
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repl_key: Option<String>,
    #[serde(default)]
    pub members: Vec<MemberDocument>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl ReplicaSetDocument {
    pub fn new<S: Into<String>>(id: S, members: Vec<MemberDocument>) -> Self {
        Self {
            id: id.into(),
            description: None,
            repl_key: None,
            members,
            extra: toml::Table::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardedClusterDocument {
    #[serde(alias = "_id")]
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repl_key: Option<String>,
    #[serde(default)]
    pub config_servers: Vec<MemberDocument>,
    #[serde(default)]
    pub shards: Vec<ShardMemberDocument>,
    /// Routers (mongos)
    #[serde(default)]
    pub members: Vec<MemberDocument>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl ShardedClusterDocument {
    pub fn new<S: Into<String>>(
        id: S,
        config_servers: Vec<MemberDocument>,
        shards: Vec<ShardMemberDocument>,
        routers: Vec<MemberDocument>,
    ) -> Self {
        Self {
            id: id.into(),
            description: None,
            repl_key: None,
            config_servers,
            shards,
            members: routers,
            extra: toml::Table::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True if `server_id` is a config server, router or standalone shard
    pub fn has_member_server(&self, server_id: &str) -> bool {
        self.config_servers.iter().any(|m| m.server == server_id)
            || self.members.iter().any(|m| m.server == server_id)
            || self
                .shards
                .iter()
                .any(|s| s.server.as_deref() == Some(server_id))
    }
}

/// Cluster descriptor, discriminated by its `type` key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClusterDocument {
    ReplicaSet(ReplicaSetDocument),
    Sharded(ShardedClusterDocument),
}

impl ClusterDocument {
    pub fn id(&self) -> &str {
        match self {
            ClusterDocument::ReplicaSet(doc) => doc.id(),
            ClusterDocument::Sharded(doc) => doc.id(),
        }
    }

    pub fn repl_key(&self) -> Option<&str> {
        match self {
            ClusterDocument::ReplicaSet(doc) => doc.repl_key.as_deref(),
            ClusterDocument::Sharded(doc) => doc.repl_key.as_deref(),
        }
    }

    /// True if `server_id` is a direct member: a replica set member, or a
    /// config server, router or standalone shard of a sharded cluster
    pub fn has_member_server(&self, server_id: &str) -> bool {
        match self {
            ClusterDocument::ReplicaSet(doc) => doc.members.iter().any(|m| m.server == server_id),
            ClusterDocument::Sharded(doc) => doc.has_member_server(server_id),
        }
    }

    /// True if this is a sharded cluster with `shard_id` among its shards
    pub fn has_shard(&self, shard_id: &str) -> bool {
        match self {
            ClusterDocument::ReplicaSet(_) => false,
            ClusterDocument::Sharded(doc) => doc.shards.iter().any(|s| s.shard_id() == Some(shard_id)),
        }
    }
}

impl PartialEq for ClusterDocument {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_document_from_toml() {
        let doc: ServerDocument = toml::from_str(
            r#"
            _id = "shard1"
            address = "10.0.0.1:27018"
            serverHome = "~/mongo/shard1"
            futureKey = "kept"

            [cmdOptions]
            port = 27018
            auth = true

            [[seedUsers.admin]]
            username = "root"
            password = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(doc.id(), "shard1");
        assert_eq!(doc.kind, ServerKind::Mongod);
        assert_eq!(doc.cmd_options.get("port").and_then(|v| v.as_integer()), Some(27018));
        assert_eq!(doc.seed_password("admin", "root"), Some("secret"));
        assert_eq!(doc.seed_password("admin", "nobody"), None);
        assert_eq!(doc.extra.get("futureKey").and_then(|v| v.as_str()), Some("kept"));
    }

    #[test]
    fn test_equality_is_by_id() {
        let a = ServerDocument::new("s1", ServerKind::Mongod).with_address("a:27017");
        let b = ServerDocument::new("s1", ServerKind::Mongos);
        assert_eq!(a, b);
        assert_ne!(a, ServerDocument::new("s2", ServerKind::Mongod));
    }

    #[test]
    fn test_cluster_document_tagged() {
        let doc: ClusterDocument = toml::from_str(
            r#"
            type = "sharded"
            id = "main"
            replKey = "k3y"
            configServers = [{ server = "cfg1" }]
            shards = [{ server = "shard1" }, { cluster = "rs0" }]
            members = [{ server = "router1" }]
            "#,
        )
        .unwrap();

        assert_eq!(doc.id(), "main");
        assert_eq!(doc.repl_key(), Some("k3y"));
        assert!(doc.has_member_server("router1"));
        assert!(doc.has_member_server("shard1"));
        assert!(!doc.has_member_server("rs0"));
        assert!(doc.has_shard("rs0"));

        let rs: ClusterDocument = toml::from_str(
            r#"
            type = "replicaSet"
            id = "rs0"
            members = [{ server = "a" }, { server = "b", priority = 2 }]
            "#,
        )
        .unwrap();
        match rs {
            ClusterDocument::ReplicaSet(doc) => {
                assert_eq!(doc.members.len(), 2);
                assert!(doc.members[1].extra.contains_key("priority"));
            }
            ClusterDocument::Sharded(_) => panic!("Expected a replica set"),
        }
    }

    #[test]
    fn test_shard_member_id() {
        assert_eq!(ShardMemberDocument::server("s1").shard_id(), Some("s1"));
        assert_eq!(ShardMemberDocument::cluster("rs0").shard_id(), Some("rs0"));
        assert_eq!(ShardMemberDocument::default().shard_id(), None);
    }
}
