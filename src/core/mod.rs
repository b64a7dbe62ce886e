/// Core server and cluster model
pub mod cluster;
pub mod document;
pub mod repository;
pub mod server;
pub mod sharded;

use crate::auth::{CredentialSource, Login};
use crate::driver::Connector;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use cluster::{Cluster, Member, ReplicaSetCluster};
pub use document::{
    ClusterDocument, CmdOptions, MemberDocument, ReplicaSetDocument, ServerDocument, ServerKind,
    ShardMemberDocument, ShardedClusterDocument,
};
pub use repository::{InMemoryRepository, Repository};
pub use server::{Database, DbOptions, MongoVersion, Server};
pub use sharded::{Shard, ShardMember, ShardedCluster};

/// Placeholder for credentials in connection URI templates
pub const URI_CREDENTIALS_PLACEHOLDER: &str = "[<dbuser>:<dbpass>@]";

/// Timeouts and retry limits used by every operation of a run
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSettings {
    /// Timeout for connections that carry commands
    pub connect_timeout: Duration,
    /// Short timeout for reachability probes
    pub probe_timeout: Duration,
    /// Sleep between submissions of a synchronous shard removal
    pub remove_shard_poll_interval: Duration,
    /// Credential attempts per authentication
    pub auth_attempts: u32,
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(1),
            remove_shard_poll_interval: Duration::from_secs(2),
            auth_attempts: 3,
        }
    }
}

/// A login supplied up front for one database
#[derive(Debug, Clone)]
pub struct GlobalLogin {
    pub database: String,
    pub login: Login,
}

/// Run-scoped context shared by every server and cluster view of one
/// invocation: the collaborators, the settings and the servers the operator
/// declared local.
pub struct RunContext {
    pub connector: Arc<dyn Connector>,
    pub credentials: Arc<dyn CredentialSource>,
    pub settings: OperationSettings,
    assumed_local: HashSet<String>,
    global_login: Option<GlobalLogin>,
}

impl RunContext {
    pub fn new(connector: Arc<dyn Connector>, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            connector,
            credentials,
            settings: OperationSettings::default(),
            assumed_local: HashSet::new(),
            global_login: None,
        }
    }

    pub fn with_settings(mut self, settings: OperationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Treat these server ids as local regardless of their address
    pub fn with_assumed_local<I, S>(mut self, server_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assumed_local
            .extend(server_ids.into_iter().map(Into::into));
        self
    }

    /// Pre-supply a login for `database` (`admin` when `None`)
    pub fn with_global_login(mut self, database: Option<&str>, login: Login) -> Self {
        self.global_login = Some(GlobalLogin {
            database: database.unwrap_or("admin").to_string(),
            login,
        });
        self
    }

    pub fn is_assumed_local(&self, server_id: &str) -> bool {
        self.assumed_local.contains(server_id)
    }

    /// The pre-supplied login if it was given for `dbname`
    pub fn global_login_for(&self, dbname: &str) -> Option<&Login> {
        self.global_login
            .as_ref()
            .filter(|global| global.database == dbname)
            .map(|global| &global.login)
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("settings", &self.settings)
            .field("assumed_local", &self.assumed_local)
            .field("global_login", &self.global_login.as_ref().map(|g| &g.database))
            .finish()
    }
}

/// `mongodb://[<dbuser>:<dbpass>@]host1[,host2...][/<db>]`
///
/// The credentials placeholder appears only when `with_auth`; without a
/// database an authenticated template ends in `[/<dbname>]`.
pub fn uri_template(addresses: &[String], db: Option<&str>, with_auth: bool) -> String {
    let credentials = if with_auth { URI_CREDENTIALS_PLACEHOLDER } else { "" };
    let suffix = match db {
        Some(db) => format!("/{}", db),
        None if with_auth => "[/<dbname>]".to_string(),
        None => String::new(),
    };
    format!("mongodb://{}{}{}", credentials, addresses.join(","), suffix)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_template() {
        let addresses = vec!["a:27017".to_string(), "b:27017".to_string()];
        assert_eq!(
            uri_template(&addresses, Some("app"), true),
            "mongodb://[<dbuser>:<dbpass>@]a:27017,b:27017/app"
        );
        assert_eq!(
            uri_template(&addresses, None, true),
            "mongodb://[<dbuser>:<dbpass>@]a:27017,b:27017[/<dbname>]"
        );
        assert_eq!(uri_template(&addresses[..1], None, false), "mongodb://a:27017");
    }

    #[test]
    fn test_default_settings() {
        let settings = OperationSettings::default();
        assert_eq!(settings.auth_attempts, 3);
        assert_eq!(settings.remove_shard_poll_interval, Duration::from_secs(2));
        assert!(settings.probe_timeout < settings.connect_timeout);
    }
}
