/// mongoctl - lifecycle and topology manager for MongoDB fleets
///
/// Servers, replica sets and sharded clusters are described in a TOML file.
/// `Mongoctl` resolves them through a repository and drives the operations a
/// fleet operator needs: starting and stopping sharded clusters with
/// rollback, configuring the shard set, adding and draining shards, and
/// printing connection URI templates.
pub mod auth;
pub mod config;
pub mod control;
pub mod core;
pub mod driver;
pub mod error;
pub mod health;
pub mod process;
pub mod utils;

use crate::auth::{CredentialSource, InteractivePrompt, Login, NonInteractive};
use crate::config::Config;
use crate::core::{Cluster, InMemoryRepository, Repository, RunContext, ShardedCluster};
use crate::driver::mongodb::MongoDriverConnector;
use crate::error::{MongoctlError, MongoctlResult};
use crate::health::{HealthStatus, ServerHealthChecker};
use crate::process::{LocalProcessControl, ProcessControl};
use crate::utils::document_pretty_string;
use mongodb::bson::Document;
use std::sync::Arc;
use tracing::info;

/// Per-invocation options that do not live in the configuration file
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Servers to treat as local regardless of their address
    pub assume_local: Vec<String>,
    /// Login used for `admin` before any prompt
    pub login: Option<Login>,
}

/// One row of `list_servers`
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSummary {
    pub id: String,
    pub description: Option<String>,
    pub status: HealthStatus,
    pub connect_to: String,
}

/// Entry point of every exposed operation
pub struct Mongoctl {
    repository: Arc<dyn Repository>,
    process: Arc<dyn ProcessControl>,
}

impl Mongoctl {
    pub fn new(repository: Arc<dyn Repository>, process: Arc<dyn ProcessControl>) -> Self {
        Self { repository, process }
    }

    /// Build the default collaborators from a loaded configuration: the
    /// driver connector, the terminal (or no) prompt and local processes
    pub fn from_config(config: &Config, options: RunOptions) -> Self {
        let credentials: Arc<dyn CredentialSource> = if config.settings.interactive {
            Arc::new(InteractivePrompt)
        } else {
            Arc::new(NonInteractive)
        };

        let mut context = RunContext::new(Arc::new(MongoDriverConnector::new()), credentials)
            .with_settings(config.settings.to_operation_settings())
            .with_assumed_local(options.assume_local);
        if let Some(login) = options.login {
            context = context.with_global_login(None, login);
        }

        let repository = InMemoryRepository::from_config(config, Arc::new(context));
        let process = LocalProcessControl::new(config.settings.mongo_bin_dir.clone());
        Self::new(Arc::new(repository), Arc::new(process))
    }

    pub fn repository(&self) -> &dyn Repository {
        self.repository.as_ref()
    }

    fn sharded_cluster(&self, cluster_id: &str) -> MongoctlResult<ShardedCluster> {
        match self.repository.lookup_and_validate_cluster(cluster_id)? {
            Cluster::Sharded(cluster) => Ok(cluster),
            Cluster::ReplicaSet(_) => Err(MongoctlError::configuration(format!(
                "Cluster '{}' is not a sharded cluster",
                cluster_id
            ))),
        }
    }

    /// The validated sharded cluster that has `shard_id` as a shard
    fn cluster_of_shard(&self, shard_id: &str) -> MongoctlResult<ShardedCluster> {
        let repo = self.repository.as_ref();
        if repo.server_document(shard_id).is_none() && repo.cluster_document(shard_id).is_none() {
            return Err(MongoctlError::configuration(format!("Unknown shard '{}'", shard_id)));
        }

        match repo.lookup_cluster_by_shard(shard_id)? {
            Some(cluster) => self.sharded_cluster(cluster.id()),
            None => Err(MongoctlError::configuration(format!("'{}' is not a shard", shard_id))),
        }
    }

    pub async fn start_cluster(&self, cluster_id: &str) -> MongoctlResult<()> {
        let repo = self.repository.as_ref();
        let mut cluster = repo.lookup_and_validate_cluster(cluster_id)?;
        control::start_cluster(&mut cluster, repo, self.process.as_ref()).await
    }

    pub async fn stop_cluster(&self, cluster_id: &str) -> MongoctlResult<()> {
        let repo = self.repository.as_ref();
        let mut cluster = repo.lookup_and_validate_cluster(cluster_id)?;
        control::stop_cluster(&mut cluster, repo, self.process.as_ref()).await
    }

    /// Add every declared shard to a cluster whose live topology has none
    pub async fn configure_shard_cluster(&self, cluster_id: &str, dry_run: bool) -> MongoctlResult<Vec<Document>> {
        let repo = self.repository.as_ref();
        let mut cluster = self.sharded_cluster(cluster_id)?;

        if dry_run {
            let commands = cluster.configure_commands(repo)?;
            log_dry_run(&commands);
            return Ok(commands);
        }
        cluster.configure_shardset(repo).await
    }

    /// Add one shard to the cluster that declares it. Empty when the shard
    /// was already part of the live topology.
    pub async fn add_shard(&self, shard_id: &str, dry_run: bool) -> MongoctlResult<Vec<Document>> {
        let repo = self.repository.as_ref();
        let mut cluster = self.cluster_of_shard(shard_id)?;

        if dry_run {
            let commands = vec![cluster.add_shard_command(shard_id, repo)?];
            log_dry_run(&commands);
            return Ok(commands);
        }
        Ok(cluster.add_shard(shard_id, repo).await?.into_iter().collect())
    }

    pub async fn remove_shard(
        &self,
        shard_id: &str,
        destination: Option<&str>,
        synchronous: bool,
        dry_run: bool,
    ) -> MongoctlResult<Vec<Document>> {
        let mut cluster = self.cluster_of_shard(shard_id)?;
        let commands = vec![ShardedCluster::remove_shard_command(shard_id)];

        if dry_run {
            log_dry_run(&commands);
            return Ok(commands);
        }
        let result = cluster.remove_shard(shard_id, destination, synchronous).await?;
        info!("Remove shard '{}' result: {}", shard_id, document_pretty_string(&result));
        Ok(commands)
    }

    /// URI template of a server, or else of a cluster, with id `id`
    pub fn connection_uri_template(&self, id: &str, db: Option<&str>) -> MongoctlResult<String> {
        if let Some(server) = self.repository.lookup_server(id) {
            return Ok(server.mongo_uri_template(db));
        }
        match self.repository.lookup_cluster(id)? {
            Some(cluster) => Ok(cluster.mongo_uri_template(db)),
            None => Err(MongoctlError::configuration(format!(
                "Cannot find a server or a cluster with id '{}'",
                id
            ))),
        }
    }

    /// Every configured server, sorted by id, with its current reachability
    pub async fn list_servers(&self) -> Vec<ServerSummary> {
        let checker = ServerHealthChecker::new(self.repository.context().settings.connect_timeout);

        let mut servers = self.repository.lookup_all_servers();
        servers.sort_by(|a, b| a.id().cmp(b.id()));

        let mut summaries = Vec::with_capacity(servers.len());
        for mut server in servers {
            let status = checker.check(&mut server).await;
            summaries.push(ServerSummary {
                id: server.id().to_string(),
                description: server.description().map(str::to_string),
                connect_to: server.address_display(),
                status,
            });
        }
        summaries
    }
}

fn log_dry_run(commands: &[Document]) {
    info!("************ Dry Run ************");
    for command in commands {
        info!("Executing the following command");
        info!("{}", document_pretty_string(command));
    }
}
