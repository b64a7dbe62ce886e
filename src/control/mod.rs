/// Cluster start/stop sequencing
///
/// Members are started one at a time: shards, then config servers, then
/// routers. When a start fails every member started before it is stopped
/// again, in the order it was started, and the failure is returned.
use crate::core::{Cluster, CmdOptions, Repository, Server, Shard, ShardedCluster};
use crate::error::{MongoctlError, MongoctlResult};
use crate::process::{start_server, stop_server, ProcessControl};
use std::fmt;
use toml::Value;
use tracing::{error, info, warn};

/// Position of a member in a sharded cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberSlot {
    Shard(usize),
    ConfigServer(usize),
    Router(usize),
}

impl fmt::Display for MemberSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberSlot::Shard(i) => write!(f, "shard #{}", i + 1),
            MemberSlot::ConfigServer(i) => write!(f, "config server #{}", i + 1),
            MemberSlot::Router(i) => write!(f, "router #{}", i + 1),
        }
    }
}

/// A member this run started, or found already running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedMember {
    pub slot: MemberSlot,
    pub server_id: String,
    /// Pid when this run launched the process
    pub pid: Option<u32>,
}

/// Walk order of a cluster start
pub fn start_order(cluster: &ShardedCluster) -> Vec<MemberSlot> {
    (0..cluster.shard_members().len())
        .map(MemberSlot::Shard)
        .chain((0..cluster.config_servers().len()).map(MemberSlot::ConfigServer))
        .chain((0..cluster.routers().len()).map(MemberSlot::Router))
        .collect()
}

/// The standalone server at `slot`; `None` for a replica set shard
fn slot_server<'a>(
    cluster: &'a mut ShardedCluster,
    slot: MemberSlot,
    repo: &dyn Repository,
) -> MongoctlResult<Option<&'a mut Server>> {
    let missing = || MongoctlError::internal(format!("No member at {}", slot));
    match slot {
        MemberSlot::Shard(i) => {
            let member = cluster.shard_member_mut(i).ok_or_else(missing)?;
            match member.shard(repo)? {
                Shard::Server(server) => Ok(Some(server)),
                Shard::ReplicaSet(_) => Ok(None),
            }
        }
        MemberSlot::ConfigServer(i) => Ok(Some(
            cluster.config_servers_mut().get_mut(i).ok_or_else(missing)?.server_mut(),
        )),
        MemberSlot::Router(i) => Ok(Some(
            cluster.routers_mut().get_mut(i).ok_or_else(missing)?.server_mut(),
        )),
    }
}

pub async fn start_cluster(
    cluster: &mut Cluster,
    repo: &dyn Repository,
    process: &dyn ProcessControl,
) -> MongoctlResult<()> {
    match cluster {
        Cluster::Sharded(cluster) => start_sharded_cluster(cluster, repo, process).await.map(|_| ()),
        Cluster::ReplicaSet(cluster) => Err(MongoctlError::unsupported(format!(
            "starting replica set cluster '{}'",
            cluster.id()
        ))),
    }
}

pub async fn stop_cluster(
    cluster: &mut Cluster,
    repo: &dyn Repository,
    process: &dyn ProcessControl,
) -> MongoctlResult<()> {
    match cluster {
        Cluster::Sharded(cluster) => {
            stop_sharded_cluster(cluster, repo, process).await;
            Ok(())
        }
        Cluster::ReplicaSet(cluster) => Err(MongoctlError::unsupported(format!(
            "stopping replica set cluster '{}'",
            cluster.id()
        ))),
    }
}

/// Start every offline standalone member, then add any shard missing from
/// the live topology
pub async fn start_sharded_cluster(
    cluster: &mut ShardedCluster,
    repo: &dyn Repository,
    process: &dyn ProcessControl,
) -> MongoctlResult<Vec<StartedMember>> {
    info!("Starting sharded cluster '{}'", cluster.id());
    let mut started = Vec::new();

    for slot in start_order(cluster) {
        match start_member(cluster, slot, repo, process).await {
            Ok(Some(member)) => started.push(member),
            Ok(None) => {}
            Err(e) => {
                error!("Failed to start {} of cluster '{}': {}", slot, cluster.id(), e);
                rollback(cluster, &started, repo, process).await;
                return Err(e);
            }
        }
    }

    for shard_id in cluster.shard_ids() {
        cluster.add_shard(&shard_id, repo).await?;
    }

    info!("Sharded cluster '{}' started", cluster.id());
    Ok(started)
}

async fn start_member(
    cluster: &mut ShardedCluster,
    slot: MemberSlot,
    repo: &dyn Repository,
    process: &dyn ProcessControl,
) -> MongoctlResult<Option<StartedMember>> {
    let cluster_id = cluster.id().to_string();
    let server = match slot_server(cluster, slot, repo)? {
        Some(server) => server,
        None => {
            warn!(
                "Skipping {} of cluster '{}': starting replica set shards is not supported",
                slot, cluster_id
            );
            return Ok(None);
        }
    };

    let pid = if server.is_online().await {
        info!("Server '{}' is already running", server.id());
        None
    } else {
        let mut overrides = CmdOptions::new();
        overrides.insert("fork".to_string(), Value::Boolean(true));
        Some(start_server(server, &overrides, repo, process).await?)
    };

    Ok(Some(StartedMember {
        slot,
        server_id: server.id().to_string(),
        pid,
    }))
}

/// Stop `started` members in start order; failures are only logged
async fn rollback(
    cluster: &mut ShardedCluster,
    started: &[StartedMember],
    repo: &dyn Repository,
    process: &dyn ProcessControl,
) {
    for member in started {
        warn!("Rolling back: stopping server '{}'", member.server_id);
        let server = match slot_server(cluster, member.slot, repo) {
            Ok(Some(server)) => server,
            Ok(None) => continue,
            Err(e) => {
                error!("Unable to resolve server '{}': {}", member.server_id, e);
                continue;
            }
        };
        if let Err(e) = stop_server(server, process, member.pid, false).await {
            error!("Failed to stop server '{}' during rollback: {}", member.server_id, e);
        }
    }
}

/// Stop the routers only. Shards keep running for clients that use them
/// directly.
pub async fn stop_sharded_cluster(
    cluster: &mut ShardedCluster,
    repo: &dyn Repository,
    process: &dyn ProcessControl,
) {
    info!("Stopping routers of sharded cluster '{}'", cluster.id());
    for index in 0..cluster.routers().len() {
        let server = match slot_server(cluster, MemberSlot::Router(index), repo) {
            Ok(Some(server)) => server,
            _ => continue,
        };
        if let Err(e) = stop_server(server, process, None, false).await {
            error!("Failed to stop router '{}': {}", server.id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MockCredentials;
    use crate::core::testing::sharded_fixture;
    use crate::driver::mock::MockConnector;
    use crate::process::MockProcessControl;
    use std::sync::Arc;

    fn lookup(repo: &dyn Repository) -> ShardedCluster {
        match repo.lookup_and_validate_cluster("main").unwrap() {
            Cluster::Sharded(cluster) => cluster,
            Cluster::ReplicaSet(_) => panic!("Expected a sharded cluster"),
        }
    }

    #[test]
    fn test_start_order() {
        let connector = MockConnector::new();
        let repo = sharded_fixture(&connector, &Arc::new(MockCredentials::default()));
        let cluster = lookup(&repo);

        assert_eq!(
            start_order(&cluster),
            vec![
                MemberSlot::Shard(0),
                MemberSlot::Shard(1),
                MemberSlot::Shard(2),
                MemberSlot::ConfigServer(0),
                MemberSlot::Router(0),
                MemberSlot::Router(1),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back_started_members() {
        let connector = MockConnector::new();
        let repo = sharded_fixture(&connector, &Arc::new(MockCredentials::default()));
        let process = MockProcessControl::new().fail_for("shard2");
        let mut cluster = lookup(&repo);

        let err = start_sharded_cluster(&mut cluster, &repo, &process).await.unwrap_err();
        assert!(matches!(err, MongoctlError::Process { .. }));

        let started = process.started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].0, "shard1");
        assert_eq!(process.stopped(), vec![started[0].1]);

        let attempted: Vec<String> = process.launches().into_iter().map(|l| l.server_id).collect();
        assert_eq!(attempted, vec!["shard1", "shard2"]);
    }

    #[tokio::test]
    async fn test_rollback_continues_past_stop_failure() {
        let connector = MockConnector::new();
        let repo = sharded_fixture(&connector, &Arc::new(MockCredentials::default()));
        let process = MockProcessControl::new().fail_for("shard3").fail_stop_for("shard1");
        let mut cluster = lookup(&repo);

        let err = start_sharded_cluster(&mut cluster, &repo, &process).await.unwrap_err();
        assert!(matches!(err, MongoctlError::Process { .. }));
        assert!(err.to_string().contains("'shard3' failed to start"));

        let started = process.started();
        let started_ids: Vec<&str> = started.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(started_ids, vec!["shard1", "shard2"]);
        assert_eq!(process.stopped(), vec![started[0].1, started[1].1]);
    }

    #[tokio::test]
    async fn test_start_configures_missing_shards() {
        let connector = MockConnector::new();
        connector.add_configured_shard("shard1", "localhost:27018");
        let repo = sharded_fixture(&connector, &Arc::new(MockCredentials::default()));
        let process = MockProcessControl::with_connector(&connector);
        let mut cluster = lookup(&repo);

        let started = start_sharded_cluster(&mut cluster, &repo, &process).await.unwrap();
        assert_eq!(started.len(), 6);
        assert!(started.iter().all(|member| member.pid.is_some()));

        let added: Vec<_> = connector
            .commands_named("addShard")
            .into_iter()
            .map(|recorded| recorded.command)
            .collect();
        assert_eq!(added.len(), 2);
        assert_eq!(added[0].get_str("name").unwrap(), "shard2");
        assert_eq!(connector.configured_shards(), vec!["shard1", "shard2", "shard3"]);

        let router_launch = process
            .launches()
            .into_iter()
            .find(|launch| launch.server_id == "router1")
            .unwrap();
        assert_eq!(router_launch.binary, "mongos");
        assert_eq!(
            router_launch.options.get("configdb").and_then(Value::as_str),
            Some("localhost:27019")
        );
    }

    #[tokio::test]
    async fn test_running_members_are_not_relaunched() {
        let connector = MockConnector::new().with_reachable(&[
            "localhost:27018",
            "localhost:27028",
            "localhost:27038",
            "localhost:27019",
            "localhost:27017",
            "localhost:27027",
        ]);
        let repo = sharded_fixture(&connector, &Arc::new(MockCredentials::default()));
        let process = MockProcessControl::new();
        let mut cluster = lookup(&repo);

        let started = start_sharded_cluster(&mut cluster, &repo, &process).await.unwrap();
        assert!(started.iter().all(|member| member.pid.is_none()));
        assert!(process.launches().is_empty());
        assert_eq!(connector.commands_named("addShard").len(), 3);
    }

    #[tokio::test]
    async fn test_stop_stops_routers_only() {
        let connector = MockConnector::new().with_reachable(&[
            "localhost:27018",
            "localhost:27017",
            "localhost:27027",
        ]);
        let repo = sharded_fixture(&connector, &Arc::new(MockCredentials::default()));
        let process = MockProcessControl::new();
        let mut cluster = Cluster::Sharded(lookup(&repo));

        stop_cluster(&mut cluster, &repo, &process).await.unwrap();

        let shutdowns: Vec<String> = connector
            .commands_named("shutdown")
            .into_iter()
            .map(|recorded| recorded.address)
            .collect();
        assert_eq!(shutdowns, vec!["localhost:27017", "localhost:27027"]);
    }

    #[tokio::test]
    async fn test_replica_set_start_is_unsupported() {
        let connector = MockConnector::new();
        let repo = sharded_fixture(&connector, &Arc::new(MockCredentials::default())).with_cluster(
            toml::from_str(
                r#"
                type = "replicaSet"
                id = "rs0"
                members = [{ server = "shard1" }]
                "#,
            )
            .unwrap(),
        );
        let process = MockProcessControl::new();
        let mut cluster = repo.lookup_cluster("rs0").unwrap().unwrap();

        let err = start_cluster(&mut cluster, &repo, &process).await.unwrap_err();
        assert!(matches!(err, MongoctlError::Unsupported { .. }));
    }
}
