/// In-memory connector used by unit tests.
///
/// Every connection shares one `MockState`: which addresses answer, which
/// require authentication, the live shard list a router reports, and a log of
/// every command and authentication attempt.
use super::{Connection, Connector};
use crate::error::{MongoctlError, MongoctlResult};
use crate::utils::command_name;
use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedCommand {
    pub address: String,
    pub db: String,
    pub command: Document,
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub reachable: HashSet<String>,
    /// address -> (username, password) required on any database
    pub credentials: HashMap<String, (String, String)>,
    /// (_id, host) pairs reported by listShards
    pub shards: Vec<(String, String)>,
    /// scripted removeShard replies; once empty the removal completes
    pub remove_replies: VecDeque<Document>,
    pub commands: Vec<RecordedCommand>,
    /// (address, db, username, password)
    pub auth_attempts: Vec<(String, String, String, String)>,
    pub connects: Vec<String>,
}

#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    pub state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reachable(self, addresses: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for address in addresses {
                state.reachable.insert(address.to_string());
            }
        }
        self
    }

    pub fn with_credentials(self, address: &str, username: &str, password: &str) -> Self {
        self.state.lock().unwrap().credentials.insert(
            address.to_string(),
            (username.to_string(), password.to_string()),
        );
        self
    }

    pub fn set_reachable(&self, address: &str, reachable: bool) {
        let mut state = self.state.lock().unwrap();
        if reachable {
            state.reachable.insert(address.to_string());
        } else {
            state.reachable.remove(address);
        }
    }

    pub fn push_remove_reply(&self, reply: Document) {
        self.state.lock().unwrap().remove_replies.push_back(reply);
    }

    pub fn add_configured_shard(&self, id: &str, host: &str) {
        self.state
            .lock()
            .unwrap()
            .shards
            .push((id.to_string(), host.to_string()));
    }

    pub fn configured_shards(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .shards
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every recorded command whose name is `name`
    pub fn commands_named(&self, name: &str) -> Vec<RecordedCommand> {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|recorded| command_name(&recorded.command) == name)
            .cloned()
            .collect()
    }

    pub fn auth_attempts(&self) -> Vec<(String, String, String, String)> {
        self.state.lock().unwrap().auth_attempts.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, address: &str, _timeout: Duration) -> MongoctlResult<Box<dyn Connection>> {
        let mut state = self.state.lock().unwrap();
        state.connects.push(address.to_string());
        if !state.reachable.contains(address) {
            return Err(MongoctlError::connection(address, "connection refused"));
        }

        Ok(Box::new(MockConnection {
            address: address.to_string(),
            state: Arc::clone(&self.state),
            authenticated: false,
        }))
    }
}

struct MockConnection {
    address: String,
    state: Arc<Mutex<MockState>>,
    authenticated: bool,
}

impl MockConnection {
    fn check_access(&self, state: &MockState, db: &str) -> MongoctlResult<()> {
        if !state.reachable.contains(&self.address) {
            return Err(MongoctlError::connection(self.address.as_str(), "connection reset"));
        }
        if state.credentials.contains_key(&self.address) && !self.authenticated {
            return Err(MongoctlError::unauthorized(db, "command requires authentication"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn address(&self) -> &str {
        &self.address
    }

    async fn run_command(&self, db: &str, command: Document) -> MongoctlResult<Document> {
        let mut state = self.state.lock().unwrap();
        let name = command_name(&command);

        if name != "ping" && name != "buildInfo" {
            self.check_access(&state, db)?;
        }
        state.commands.push(RecordedCommand {
            address: self.address.clone(),
            db: db.to_string(),
            command: command.clone(),
        });

        let reply = match name.as_str() {
            "buildInfo" => doc! { "version": "6.0.5", "ok": 1 },
            "listShards" => {
                let shards: Vec<Bson> = state
                    .shards
                    .iter()
                    .map(|(id, host)| Bson::Document(doc! { "_id": id.as_str(), "host": host.as_str() }))
                    .collect();
                doc! { "shards": shards, "ok": 1 }
            }
            "addShard" => {
                let host = command.get_str("addShard").unwrap_or_default().to_string();
                let id = command
                    .get_str("name")
                    .map(str::to_string)
                    .unwrap_or_else(|_| host.clone());
                state.shards.push((id.clone(), host));
                doc! { "shardAdded": id, "ok": 1 }
            }
            "removeShard" => {
                let id = command.get_str("removeShard").unwrap_or_default().to_string();
                match state.remove_replies.pop_front() {
                    Some(reply) => reply,
                    None => {
                        state.shards.retain(|(shard_id, _)| shard_id != &id);
                        doc! { "msg": "removeshard completed successfully", "state": "completed", "shard": id, "ok": 1 }
                    }
                }
            }
            "shutdown" => {
                let address = self.address.clone();
                state.reachable.remove(&address);
                return Err(MongoctlError::connection(address.as_str(), "connection closed by server"));
            }
            _ => doc! { "ok": 1 },
        };
        Ok(reply)
    }

    async fn authenticate(&mut self, db: &str, username: &str, password: &str) -> MongoctlResult<bool> {
        let mut state = self.state.lock().unwrap();
        state.auth_attempts.push((
            self.address.clone(),
            db.to_string(),
            username.to_string(),
            password.to_string(),
        ));

        let accepted = match state.credentials.get(&self.address) {
            Some((user, pass)) => user == username && pass == password,
            None => true,
        };
        if accepted {
            self.authenticated = true;
        }
        Ok(accepted)
    }

    async fn list_collection_names(&self, db: &str) -> MongoctlResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        self.check_access(&state, db)?;
        Ok(vec!["system.version".to_string()])
    }
}
