/// MongoDB driver backed connection capability

use super::{Connection, Connector};
use crate::error::{MongoctlError, MongoctlResult};
use crate::utils::command_name;
use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::error::{Error as DriverError, ErrorKind};
use mongodb::options::{ClientOptions, Credential};
use mongodb::Client;
use std::time::Duration;
use tracing::debug;

/// Error code returned by mongod/mongos for unauthorized operations
const UNAUTHORIZED_CODE: i32 = 13;

const APP_NAME: &str = "mongoctl";

/// Connector using the official driver with a direct (non-discovering) topology
#[derive(Debug, Clone, Default)]
pub struct MongoDriverConnector;

impl MongoDriverConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for MongoDriverConnector {
    async fn connect(&self, address: &str, timeout: Duration) -> MongoctlResult<Box<dyn Connection>> {
        debug!("Connecting to {}", address);
        let client = new_client(address, timeout, None).await?;

        // The driver connects lazily; ping to prove the server answers.
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| MongoctlError::connection(address.to_string(), e.to_string()))?;

        Ok(Box::new(MongoDriverConnection {
            address: address.to_string(),
            timeout,
            client,
        }))
    }
}

/// Connection holding a driver client bound to one address
pub struct MongoDriverConnection {
    address: String,
    timeout: Duration,
    client: Client,
}

impl MongoDriverConnection {
    fn convert_error(&self, db: &str, command: &str, err: DriverError) -> MongoctlError {
        match err.kind.as_ref() {
            ErrorKind::Command(command_error) if command_error.code == UNAUTHORIZED_CODE => {
                MongoctlError::unauthorized(db.to_string(), command_error.message.clone())
            }
            ErrorKind::Command(command_error) => {
                MongoctlError::command(command.to_string(), command_error.message.clone())
            }
            ErrorKind::Authentication { message, .. } => {
                MongoctlError::unauthorized(db.to_string(), message.clone())
            }
            ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. } => {
                MongoctlError::connection(self.address.clone(), err.to_string())
            }
            _ => {
                let message = err.to_string();
                if message.contains("authoriz") || message.contains("requires authentication") {
                    MongoctlError::unauthorized(db.to_string(), message)
                } else {
                    MongoctlError::command(command.to_string(), message)
                }
            }
        }
    }
}

#[async_trait]
impl Connection for MongoDriverConnection {
    fn address(&self) -> &str {
        &self.address
    }

    async fn run_command(&self, db: &str, command: Document) -> MongoctlResult<Document> {
        let name = command_name(&command);
        self.client
            .database(db)
            .run_command(command)
            .await
            .map_err(|e| self.convert_error(db, &name, e))
    }

    async fn authenticate(&mut self, db: &str, username: &str, password: &str) -> MongoctlResult<bool> {
        let mut credential = Credential::default();
        credential.username = Some(username.to_string());
        credential.password = Some(password.to_string());
        credential.source = Some(db.to_string());

        let client = new_client(&self.address, self.timeout, Some(credential)).await?;
        match client.database(db).run_command(doc! { "ping": 1 }).await {
            Ok(_) => {
                self.client = client;
                Ok(true)
            }
            Err(e) if matches!(e.kind.as_ref(), ErrorKind::Authentication { .. }) => {
                debug!("Authentication as '{}' on '{}' rejected: {}", username, db, e);
                Ok(false)
            }
            Err(e) => Err(self.convert_error(db, "authenticate", e)),
        }
    }

    async fn list_collection_names(&self, db: &str) -> MongoctlResult<Vec<String>> {
        self.client
            .database(db)
            .list_collection_names()
            .await
            .map_err(|e| self.convert_error(db, "listCollections", e))
    }
}

async fn new_client(
    address: &str,
    timeout: Duration,
    credential: Option<Credential>,
) -> MongoctlResult<Client> {
    let uri = format!("mongodb://{}/", address);
    let mut options = ClientOptions::parse(&uri)
        .await
        .map_err(|e| MongoctlError::connection(address.to_string(), e.to_string()))?;

    options.app_name = Some(APP_NAME.to_string());
    options.direct_connection = Some(true);
    options.connect_timeout = Some(timeout);
    options.server_selection_timeout = Some(timeout);
    options.credential = credential;

    Client::with_options(options)
        .map_err(|e| MongoctlError::connection(address.to_string(), e.to_string()))
}
