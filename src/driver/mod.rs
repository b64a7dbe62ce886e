/// Connection capability consumed by the server model.
///
/// The model never speaks the wire protocol itself: it connects, authenticates,
/// runs administrative commands and lists collections through these traits.
pub mod mongodb;

#[cfg(test)]
pub(crate) mod mock;

use crate::error::MongoctlResult;
use ::mongodb::bson::Document;
use async_trait::async_trait;
use std::time::Duration;

pub use self::mongodb::MongoDriverConnector;

/// Opens connections to a single server address
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `address` (`host:port`), failing with a connection error
    /// if the server does not answer within `timeout`
    async fn connect(&self, address: &str, timeout: Duration) -> MongoctlResult<Box<dyn Connection>>;
}

/// An open connection to one server
#[async_trait]
pub trait Connection: Send + Sync {
    /// Address this connection was opened against
    fn address(&self) -> &str;

    /// Run an administrative command against `db`
    async fn run_command(&self, db: &str, command: Document) -> MongoctlResult<Document>;

    /// Authenticate against `db`; `Ok(false)` means the credentials were rejected
    async fn authenticate(&mut self, db: &str, username: &str, password: &str) -> MongoctlResult<bool>;

    /// List collection names of `db`. Fails with an unauthorized error iff
    /// the database requires authentication.
    async fn list_collection_names(&self, db: &str) -> MongoctlResult<Vec<String>>;
}
