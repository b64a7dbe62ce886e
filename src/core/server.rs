/// A single mongod/mongos process
///
/// `Server` is a transient view over a `ServerDocument`. It resolves which
/// address to talk to, whether the host is this machine, how to authenticate
/// and which version is running. None of the cached state is persisted.
use super::document::{CmdOptions, ServerDocument, ServerKind};
use super::repository::Repository;
use super::{uri_template, Cluster, RunContext};
use crate::auth::Login;
use crate::driver::Connection;
use crate::error::{MongoctlError, MongoctlResult};
use crate::health::HealthStatus;
use crate::utils::{command_name, is_host_local, read_pid_file, resolve_path};
use mongodb::bson::{doc, Document};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use toml::Value;
use tracing::{debug, error, warn};

pub const DEFAULT_PORT: u16 = 27017;
const DEFAULT_SERVER_HOME: &str = "/data/db";

/// Options of `Server::get_db`
#[derive(Debug, Clone)]
pub struct DbOptions {
    /// Skip authentication entirely
    pub no_auth: bool,
    /// Pre-seed the login for the database
    pub username: Option<String>,
    pub password: Option<String>,
    /// Allow the configured number of attempts instead of one
    pub retry: bool,
    /// Never fall back to an admin login
    pub never_auth_with_admin: bool,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            no_auth: false,
            username: None,
            password: None,
            retry: true,
            never_auth_with_admin: false,
        }
    }
}

impl DbOptions {
    pub fn no_auth() -> Self {
        Self {
            no_auth: true,
            ..Default::default()
        }
    }
}

/// A database handle on an open, authorized connection
pub struct Database<'a> {
    connection: &'a dyn Connection,
    name: String,
}

impl Database<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn command(&self, command: Document) -> MongoctlResult<Document> {
        self.connection.run_command(&self.name, command).await
    }

    pub async fn list_collection_names(&self) -> MongoctlResult<Vec<String>> {
        self.connection.list_collection_names(&self.name).await
    }
}

/// `major.minor.patch`; suffixes such as `-rc0` are ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MongoVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl MongoVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl FromStr for MongoVersion {
    type Err = MongoctlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let numeric = s.trim().split(['-', '+', ' ']).next().unwrap_or_default();
        let mut parts = numeric.split('.').map(|part| part.parse::<u32>());

        let invalid = || MongoctlError::configuration(format!("Invalid mongo version '{}'", s));
        let major = parts.next().ok_or_else(invalid)?.map_err(|_| invalid())?;
        let minor = parts.next().transpose().map_err(|_| invalid())?.unwrap_or(0);
        let patch = parts.next().transpose().map_err(|_| invalid())?.unwrap_or(0);
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for MongoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// First version that accepts `--keyFile`
const REPL_KEY_SUPPORTED_VERSION: MongoVersion = MongoVersion::new(2, 0, 0);

pub struct Server {
    document: ServerDocument,
    context: Arc<RunContext>,
    connection: Option<Box<dyn Connection>>,
    /// Databases authenticated on the current connection
    authenticated: HashSet<String>,
    /// Memoized logins; `None` marks a login cleared after a rejection
    logins: HashMap<String, Option<Login>>,
    mongo_version: Option<MongoVersion>,
    connection_address: Option<String>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id())
            .field("address", &self.address())
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

impl Server {
    pub fn new(document: ServerDocument, context: Arc<RunContext>) -> Self {
        Self {
            document,
            context,
            connection: None,
            authenticated: HashSet::new(),
            logins: HashMap::new(),
            mongo_version: None,
            connection_address: None,
        }
    }

    pub fn id(&self) -> &str {
        self.document.id()
    }

    pub fn document(&self) -> &ServerDocument {
        &self.document
    }

    pub fn kind(&self) -> ServerKind {
        self.document.kind
    }

    pub fn description(&self) -> Option<&str> {
        self.document.description.as_deref()
    }

    fn option(&self, name: &str) -> Option<&Value> {
        self.document.cmd_options.get(name)
    }

    fn option_str(&self, name: &str) -> Option<&str> {
        self.option(name).and_then(Value::as_str)
    }

    pub fn port(&self) -> u16 {
        match self.option("port") {
            Some(Value::Integer(port)) => u16::try_from(*port).unwrap_or(DEFAULT_PORT),
            Some(Value::String(port)) => port.parse().unwrap_or(DEFAULT_PORT),
            _ => DEFAULT_PORT,
        }
    }

    /// The configured address, with the port appended when it has none
    pub fn address(&self) -> Option<String> {
        let address = self.document.address.as_deref()?.trim();
        if address.is_empty() {
            return None;
        }
        if address.contains(':') {
            Some(address.to_string())
        } else {
            Some(format!("{}:{}", address, self.port()))
        }
    }

    /// Host part of the configured address
    pub fn host(&self) -> Option<String> {
        self.address().map(|address| match address.rsplit_once(':') {
            Some((host, _)) => host.to_string(),
            None => address.clone(),
        })
    }

    pub fn local_address(&self) -> String {
        format!("localhost:{}", self.port())
    }

    pub fn address_display(&self) -> String {
        self.address().unwrap_or_else(|| self.local_address())
    }

    pub fn is_fork(&self) -> bool {
        self.option("fork").and_then(Value::as_bool).unwrap_or(true)
    }

    pub fn server_home(&self) -> PathBuf {
        let home = self
            .document
            .server_home
            .as_deref()
            .or_else(|| self.option_str("dbpath"))
            .unwrap_or(DEFAULT_SERVER_HOME);
        resolve_path(home)
    }

    pub fn pid_file_path(&self) -> PathBuf {
        self.option_path("pidfilepath", "pid.txt")
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.option_path("logpath", "mongodb.log")
    }

    pub fn key_file_path(&self) -> PathBuf {
        self.option_path("keyFile", "keyFile")
    }

    fn option_path(&self, option: &str, default_name: &str) -> PathBuf {
        match self.option_str(option) {
            Some(path) => resolve_path(path),
            None => self.server_home().join(default_name),
        }
    }

    /// Pid recorded in the pid file, if any
    pub fn pid(&self) -> Option<u32> {
        read_pid_file(&self.pid_file_path())
    }

    /// True when clients must present credentials
    pub fn has_auth_enabled(&self) -> bool {
        let auth = match self.option("auth") {
            Some(Value::Boolean(auth)) => *auth,
            Some(_) => true,
            None => false,
        };
        auth || self.option("keyFile").is_some() || !self.document.seed_users.is_empty()
    }

    pub fn is_assumed_local(&self) -> bool {
        self.context.is_assumed_local(self.id())
    }

    /// True if the configured host is this machine. A server without an
    /// address is local; a host that cannot be resolved is not.
    pub async fn is_local(&self) -> bool {
        let host = match self.host() {
            Some(host) => host,
            None => return true,
        };
        match is_host_local(&host).await {
            Ok(local) => local,
            Err(e) => {
                warn!("Unable to determine whether server '{}' is local: {}", self.id(), e);
                false
            }
        }
    }

    /// True if the server may be reached through `localhost:<port>`
    pub async fn is_use_local(&self) -> bool {
        self.address().is_none() || self.is_assumed_local() || self.is_local().await
    }

    /// Guard for operations that must run on the server's own machine
    pub async fn validate_local_op(&self, operation: &str) -> MongoctlResult<()> {
        if self.is_assumed_local() || self.is_local().await {
            return Ok(());
        }
        Err(MongoctlError::not_local(
            operation.to_string(),
            self.id().to_string(),
            self.host().unwrap_or_default(),
        ))
    }

    /// True if a probe connection to `address` succeeds
    pub async fn has_connectivity_on(&self, address: &str) -> bool {
        let timeout = self.context.settings.probe_timeout;
        match self.context.connector.connect(address, timeout).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Server '{}' is not reachable on {}: {}", self.id(), address, e);
                false
            }
        }
    }

    /// Address used for every connection to this server, resolved once
    pub async fn connection_address(&mut self) -> String {
        if let Some(address) = &self.connection_address {
            return address.clone();
        }

        let address = self.resolve_connection_address().await;
        debug!("Server '{}' resolved to connection address {}", self.id(), address);
        self.connection_address = Some(address.clone());
        address
    }

    async fn resolve_connection_address(&self) -> String {
        let use_local = self.is_use_local().await;
        let local = self.local_address();

        if use_local && self.has_connectivity_on(&local).await {
            return local;
        }

        match self.address() {
            Some(configured) => {
                if !use_local || self.has_connectivity_on(&configured).await {
                    configured
                } else {
                    local
                }
            }
            None => local,
        }
    }

    pub async fn is_online(&mut self) -> bool {
        let address = self.connection_address().await;
        self.has_connectivity_on(&address).await
    }

    pub async fn status(&mut self) -> HealthStatus {
        let address = self.connection_address().await;
        let timeout = self.context.settings.probe_timeout;
        match self.context.connector.connect(&address, timeout).await {
            Ok(_) => HealthStatus::Healthy,
            Err(MongoctlError::Timeout { .. }) => HealthStatus::Timeout,
            Err(e) => HealthStatus::Unhealthy {
                reason: e.to_string(),
            },
        }
    }

    async fn connection(&mut self) -> MongoctlResult<&mut dyn Connection> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                let address = self.connection_address().await;
                self.context
                    .connector
                    .connect(&address, self.context.settings.connect_timeout)
                    .await?
            }
        };
        Ok(&mut **self.connection.insert(connection))
    }

    /// Drop the connection handle and every authentication bound to it
    pub fn disconnect(&mut self) {
        if self.connection.take().is_some() {
            debug!("Disconnected from server '{}'", self.id());
        }
        self.authenticated.clear();
    }

    /// Probe with a fresh, unauthenticated connection whether `dbname`
    /// requires authentication
    pub async fn needs_to_auth(&mut self, dbname: &str) -> bool {
        let address = self.connection_address().await;
        let connection = match self
            .context
            .connector
            .connect(&address, self.context.settings.connect_timeout)
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                debug!("Cannot probe auth of '{}' on server '{}': {}", dbname, self.id(), e);
                return false;
            }
        };

        match connection.list_collection_names(dbname).await {
            Ok(_) => false,
            Err(e) if e.is_unauthorized() => true,
            Err(e) => {
                debug!("Auth probe of '{}' on server '{}' failed: {}", dbname, self.id(), e);
                false
            }
        }
    }

    pub fn set_login_user(&mut self, dbname: &str, username: &str, password: Option<String>) {
        self.logins
            .insert(dbname.to_string(), Some(Login::new(username, password)));
    }

    /// Known login for `dbname`: memoized, then the run's global login, then
    /// for `local` the admin login
    pub fn login_user(&self, dbname: &str) -> Option<Login> {
        match self.logins.get(dbname) {
            Some(login) => login.clone(),
            None => match self.context.global_login_for(dbname) {
                Some(login) => Some(login.clone()),
                None if dbname == "local" => self.login_user("admin"),
                None => None,
            },
        }
    }

    fn read_credentials(&self, dbname: &str) -> MongoctlResult<(String, String)> {
        let login = self.login_user(dbname);
        let credentials = &self.context.credentials;

        let username = match &login {
            Some(login) => login.username.clone(),
            None => credentials.read_username(dbname)?,
        };
        let password = match login.and_then(|login| login.password) {
            Some(password) => password,
            None => match self.document.seed_password(dbname, &username) {
                Some(password) => password.to_string(),
                None => credentials.read_password(&format!(
                    "Enter password for user '{}\\{}'",
                    dbname, username
                ))?,
            },
        };
        Ok((username, password))
    }

    /// Authenticate the current connection on `dbname`. Returns false after
    /// the attempts are exhausted.
    pub async fn authenticate(&mut self, dbname: &str, retry: bool) -> MongoctlResult<bool> {
        let attempts = if retry {
            self.context.settings.auth_attempts.max(1)
        } else {
            1
        };

        for attempt in 1..=attempts {
            let (username, password) = self.read_credentials(dbname)?;
            let accepted = self
                .connection()
                .await?
                .authenticate(dbname, &username, &password)
                .await?;

            if accepted {
                debug!("Authenticated to '{}' on server '{}' as '{}'", dbname, self.id(), username);
                self.logins
                    .insert(dbname.to_string(), Some(Login::new(username, Some(password))));
                self.authenticated.insert(dbname.to_string());
                return Ok(true);
            }

            error!("Invalid login!");
            debug!("Authentication attempt {}/{} to '{}' failed", attempt, attempts, dbname);
            self.logins.insert(dbname.to_string(), None);
        }

        Ok(false)
    }

    async fn ensure_authorized(&mut self, dbname: &str, options: &DbOptions) -> MongoctlResult<()> {
        if options.no_auth {
            return Ok(());
        }

        if let Some(username) = &options.username {
            self.set_login_user(dbname, username, options.password.clone());
        }

        let admin_allowed = !options.never_auth_with_admin && dbname != "admin" && dbname != "local";
        if self.authenticated.contains(dbname) || (admin_allowed && self.authenticated.contains("admin")) {
            return Ok(());
        }
        if options.username.is_none() && !self.needs_to_auth(dbname).await {
            return Ok(());
        }

        let mut admin_tried = false;
        if admin_allowed && self.login_user(dbname).is_none() {
            admin_tried = true;
            if self.authenticate("admin", options.retry).await? {
                return Ok(());
            }
            warn!(
                "Could not authenticate to '{}' through the admin database of server '{}'",
                dbname,
                self.id()
            );
        }

        if self.authenticate(dbname, options.retry).await? {
            return Ok(());
        }

        if admin_allowed && !admin_tried {
            debug!("Falling back to the admin database of server '{}'", self.id());
            if self.authenticate("admin", options.retry).await? {
                return Ok(());
            }
        }

        self.disconnect();
        Err(MongoctlError::authentication(self.id(), dbname))
    }

    /// Open (or reuse) the connection and authorize it for `dbname`
    pub async fn get_db(&mut self, dbname: &str, options: DbOptions) -> MongoctlResult<Database<'_>> {
        self.connection().await?;
        self.ensure_authorized(dbname, &options).await?;

        let connection = self.connection().await?;
        Ok(Database {
            connection,
            name: dbname.to_string(),
        })
    }

    /// Run `command` on `dbname`; a transport failure drops the connection
    pub async fn db_command(&mut self, command: Document, dbname: &str) -> MongoctlResult<Document> {
        debug!("Running '{}' on server '{}'", command_name(&command), self.id());
        let result = match self.get_db(dbname, DbOptions::default()).await {
            Ok(db) => db.command(command).await,
            Err(e) => Err(e),
        };

        if matches!(&result, Err(e) if e.is_connection()) {
            self.disconnect();
        }
        result
    }

    /// Ask the server to shut down. The server closing the connection is
    /// the expected outcome.
    pub async fn shutdown(&mut self, force: bool) -> MongoctlResult<()> {
        let db = self.get_db("admin", DbOptions::default()).await?;
        let result = db.command(doc! { "shutdown": 1, "force": force }).await;
        self.disconnect();

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_connection() => {
                debug!("Server '{}' closed the connection on shutdown", self.id());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Version reported by `buildInfo` when online, else the configured one
    pub async fn mongo_version(&mut self) -> Option<MongoVersion> {
        if self.mongo_version.is_none() {
            let running = if self.is_online().await {
                self.build_info_version().await
            } else {
                None
            };
            self.mongo_version = running.or_else(|| {
                self.document
                    .mongo_version
                    .as_deref()
                    .and_then(|version| version.parse().ok())
            });
        }
        self.mongo_version
    }

    async fn build_info_version(&mut self) -> Option<MongoVersion> {
        let db = self.get_db("admin", DbOptions::no_auth()).await.ok()?;
        match db.command(doc! { "buildInfo": 1 }).await {
            Ok(info) => info.get_str("version").ok().and_then(|v| v.parse().ok()),
            Err(e) => {
                debug!("buildInfo failed: {}", e);
                None
            }
        }
    }

    /// True unless the version is known to predate key files
    pub async fn supports_repl_key(&mut self) -> bool {
        match self.mongo_version().await {
            Some(version) => version >= REPL_KEY_SUPPORTED_VERSION,
            None => true,
        }
    }

    /// The cluster this server is a direct member of
    pub fn cluster(&self, repo: &dyn Repository) -> MongoctlResult<Option<Cluster>> {
        repo.lookup_cluster_by_server(self.id())
    }

    /// Repl key to launch with, if the owning cluster has one and the
    /// version supports it
    pub async fn repl_key(&mut self, repo: &dyn Repository) -> MongoctlResult<Option<String>> {
        let key = match self.cluster(repo)? {
            Some(cluster) => cluster.repl_key().map(str::to_string),
            None => None,
        };
        match key {
            Some(key) if self.supports_repl_key().await => Ok(Some(key)),
            _ => Ok(None),
        }
    }

    /// Command line options to launch this server with
    pub async fn export_cmd_options(
        &mut self,
        overrides: &CmdOptions,
        repo: &dyn Repository,
    ) -> MongoctlResult<CmdOptions> {
        let mut options = self.document.cmd_options.clone();
        options.insert(
            "pidfilepath".to_string(),
            Value::from(self.pid_file_path().display().to_string()),
        );
        for (name, value) in overrides {
            options.insert(name.clone(), value.clone());
        }

        let fork = options.get("fork").and_then(Value::as_bool).unwrap_or(true);
        if fork {
            options.insert("fork".to_string(), Value::Boolean(true));
            if !options.contains_key("logpath") {
                options.insert(
                    "logpath".to_string(),
                    Value::from(self.log_file_path().display().to_string()),
                );
            }
        }

        if self.repl_key(repo).await?.is_some() && !options.contains_key("keyFile") {
            options.insert(
                "keyFile".to_string(),
                Value::from(self.key_file_path().display().to_string()),
            );
        }

        match (self.kind(), self.cluster(repo)?) {
            (ServerKind::Mongos, Some(Cluster::Sharded(cluster))) => {
                options.remove("dbpath");
                options.insert(
                    "configdb".to_string(),
                    Value::from(cluster.config_member_addresses().join(",")),
                );
            }
            (ServerKind::Mongos, _) => {
                return Err(MongoctlError::configuration(format!(
                    "Router '{}' is not a member of any sharded cluster",
                    self.id()
                )));
            }
            (ServerKind::Mongod, cluster) => {
                if !options.contains_key("dbpath") {
                    options.insert(
                        "dbpath".to_string(),
                        Value::from(self.server_home().display().to_string()),
                    );
                }
                if let Some(Cluster::ReplicaSet(replica_set)) = cluster {
                    if !options.contains_key("replSet") {
                        options.insert("replSet".to_string(), Value::from(replica_set.id()));
                    }
                }
            }
        }

        Ok(options)
    }

    pub fn mongo_uri_template(&self, db: Option<&str>) -> String {
        uri_template(&[self.address_display()], db, self.has_auth_enabled())
    }
}
