//! MongoDB connection management with pool configuration and bounded
//! establishment retries.

use std::time::Duration;

use bson::{doc, Document};
use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use mongodb::{Client, Collection, Database};
use tracing::warn;

use crate::{Error, Result};

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed
    pub max_idle_time: Option<Duration>,
    /// Connection timeout
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(5),
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("corral".to_string()),
        }
    }
}

/// Bounded retry policy for connection establishment. Establishment failures
/// are retried with a fixed delay until the budget is exhausted, then the
/// last error is returned.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of retries after the initial attempt.
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 0,
            delay: Duration::from_millis(500),
        }
    }
}

/// A live MongoDB connection bound to the default database named in the
/// connection string.
pub struct Connection {
    client: Client,
    database: Database,
    database_name: String,
}

impl Connection {
    /// Connects with default pool settings and no retries.
    pub async fn connect(uri: &str) -> Result<Self> {
        Self::connect_with(uri, PoolConfig::default(), RetryPolicy::default()).await
    }

    /// Connects with explicit pool configuration and retry policy.
    pub async fn connect_with(uri: &str, config: PoolConfig, retry: RetryPolicy) -> Result<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| Error::Connection(format!("invalid connection string: {}", e)))?;

        if let Some(min) = config.min_pool_size {
            options.min_pool_size = Some(min);
        }
        if let Some(max) = config.max_pool_size {
            options.max_pool_size = Some(max);
        }
        if let Some(idle) = config.max_idle_time {
            options.max_idle_time = Some(idle);
        }
        if let Some(connect) = config.connect_timeout {
            options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = config.server_selection_timeout {
            options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = config.app_name {
            options.app_name = Some(app);
        }

        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        options.server_api = Some(server_api);

        let mut remaining = retry.attempts;
        loop {
            match Self::establish(options.clone()).await {
                Ok(connection) => return Ok(connection),
                Err(err) if remaining > 0 => {
                    warn!(error = %err, remaining, "failed to connect to MongoDB, retrying");
                    remaining -= 1;
                    tokio::time::sleep(retry.delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn establish(options: ClientOptions) -> Result<Self> {
        let client = Client::with_options(options)?;

        let database = client.default_database().ok_or_else(|| {
            Error::Connection("no default database specified in connection string".to_string())
        })?;

        // The driver connects lazily; ping so establishment failures surface
        // here and the retry policy can act on them.
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| Error::Connection(format!("ping failed: {}", e)))?;

        let database_name = database.name().to_string();

        Ok(Self {
            client,
            database,
            database_name,
        })
    }

    /// Get a reference to the client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get a reference to the database
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Get the database name
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Get a collection by name
    pub fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }

    /// Switch to a different database on the same client
    pub fn use_database(&self, name: &str) -> Database {
        self.client.database(name)
    }

    /// Check if the connection is healthy by pinging the server
    pub async fn ping(&self) -> Result<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| Error::Connection(format!("ping failed: {}", e)))?;
        Ok(())
    }
}
