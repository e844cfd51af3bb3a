// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Database configuration.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::database::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_POOL_SIZE};

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database name
    pub database: String,
    /// Database user
    pub username: String,
    /// Database password
    pub password: String,
    /// Connection pool size
    pub pool_size: u32,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Idle timeout (seconds)
    pub idle_timeout: Option<u64>,
    /// Max lifetime (seconds)
    pub max_lifetime: Option<u64>,
    /// Application name
    pub application_name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: crate::database::DEFAULT_DATABASE_NAME.to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: Some(600),
            max_lifetime: Some(1800),
            application_name: "meridian".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Create a new configuration builder
    pub fn builder() -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::default()
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("DATABASE_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("DATABASE_PORT") {
            config.port = port.parse()?;
        }
        if let Ok(database) = std::env::var("DATABASE_NAME") {
            config.database = database;
        }
        if let Ok(username) = std::env::var("DATABASE_USER") {
            config.username = username;
        }
        if let Ok(password) = std::env::var("DATABASE_PASSWORD") {
            config.password = password;
        }
        if let Ok(pool_size) = std::env::var("DATABASE_POOL_SIZE") {
            config.pool_size = pool_size.parse()?;
        }

        Ok(config)
    }

    /// Get connection URL
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?application_name={}",
            self.username, self.password, self.host, self.port, self.database, self.application_name
        )
    }

    /// Get connection URL (without password for logging)
    pub fn connection_url_safe(&self) -> String {
        format!(
            "postgres://{}:****@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }

    /// Get connection timeout as Duration
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout_duration(&self) -> Option<Duration> {
        self.idle_timeout.map(Duration::from_secs)
    }

    /// Get max lifetime as Duration
    pub fn max_lifetime_duration(&self) -> Option<Duration> {
        self.max_lifetime.map(Duration::from_secs)
    }
}

/// Database configuration builder
#[derive(Default)]
pub struct DatabaseConfigBuilder {
    config: DatabaseConfig,
}

impl DatabaseConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = database.into();
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    pub fn pool_size(mut self, size: u32) -> Self {
        self.config.pool_size = size;
        self
    }

    pub fn connect_timeout(mut self, seconds: u64) -> Self {
        self.config.connect_timeout = seconds;
        self
    }

    pub fn build(self) -> DatabaseConfig {
        self.config
    }
}
