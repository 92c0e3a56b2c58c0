//! Environment-driven defaults.

use std::time::Duration;

use anyhow::{Context, Result};
use fromenv::FromEnv;

use crate::dialect::Dialect;

/// Defaults applied by [`crate::Mappings::from_config`].
#[derive(Debug, Clone, FromEnv)]
pub struct CrudConfig {
    /// Dialect used for statements built without an explicit dialect.
    #[env(from = "CRUD_DIALECT", default = "postgresql")]
    pub dialect: String,

    /// Command timeout in seconds; `0` leaves the executor's default.
    #[env(from = "CRUD_COMMAND_TIMEOUT_SECS", default = "30")]
    pub command_timeout_secs: String,

    /// Upper bound on the number of entities in one joined statement.
    #[env(from = "CRUD_MAX_JOINS", default = "16")]
    pub max_joins: String,
}

impl CrudConfig {
    /// Loads the configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the environment cannot be read.
    pub fn load() -> Result<Self> {
        Self::from_env().finalize().context("issue loading crud configuration")
    }

    /// # Errors
    ///
    /// Returns an error for unknown dialect names.
    pub fn dialect(&self) -> Result<Dialect> {
        self.dialect.parse().context("parsing CRUD_DIALECT")
    }

    /// # Errors
    ///
    /// Returns an error when the value is not a whole number of seconds.
    pub fn command_timeout(&self) -> Result<Option<Duration>> {
        let secs: u64 = self.command_timeout_secs.trim().parse().context("parsing CRUD_COMMAND_TIMEOUT_SECS")?;
        Ok((secs > 0).then(|| Duration::from_secs(secs)))
    }

    /// # Errors
    ///
    /// Returns an error when the value is not a positive number.
    pub fn max_joins(&self) -> Result<usize> {
        let max_joins: usize = self.max_joins.trim().parse().context("parsing CRUD_MAX_JOINS")?;
        anyhow::ensure!(max_joins > 0, "CRUD_MAX_JOINS must be positive");
        Ok(max_joins)
    }
}

impl Default for CrudConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::PostgreSql.to_string(),
            command_timeout_secs: "30".to_string(),
            max_joins: "16".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_values() {
        let config = CrudConfig::default();
        assert_eq!(config.dialect().unwrap(), Dialect::PostgreSql);
        assert_eq!(config.command_timeout().unwrap(), Some(Duration::from_secs(30)));
        assert_eq!(config.max_joins().unwrap(), 16);
    }

    #[test]
    fn invalid_values() {
        let config = CrudConfig {
            dialect: "oracle".to_string(),
            command_timeout_secs: "0".to_string(),
            max_joins: "0".to_string(),
        };
        config.dialect().unwrap_err();
        assert_eq!(config.command_timeout().unwrap(), None);
        config.max_joins().unwrap_err();
    }
}
