/// Connection Management Module
///
/// This module defines the contract every backend implements, the
/// transaction state machine shared between them, and the factory that picks
/// a backend from configuration.
use super::directory::DirectoryDao;
use super::dummy::DummyDao;
use super::query::{QueryOptions, ResultSet};
use super::sqlite::SqliteDao;
use crate::config::{ConfigKey, DaoConfig};
use crate::core::value::{Params, ValueMap};
use crate::core::{DaoError, Result};
use crate::sql::{self, Dialect, ParameterizedComponents};
use std::fmt;
use std::str::FromStr;

/// Represents database transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// No active transaction (autocommit mode)
    #[default]
    Autocommit,
    /// Transaction in progress
    Active,
}

impl TransactionState {
    /// Fails if a transaction is already in progress.
    pub fn ensure_can_begin(&self) -> Result<()> {
        match self {
            TransactionState::Active => Err(DaoError::Transaction(
                "Transaction already in progress".to_string(),
            )),
            TransactionState::Autocommit => Ok(()),
        }
    }

    /// Fails unless a transaction is in progress.
    pub fn ensure_active(&self, operation: &str) -> Result<()> {
        match self {
            TransactionState::Active => Ok(()),
            TransactionState::Autocommit => Err(DaoError::Transaction(format!(
                "Cannot {}: no transaction in progress",
                operation
            ))),
        }
    }
}

/// Available backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Sqlite,
    Directory,
    Dummy,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::Directory => "ldap",
            Backend::Dummy => "dummy",
        }
    }

    /// Configuration keys the backend cannot open a connection without.
    pub fn required_keys(&self) -> &'static [ConfigKey] {
        match self {
            Backend::Sqlite => &[ConfigKey::Server],
            Backend::Directory => &[ConfigKey::Server, ConfigKey::Port],
            Backend::Dummy => &[],
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Backend::Sqlite | Backend::Dummy => Dialect::Backtick,
            Backend::Directory => Dialect::Plain,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = DaoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Backend::Sqlite),
            "ldap" | "directory" => Ok(Backend::Directory),
            "dummy" | "test" => Ok(Backend::Dummy),
            other => Err(DaoError::Config(format!("Unsupported driver: {}", other))),
        }
    }
}

/// The data-access contract implemented by every backend.
///
/// A connection owns one native handle, opened lazily by the first `query`
/// or `get_statement` and released by `disconnect` or drop. Results borrow
/// the connection, so at most one result is alive per connection.
pub trait Dao {
    fn backend(&self) -> Backend;

    /// Identifier attached to this connection's log events
    fn connection_id(&self) -> &str;

    fn dialect(&self) -> Dialect {
        self.backend().dialect()
    }

    /// Opens the native handle. A no-op when already connected.
    fn connect(&mut self) -> Result<()>;

    /// Rolls back any open transaction and releases the native handle.
    /// Safe to call when never connected.
    fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn transaction_state(&self) -> TransactionState;

    fn in_transaction(&self) -> bool {
        self.transaction_state() == TransactionState::Active
    }

    /// Prepares and executes `text`, returning the executed result.
    ///
    /// `options.params` is merged under `params`. Any failure is reported as
    /// `DaoError::Query` carrying the statement and parameters, except for
    /// connection failures during the lazy connect.
    fn query<'a>(
        &'a mut self,
        text: &str,
        params: &Params,
        options: &QueryOptions,
    ) -> Result<Box<dyn ResultSet + 'a>>;

    /// Prepares `text` without executing it.
    fn get_statement<'a>(&'a mut self, text: &str) -> Result<Box<dyn ResultSet + 'a>>;

    /// Whether the most recent `query` call completed.
    fn query_succeeded(&self) -> bool;

    fn begin_transaction(&mut self) -> Result<()>;

    fn commit_transaction(&mut self) -> Result<()>;

    fn rollback_transaction(&mut self) -> Result<()>;

    /// Row id or sequence value of the last insert.
    ///
    /// `None` where the backend has no such concept. The value means
    /// different things on different backends.
    fn last_insert_id(&self) -> Option<i64>;

    /// Quotes an identifier for this backend.
    fn escape_col_name(&self, name: &str) -> String {
        sql::escape_column_name(self.dialect(), name)
    }

    fn generate_parameterized_components(&self, data: &ValueMap) -> ParameterizedComponents {
        sql::generate_parameterized_components(self.dialect(), data)
    }

    fn generate_pagination(&self, page_size: Option<u64>, page: Option<u64>) -> String {
        sql::generate_pagination(page_size, page)
    }

    fn generate_sort(&self, columns: &[(&str, &str)], prepend: Option<&str>) -> String {
        sql::generate_sort(columns.iter().copied(), prepend)
    }
}

/// Builds the backend named by `config.driver`.
///
/// Configuration is validated here; no connection is opened until first use.
pub fn open(config: DaoConfig) -> Result<Box<dyn Dao>> {
    match config.backend()? {
        Backend::Sqlite => Ok(Box::new(SqliteDao::new(config)?)),
        Backend::Directory => Ok(Box::new(DirectoryDao::new(config)?)),
        Backend::Dummy => Ok(Box::new(DummyDao::new(config)?)),
    }
}
