use crate::core::db::Backend;
use crate::core::value::Row;
use crate::core::{DaoError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Connection configuration, shared by every backend.
///
/// Which keys are required depends on the backend; see
/// [`Backend::required_keys`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaoConfig {
    /// Backend name: `sqlite`, `ldap` or `dummy`
    pub driver: Option<String>,
    /// Host name, or the database file path for SQLite
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "database")]
    pub dbname: Option<String>,
    pub port: Option<u16>,
    /// Directory search root
    pub base_dn: Option<String>,
    /// Directory domain used for user binds
    pub domain: Option<String>,
    /// Use `ldaps://` for directory connections
    #[serde(default)]
    pub use_tls: bool,
    /// Driver-level timeout, passed through untouched
    pub timeout_secs: Option<u64>,
    /// Canned rows returned by the dummy backend
    pub testdata: Option<Vec<Row>>,
}

impl DaoConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolves the `driver` key into a backend.
    pub fn backend(&self) -> Result<Backend> {
        match self.driver.as_deref() {
            Some(name) => name.parse(),
            None => Err(DaoError::Config("driver is required".to_string())),
        }
    }

    fn has(&self, key: ConfigKey) -> bool {
        fn present(v: &Option<String>) -> bool {
            v.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
        }
        match key {
            ConfigKey::Server => present(&self.server),
            ConfigKey::Username => present(&self.username),
            ConfigKey::Password => self.password.is_some(),
            ConfigKey::Port => self.port.is_some(),
        }
    }
}

/// Configuration keys subject to validation, in checking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigKey {
    Server,
    Username,
    Password,
    Port,
}

impl ConfigKey {
    /// Requirements of a network relational backend.
    pub const RELATIONAL_NETWORK: &'static [ConfigKey] =
        &[ConfigKey::Server, ConfigKey::Username, ConfigKey::Password];

    pub fn name(&self) -> &'static str {
        match self {
            ConfigKey::Server => "server",
            ConfigKey::Username => "username",
            ConfigKey::Password => "password",
            ConfigKey::Port => "port",
        }
    }
}

/// Checks that every key in `required` is present.
///
/// Keys are always checked in the order server, username, password, port,
/// whatever order `required` lists them in, and the first missing one is
/// reported.
pub fn validate_configuration(config: &DaoConfig, required: &[ConfigKey]) -> Result<()> {
    let mut keys = required.to_vec();
    keys.sort();

    match keys.into_iter().find(|key| !config.has(*key)) {
        Some(missing) => Err(DaoError::Connection(format!(
            "missing required configuration: {}",
            missing.name()
        ))),
        None => Ok(()),
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = dbadapt::config::load_config("dao.toml").expect("Failed to load config");
/// println!("{:?}", config.driver);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DaoConfig> {
    let content = fs::read_to_string(path)?;
    DaoConfig::from_toml_str(&content)
}
