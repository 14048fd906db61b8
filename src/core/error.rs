/// Error Module
///
/// Every backend translates its native failures into one of the variants
/// below, so callers can match on the kind of failure without knowing which
/// driver produced it.
use thiserror::Error;

/// Error type shared by every connection and result adapter.
///
/// The four data-access kinds mirror the lifecycle of a connection:
/// - opening the native handle or validating configuration (`Connection`)
/// - preparing or executing a statement (`Query`)
/// - transaction misuse (`Transaction`)
/// - backends that cannot do transactions at all (`TransactionNotSupported`)
#[derive(Error, Debug)]
pub enum DaoError {
    /// Opening the native handle failed, or required configuration is absent
    #[error("Connection error: {0}")]
    Connection(String),

    /// Statement preparation or execution failed.
    ///
    /// `params` is the rendered parameter list of the failing call.
    #[error("Query error: {message} [query: {query}]")]
    Query {
        message: String,
        query: String,
        params: String,
    },

    /// Beginning while active, or committing/rolling back while inactive
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The backend has no transaction support
    #[error("Transactions not supported: {0}")]
    TransactionNotSupported(String),

    /// Configuration files and driver selection
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaoError {
    /// Builds a query error carrying the statement and its parameters.
    pub fn query(message: impl Into<String>, query: &str, params: impl ToString) -> Self {
        DaoError::Query {
            message: message.into(),
            query: query.to_string(),
            params: params.to_string(),
        }
    }
}

impl From<toml::de::Error> for DaoError {
    fn from(err: toml::de::Error) -> Self {
        DaoError::Config(err.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, DaoError>;
