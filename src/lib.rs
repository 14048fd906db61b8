// Core infrastructure modules
pub mod core;

// Supporting modules
pub mod config;
pub mod logging;
pub mod sql;

#[cfg(test)]
pub mod test_utils;


pub use crate::config::{load_config, DaoConfig};
pub use crate::core::db::{open, Backend, Dao, QueryOptions, ResultSet};
pub use crate::core::value::{Params, Row, Value};
pub use crate::core::{DaoError, Result};
