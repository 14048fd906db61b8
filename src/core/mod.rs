/// Core Module
///
/// The connection and result contracts, the backends implementing them, and
/// the value and error types they share.

pub mod db;
pub mod error;
pub mod value;

// Re-export commonly used types for convenience
pub use error::{DaoError, Result};
