/// Database Module
///
/// ## Architecture
///
/// - **Connection contract** (`connection.rs`): the `Dao` trait, transaction
///   state, and the backend factory
/// - **Result contract** (`query.rs`): the `ResultSet` trait, the in-memory row
///   cursor, and native status classification
/// - **Backends**: `sqlite.rs` (relational), `directory.rs` (LDAP),
///   `dummy.rs` (in-memory test double)
///
/// ## Error Handling
///
/// Every backend reports failures through `DaoError`.
pub mod connection;
pub mod directory;
pub mod dummy;
pub mod query;
pub mod sqlite;

pub use connection::{open, Backend, Dao, TransactionState};
pub use directory::{DirectoryClient, DirectoryDao, DirectoryEntry, LdapClient};
pub use dummy::{ArrayResult, DummyDao};
pub use query::{classify_status, NativeStatus, QueryOptions, ResultSet, RowCursor, StatusClass};
pub use sqlite::{SqliteDao, StatementResult};
