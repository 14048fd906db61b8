/// SQLite Backend
///
/// Reference relational backend over `rusqlite`. The configured `server` is
/// the database file path; `:memory:` opens a private in-memory database.
use super::connection::{Backend, Dao, TransactionState};
use super::query::{NativeStatus, QueryOptions, ResultSet, RowCursor};
use crate::config::{validate_configuration, DaoConfig};
use crate::core::value::{Params, Row, Value};
use crate::core::{DaoError, Result};
use crate::sql::make_parameter_label;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ErrorCode, Statement, ToSql};
use std::cell::Cell;
use std::time::Duration;
use tracing::{debug, info, warn};

const IN_MEMORY: &str = ":memory:";

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Bool(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
            Value::Int(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Float(x) => ToSqlOutput::Borrowed(ValueRef::Real(*x)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Int(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

/// Maps a driver error onto a SQLSTATE-style status.
///
/// SQLite has no SQLSTATE of its own, so the class is picked from the
/// primary result code and, for the generic `SQLITE_ERROR`, the message.
fn native_status(err: &rusqlite::Error) -> NativeStatus {
    let code = match err {
        rusqlite::Error::SqliteFailure(failure, message) => match failure.code {
            ErrorCode::ConstraintViolation => "23000",
            ErrorCode::TypeMismatch => "22000",
            ErrorCode::TooBig => "22001",
            ErrorCode::CannotOpen | ErrorCode::NotADatabase => "08000",
            ErrorCode::Unknown => {
                let message = message.as_deref().unwrap_or_default();
                if message.contains("syntax error") || message.contains("no such") {
                    "42000"
                } else {
                    "HY000"
                }
            }
            _ => "HY000",
        },
        rusqlite::Error::InvalidParameterName(_) | rusqlite::Error::InvalidParameterCount(..) => {
            "HY093"
        }
        _ => "HY000",
    };
    NativeStatus::new(Some(code), err.to_string())
}

fn prepare_error(err: &rusqlite::Error, text: &str, params: &Params) -> DaoError {
    let status = native_status(err);
    DaoError::query(
        format!(
            "Failed to prepare statement: [{}] {}",
            status.code.as_deref().unwrap_or("unknown"),
            status.message
        ),
        text,
        params,
    )
}

/// Connection adapter over a `rusqlite::Connection`.
pub struct SqliteDao {
    config: DaoConfig,
    id: String,
    handle: Option<Connection>,
    transaction_state: TransactionState,
    last_query_succeeded: Cell<bool>,
}

impl SqliteDao {
    /// Validates `config`; the database is opened on first use.
    pub fn new(config: DaoConfig) -> Result<Self> {
        validate_configuration(&config, Backend::Sqlite.required_keys())?;
        Ok(SqliteDao {
            config,
            id: uuid::Uuid::new_v4().to_string(),
            handle: None,
            transaction_state: TransactionState::default(),
            last_query_succeeded: Cell::new(false),
        })
    }

    /// Shorthand for a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::new(DaoConfig {
            server: Some(IN_MEMORY.to_string()),
            ..Default::default()
        })
    }

    fn path(&self) -> &str {
        self.config.server.as_deref().unwrap_or(IN_MEMORY)
    }

    fn ensure_connected(&mut self) -> Result<()> {
        if self.handle.is_none() {
            self.connect()?;
        }
        Ok(())
    }

    fn handle(&self) -> Result<&Connection> {
        self.handle
            .as_ref()
            .ok_or_else(|| DaoError::Connection("Not connected".to_string()))
    }

    /// Prepares `text`. A driver failure is reported with `params`, the
    /// parameters the caller meant to bind.
    fn prepare<'c>(&'c self, text: &str, params: &Params) -> Result<StatementResult<'c>> {
        debug!(connection_id = %self.id, query = text, "preparing statement");
        let stmt = self
            .handle()?
            .prepare(text)
            .map_err(|e| prepare_error(&e, text, params))?;

        Ok(StatementResult {
            stmt,
            query: text.to_string(),
            connection_id: &self.id,
            in_transaction: self.transaction_state == TransactionState::Active,
            cursor: RowCursor::default(),
            changes: None,
        })
    }

    fn run_transaction_command(&mut self, command: &str) -> Result<()> {
        self.ensure_connected()?;
        self.handle()?
            .execute_batch(command)
            .map_err(|e| DaoError::Transaction(format!("{} failed: {}", command, e)))
    }

    /// Best-effort teardown: roll back, then close. Failures are logged.
    fn teardown(&mut self) -> Result<()> {
        if self.transaction_state == TransactionState::Active {
            if let Some(conn) = &self.handle {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    warn!(connection_id = %self.id, "rollback during disconnect failed: {}", e);
                }
            }
            self.transaction_state = TransactionState::Autocommit;
        }

        if let Some(conn) = self.handle.take() {
            info!(connection_id = %self.id, path = self.path(), "closing SQLite database");
            if let Err((_conn, e)) = conn.close() {
                warn!(connection_id = %self.id, "closing SQLite database failed: {}", e);
                return Err(DaoError::Connection(format!("Failed to close database: {}", e)));
            }
        }
        Ok(())
    }
}

impl Dao for SqliteDao {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn connection_id(&self) -> &str {
        &self.id
    }

    fn connect(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let path = self.path().to_string();
        let conn = if path == IN_MEMORY {
            Connection::open_in_memory()
        } else {
            Connection::open(&path)
        }
        .map_err(|e| DaoError::Connection(format!("Unable to open {}: {}", path, e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| DaoError::Connection(format!("Unable to initialize {}: {}", path, e)))?;

        if let Some(secs) = self.config.timeout_secs {
            conn.busy_timeout(Duration::from_secs(secs))
                .map_err(|e| DaoError::Connection(format!("Unable to set busy timeout: {}", e)))?;
        }

        info!(connection_id = %self.id, path = %path, "opened SQLite database");
        self.handle = Some(conn);
        self.transaction_state = TransactionState::Autocommit;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.teardown()
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    fn transaction_state(&self) -> TransactionState {
        self.transaction_state
    }

    fn query<'a>(
        &'a mut self,
        text: &str,
        params: &Params,
        options: &QueryOptions,
    ) -> Result<Box<dyn ResultSet + 'a>> {
        self.last_query_succeeded.set(false);
        let params = options.merged_params(params);
        self.ensure_connected()?;

        let this: &'a SqliteDao = self;
        let mut result = this.prepare(text, &params)?;
        result.execute(&params)?;
        this.last_query_succeeded.set(true);
        Ok(Box::new(result))
    }

    fn get_statement<'a>(&'a mut self, text: &str) -> Result<Box<dyn ResultSet + 'a>> {
        self.ensure_connected()?;
        let this: &'a SqliteDao = self;
        Ok(Box::new(this.prepare(text, &Params::new())?))
    }

    fn query_succeeded(&self) -> bool {
        self.last_query_succeeded.get()
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.transaction_state.ensure_can_begin()?;
        self.ensure_connected()?;
        if !self.handle()?.is_autocommit() {
            return Err(DaoError::Transaction(
                "Transaction already in progress".to_string(),
            ));
        }
        self.run_transaction_command("BEGIN")?;
        debug!(connection_id = %self.id, "transaction started");
        self.transaction_state = TransactionState::Active;
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<()> {
        self.transaction_state.ensure_active("commit")?;
        self.run_transaction_command("COMMIT")?;
        debug!(connection_id = %self.id, "transaction committed");
        self.transaction_state = TransactionState::Autocommit;
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        self.transaction_state.ensure_active("rollback")?;
        // The flag is cleared even if SQLite already rolled back on its own
        let outcome = self.run_transaction_command("ROLLBACK");
        self.transaction_state = TransactionState::Autocommit;
        debug!(connection_id = %self.id, "transaction rolled back");
        outcome
    }

    fn last_insert_id(&self) -> Option<i64> {
        self.handle.as_ref().map(Connection::last_insert_rowid)
    }
}

impl Drop for SqliteDao {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

/// Result adapter over a prepared `rusqlite::Statement`.
///
/// `rusqlite` rows borrow the statement mutably, so the rows produced by
/// `execute` are drained into the cursor before it returns. The statement is
/// kept so the result can be executed again with new parameters.
pub struct StatementResult<'conn> {
    stmt: Statement<'conn>,
    query: String,
    connection_id: &'conn str,
    in_transaction: bool,
    cursor: RowCursor,
    changes: Option<u64>,
}

impl StatementResult<'_> {
    /// Binds every named parameter of the statement from `params`.
    ///
    /// Parameters missing from `params`, extra entries in `params`, and
    /// positional `?` markers are all rejected.
    fn bind(&mut self, params: &Params) -> rusqlite::Result<()> {
        let params: Params = params
            .iter()
            .map(|(k, v)| (make_parameter_label(k), v.clone()))
            .collect();

        let expected = self.stmt.parameter_count();
        for index in 1..=expected {
            let name = self
                .stmt
                .parameter_name(index)
                .ok_or(rusqlite::Error::InvalidParameterCount(params.len(), expected))?
                .to_string();
            let value = params
                .get(&name)
                .ok_or_else(|| rusqlite::Error::InvalidParameterName(name.clone()))?;
            self.stmt.raw_bind_parameter(index, value)?;
        }

        if let Some(extra) = params.keys().find(|k| matches!(self.stmt.parameter_index(k), Ok(None))) {
            return Err(rusqlite::Error::InvalidParameterName(extra.to_string()));
        }
        Ok(())
    }

    fn run(&mut self, params: &Params) -> rusqlite::Result<()> {
        self.bind(params)?;

        if self.stmt.column_count() == 0 {
            let changed = self.stmt.raw_execute()?;
            self.changes = Some(changed as u64);
            self.cursor.reset(Vec::new());
            return Ok(());
        }

        let columns: Vec<String> = self
            .stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        let mut buffered = Vec::new();
        let mut rows = self.stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut record = Row::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                record.insert(column.clone(), Value::from(row.get_ref(i)?));
            }
            buffered.push(record);
        }
        drop(rows);

        self.changes = None;
        self.cursor.reset(buffered);
        Ok(())
    }
}

impl ResultSet for StatementResult<'_> {
    fn execute(&mut self, params: &Params) -> Result<()> {
        debug!(
            connection_id = self.connection_id,
            in_transaction = self.in_transaction,
            query = %self.query,
            "executing statement"
        );
        let status = match self.run(params) {
            Ok(()) => NativeStatus::success(),
            Err(e) => {
                self.cursor.reset(Vec::new());
                native_status(&e)
            }
        };
        status.check(&self.query, params)
    }

    fn current(&self) -> Option<Row> {
        self.cursor.current()
    }

    fn fetch(&mut self) -> Option<Row> {
        self.cursor.fetch()
    }

    fn valid(&self) -> bool {
        self.cursor.valid()
    }

    fn to_array(&mut self) -> Vec<Row> {
        self.cursor.remaining()
    }

    /// Rows changed by INSERT, UPDATE or DELETE; `None` for statements that
    /// return rows.
    fn num_rows(&self) -> Option<u64> {
        self.changes
    }

    fn query_text(&self) -> &str {
        &self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> SqliteDao {
        let mut dao = SqliteDao::in_memory().unwrap();
        dao.connect().unwrap();
        dao.handle()
            .unwrap()
            .execute_batch(
                "
                CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT UNIQUE, score REAL);
                INSERT INTO users (name, score) VALUES ('alice', 1.5);
                INSERT INTO users (name, score) VALUES ('bob', NULL);
                ",
            )
            .unwrap();
        dao
    }

    fn params<const N: usize>(pairs: [(&str, Value); N]) -> Params {
        pairs.into_iter().collect()
    }

    #[test]
    fn test_query_returns_rows_in_column_order() {
        let mut dao = seeded();
        let mut result = dao
            .query("SELECT id, name, score FROM users ORDER BY id", &Params::new(), &QueryOptions::new())
            .unwrap();

        let rows = result.to_array();
        assert_eq!(rows.len(), 2);
        let keys: Vec<&str> = rows[0].keys().collect();
        assert_eq!(keys, vec!["id", "name", "score"]);
        assert_eq!(rows[0].get("name"), Some(&Value::from("alice")));
        assert!(rows[1].get("score").unwrap().is_null());
        assert_eq!(result.num_rows(), None);
    }

    #[test]
    fn test_lazy_connect_on_query() {
        let mut dao = SqliteDao::in_memory().unwrap();
        assert!(!dao.is_connected());
        dao.query("SELECT 1 AS one", &Params::new(), &QueryOptions::new())
            .unwrap();
        assert!(dao.is_connected());
        assert!(dao.query_succeeded());
    }

    #[test]
    fn test_named_parameters_with_and_without_colon() {
        let mut dao = seeded();
        let mut result = dao
            .query(
                "SELECT name FROM users WHERE id = :id",
                &params([("id", Value::from(2))]),
                &QueryOptions::new(),
            )
            .unwrap();
        assert_eq!(result.fetch().unwrap().get("name"), Some(&Value::from("bob")));
        assert!(result.fetch().is_none());
    }

    #[test]
    fn test_options_params_channel() {
        let mut dao = seeded();
        let options = QueryOptions::new().with_params(params([(":name", Value::from("alice"))]));
        let mut result = dao
            .query("SELECT id FROM users WHERE name = :name", &Params::new(), &options)
            .unwrap();
        assert_eq!(result.fetch().unwrap().get("id"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_mutation_reports_affected_rows_and_insert_id() {
        let mut dao = seeded();
        {
            let result = dao
                .query(
                    "INSERT INTO users (name, score) VALUES (:name, :score)",
                    &params([(":name", Value::from("carol")), (":score", Value::from(3.0))]),
                    &QueryOptions::new(),
                )
                .unwrap();
            assert_eq!(result.num_rows(), Some(1));
            assert!(!result.valid());
        }
        assert_eq!(dao.last_insert_id(), Some(3));

        let result = dao
            .query("UPDATE users SET score = 0", &Params::new(), &QueryOptions::new())
            .unwrap();
        assert_eq!(result.num_rows(), Some(3));
    }

    #[test]
    fn test_missing_parameter_is_a_query_error() {
        let mut dao = seeded();
        let err = dao
            .query("SELECT * FROM users WHERE id = :id", &Params::new(), &QueryOptions::new())
            .err()
            .expect("missing parameter should fail");
        match err {
            DaoError::Query { message, query, .. } => {
                assert!(message.contains("HY093"));
                assert_eq!(query, "SELECT * FROM users WHERE id = :id");
            }
            other => panic!("Expected Query error, got {:?}", other),
        }
        assert!(!dao.query_succeeded());
    }

    #[test]
    fn test_extra_parameter_is_a_query_error() {
        let mut dao = seeded();
        let result = dao.query(
            "SELECT * FROM users WHERE id = :id",
            &params([(":id", Value::from(1)), (":other", Value::from(2))]),
            &QueryOptions::new(),
        );
        assert!(matches!(result, Err(DaoError::Query { .. })));
    }

    #[test]
    fn test_syntax_error_fails_at_prepare() {
        let mut dao = seeded();
        match dao.get_statement("SELEC nothing") {
            Err(DaoError::Query { message, .. }) => assert!(message.contains("prepare")),
            Err(other) => panic!("Expected Query error, got {:?}", other),
            Ok(_) => panic!("Expected Query error"),
        };
    }

    #[test]
    fn test_malformed_query_keeps_caller_params() {
        let mut dao = seeded();
        let err = dao
            .query(
                "SELEC * FROM users WHERE id = :id",
                &params([(":id", Value::from(1))]),
                &QueryOptions::new(),
            )
            .err()
            .expect("malformed statement should fail");
        match err {
            DaoError::Query { message, query, params } => {
                assert!(message.contains("42000"));
                assert_eq!(query, "SELEC * FROM users WHERE id = :id");
                assert_eq!(params, r#"{":id":1}"#);
            }
            other => panic!("Expected Query error, got {:?}", other),
        }
        assert!(!dao.query_succeeded());
    }

    #[test]
    fn test_constraint_violation_classified() {
        let mut dao = seeded();
        let err = dao
            .query(
                "INSERT INTO users (name) VALUES (:name)",
                &params([(":name", Value::from("alice"))]),
                &QueryOptions::new(),
            )
            .err()
            .expect("duplicate insert should fail");
        match err {
            DaoError::Query { message, .. } => {
                assert!(message.contains("23000"));
                assert!(message.contains("VALUES ('alice')"));
            }
            other => panic!("Expected Query error, got {:?}", other),
        }
    }

    #[test]
    fn test_statement_can_be_reexecuted() {
        let mut dao = seeded();
        let mut stmt = dao.get_statement("SELECT name FROM users WHERE id = :id").unwrap();
        assert!(!stmt.valid());

        stmt.execute(&params([(":id", Value::from(1))])).unwrap();
        assert_eq!(stmt.current().unwrap().get("name"), Some(&Value::from("alice")));

        stmt.execute(&params([(":id", Value::from(2))])).unwrap();
        assert_eq!(stmt.fetch().unwrap().get("name"), Some(&Value::from("bob")));
        assert!(!stmt.valid());
    }

    #[test]
    fn test_transactions() {
        let mut dao = seeded();
        assert!(matches!(dao.commit_transaction(), Err(DaoError::Transaction(_))));
        assert!(matches!(dao.rollback_transaction(), Err(DaoError::Transaction(_))));

        dao.begin_transaction().unwrap();
        assert!(matches!(dao.begin_transaction(), Err(DaoError::Transaction(_))));
        dao.query("DELETE FROM users", &Params::new(), &QueryOptions::new())
            .unwrap();
        dao.rollback_transaction().unwrap();

        let mut result = dao
            .query("SELECT COUNT(*) AS n FROM users", &Params::new(), &QueryOptions::new())
            .unwrap();
        assert_eq!(result.fetch().unwrap().get("n"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_commit_persists() {
        let mut dao = seeded();
        dao.begin_transaction().unwrap();
        dao.query("DELETE FROM users WHERE id = 1", &Params::new(), &QueryOptions::new())
            .unwrap();
        dao.commit_transaction().unwrap();
        assert!(!dao.in_transaction());

        let mut result = dao
            .query("SELECT COUNT(*) AS n FROM users", &Params::new(), &QueryOptions::new())
            .unwrap();
        assert_eq!(result.fetch().unwrap().get("n"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_disconnect_rolls_back_open_transaction() {
        let mut dao = seeded();
        dao.begin_transaction().unwrap();
        dao.disconnect().unwrap();
        assert!(!dao.is_connected());
        assert!(!dao.in_transaction());
        assert_eq!(dao.last_insert_id(), None);

        // Never-connected and already-disconnected are both fine
        dao.disconnect().unwrap();
        SqliteDao::in_memory().unwrap().disconnect().unwrap();
    }

    #[test]
    fn test_unopenable_path_is_a_connection_error() {
        let mut dao = SqliteDao::new(DaoConfig {
            server: Some("/nonexistent/path/database.db".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(dao.connect(), Err(DaoError::Connection(_))));
    }

    #[test]
    fn test_escape_col_name() {
        let dao = SqliteDao::in_memory().unwrap();
        assert_eq!(dao.escape_col_name("order"), "`order`");
    }
}
