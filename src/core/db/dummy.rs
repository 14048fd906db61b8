/// In-Memory Test Double
///
/// `DummyDao` behaves like a connection without talking to anything. Every
/// query returns the configured `testdata` rows, or the rows passed through
/// `QueryOptions::testdata` for that call.
use super::connection::{Backend, Dao, TransactionState};
use super::query::{NativeStatus, QueryOptions, ResultSet, RowCursor};
use crate::config::{validate_configuration, DaoConfig};
use crate::core::value::{Params, Row};
use crate::core::Result;
use tracing::debug;

/// A statement the dummy backend was asked to run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub query: String,
    pub params: Params,
}

pub struct DummyDao {
    id: String,
    testdata: Vec<Row>,
    connected: bool,
    transaction_state: TransactionState,
    last_query_succeeded: bool,
    executed: Vec<ExecutedStatement>,
}

impl DummyDao {
    pub fn new(config: DaoConfig) -> Result<Self> {
        validate_configuration(&config, Backend::Dummy.required_keys())?;
        Ok(Self::from_rows(config.testdata.unwrap_or_default()))
    }

    /// A dummy connection returning `rows` for every query.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self::from_rows(rows)
    }

    fn from_rows(testdata: Vec<Row>) -> Self {
        DummyDao {
            id: uuid::Uuid::new_v4().to_string(),
            testdata,
            connected: false,
            transaction_state: TransactionState::default(),
            last_query_succeeded: false,
            executed: Vec::new(),
        }
    }

    /// Statements run through `query`, oldest first.
    pub fn executed(&self) -> &[ExecutedStatement] {
        &self.executed
    }
}

impl Dao for DummyDao {
    fn backend(&self) -> Backend {
        Backend::Dummy
    }

    fn connection_id(&self) -> &str {
        &self.id
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.transaction_state = TransactionState::Autocommit;
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
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
        self.last_query_succeeded = false;
        let params = options.merged_params(params);
        self.connect()?;

        self.executed.push(ExecutedStatement {
            query: text.to_string(),
            params: params.clone(),
        });

        let rows = options
            .testdata
            .clone()
            .unwrap_or_else(|| self.testdata.clone());
        let mut result = ArrayResult::new(text, rows);
        if let Some(code) = &options.status {
            result = result.with_status(NativeStatus::new(Some(code.as_str()), "simulated status"));
        }

        result.execute(&params)?;
        self.last_query_succeeded = true;
        Ok(Box::new(result))
    }

    fn get_statement<'a>(&'a mut self, text: &str) -> Result<Box<dyn ResultSet + 'a>> {
        self.connect()?;
        Ok(Box::new(ArrayResult::new(text, self.testdata.clone())))
    }

    fn query_succeeded(&self) -> bool {
        self.last_query_succeeded
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.transaction_state.ensure_can_begin()?;
        self.transaction_state = TransactionState::Active;
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<()> {
        self.transaction_state.ensure_active("commit")?;
        self.transaction_state = TransactionState::Autocommit;
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        self.transaction_state.ensure_active("rollback")?;
        self.transaction_state = TransactionState::Autocommit;
        Ok(())
    }

    fn last_insert_id(&self) -> Option<i64> {
        None
    }
}

/// Result adapter over rows that are already in memory.
///
/// Rows become visible once `execute` has run.
#[derive(Debug, Clone)]
pub struct ArrayResult {
    query: String,
    rows: Vec<Row>,
    status: NativeStatus,
    cursor: RowCursor,
}

impl ArrayResult {
    pub fn new(query: &str, rows: Vec<Row>) -> Self {
        ArrayResult {
            query: query.to_string(),
            rows,
            status: NativeStatus::success(),
            cursor: RowCursor::default(),
        }
    }

    /// Status reported by every subsequent `execute`.
    pub fn with_status(mut self, status: NativeStatus) -> Self {
        self.status = status;
        self
    }
}

impl ResultSet for ArrayResult {
    fn execute(&mut self, params: &Params) -> Result<()> {
        debug!(query = %self.query, rows = self.rows.len(), "executing canned statement");
        self.status.check(&self.query, params)?;
        self.cursor.reset(self.rows.clone());
        Ok(())
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

    fn num_rows(&self) -> Option<u64> {
        Some(self.cursor.len() as u64)
    }

    fn query_text(&self) -> &str {
        &self.query
    }
}
