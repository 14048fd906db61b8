/// Result Adapter Module
///
/// Every backend hands back its rows through the `ResultSet` trait, whatever
/// shape the native driver produces. This module also owns the classification
/// of native execution statuses, which is shared by all backends.
use crate::core::value::{Params, Row};
use crate::core::{DaoError, Result};
use crate::sql::render_debug_query;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{error, warn};

/// SQLSTATE reported by a clean execution.
pub const SQLSTATE_SUCCESS: &str = "00000";

static SUCCESS_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^00000$").expect("static regex"));
static WARNING_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0[01]").expect("static regex"));

/// Uniform row access over an executed statement.
///
/// `fetch` and `current` both read the row under the cursor; only `fetch`
/// advances it. Do not interleave the two within one pass over the rows.
pub trait ResultSet {
    /// Binds `params` and runs the statement, replacing any previous rows.
    fn execute(&mut self, params: &Params) -> Result<()>;

    /// Row under the cursor, without advancing.
    fn current(&self) -> Option<Row>;

    /// Row under the cursor, then advances. `None` once exhausted.
    fn fetch(&mut self) -> Option<Row>;

    /// Whether a row exists under the cursor.
    fn valid(&self) -> bool;

    /// Every remaining row, in order.
    ///
    /// This holds the whole result in memory; prefer `fetch` for large
    /// results.
    fn to_array(&mut self) -> Vec<Row>;

    /// Affected rows for mutating statements.
    ///
    /// Backends that cannot count the rows of a SELECT return `None`; callers
    /// must not read `None` as zero.
    fn num_rows(&self) -> Option<u64>;

    /// Statement text this result was prepared from.
    fn query_text(&self) -> &str;
}

/// Cursor over rows already held in memory.
#[derive(Debug, Clone, Default)]
pub struct RowCursor {
    rows: Vec<Row>,
    position: usize,
}

impl RowCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        RowCursor { rows, position: 0 }
    }

    /// Replaces the rows and rewinds.
    pub fn reset(&mut self, rows: Vec<Row>) {
        self.rows = rows;
        self.position = 0;
    }

    pub fn current(&self) -> Option<Row> {
        self.rows.get(self.position).cloned()
    }

    pub fn fetch(&mut self) -> Option<Row> {
        let row = self.rows.get(self.position).cloned()?;
        self.position += 1;
        Some(row)
    }

    pub fn valid(&self) -> bool {
        self.position < self.rows.len()
    }

    /// Clones the rows from the cursor to the end and moves the cursor past them.
    pub fn remaining(&mut self) -> Vec<Row> {
        let start = self.position.min(self.rows.len());
        self.position = self.rows.len();
        self.rows[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Per-call options for `Dao::query`.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Extra bind parameters; explicit `query` params win on collision
    pub params: Option<Params>,
    /// Dummy backend: rows to return instead of the configured set
    pub testdata: Option<Vec<Row>>,
    /// Dummy backend: native status code to report after execution
    pub status: Option<String>,
    /// Directory backend: attributes to return (all when empty)
    pub attributes: Vec<String>,
    /// Directory backend: search root, overriding the configured `base_dn`
    pub base_dn: Option<String>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_testdata(mut self, rows: Vec<Row>) -> Self {
        self.testdata = Some(rows);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_base_dn(mut self, base_dn: impl Into<String>) -> Self {
        self.base_dn = Some(base_dn.into());
        self
    }

    /// Merges the option-channel params with the explicit ones.
    pub fn merged_params(&self, explicit: &Params) -> Params {
        let mut merged = self.params.clone().unwrap_or_default();
        merged.extend_from(explicit);
        merged
    }
}

/// Outcome of a native execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Warning,
    Error,
    /// The driver reported no status at all
    Unknown,
}

/// Classifies a SQLSTATE-style status code.
///
/// The exact success code is checked before the warning classes, since
/// `00000` also starts with `00`.
pub fn classify_status(code: Option<&str>) -> StatusClass {
    match code {
        None => StatusClass::Unknown,
        Some(code) if SUCCESS_STATUS.is_match(code) => StatusClass::Success,
        Some(code) if WARNING_STATUS.is_match(code) => StatusClass::Warning,
        Some(_) => StatusClass::Error,
    }
}

/// Status and diagnostic reported by a driver after execution.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeStatus {
    pub code: Option<String>,
    pub message: String,
}

impl NativeStatus {
    pub fn success() -> Self {
        NativeStatus {
            code: Some(SQLSTATE_SUCCESS.to_string()),
            message: String::new(),
        }
    }

    pub fn new(code: Option<&str>, message: impl Into<String>) -> Self {
        NativeStatus {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn class(&self) -> StatusClass {
        classify_status(self.code.as_deref())
    }

    /// Logs warnings and turns error-class statuses into `DaoError::Query`.
    pub fn check(&self, query: &str, params: &Params) -> Result<()> {
        match self.class() {
            StatusClass::Success => Ok(()),
            StatusClass::Warning => {
                warn!(
                    code = self.code.as_deref().unwrap_or_default(),
                    query = %render_debug_query(query, params),
                    "query completed with warning: {}",
                    self.message
                );
                Ok(())
            }
            class => {
                let code = self.code.as_deref().unwrap_or("unknown");
                let debug_query = render_debug_query(query, params);
                error!(code, query = %debug_query, ?class, "query failed: {}", self.message);
                Err(DaoError::query(
                    format!("[{}] {} (executed: {})", code, self.message, debug_query),
                    query,
                    params,
                ))
            }
        }
    }
}
