/// SQL Fragment Helpers
///
/// Builders for the small pieces of SQL that callers splice into their own
/// statements: WHERE clauses, ORDER BY lists, LIMIT pagination, and the
/// column/placeholder lists for INSERT and UPDATE statements. Identifiers are
/// quoted with the backend's dialect. Values never go through these helpers;
/// they are always bound as parameters.
use crate::core::value::{Params, Value, ValueMap};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W").expect("static regex"));
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r":\w+").expect("static regex"));

/// Identifier quoting style of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `` `name` `` (MySQL, SQLite)
    Backtick,
    /// `[name]` (SQL Server)
    Bracket,
    /// `"name"` (ANSI, DB2, Oracle)
    DoubleQuote,
    /// No quoting (directory services)
    Plain,
}

impl Dialect {
    pub fn quote(&self, name: &str) -> String {
        match self {
            Dialect::Backtick => format!("`{}`", name),
            Dialect::Bracket => format!("[{}]", name),
            Dialect::DoubleQuote => format!("\"{}\"", name),
            Dialect::Plain => name.to_string(),
        }
    }
}

/// Wraps `name` in the quoting pair of `dialect`, exactly once.
pub fn escape_column_name(dialect: Dialect, name: &str) -> String {
    dialect.quote(name)
}

/// Normalizes a bare parameter name into a `:name` placeholder label.
pub fn make_parameter_label(name: &str) -> String {
    format!(":{}", name.strip_prefix(':').unwrap_or(name))
}

/// Turns a column name into a placeholder label by replacing every
/// non-word character with `_`.
pub fn placeholder_for_column(column: &str) -> String {
    make_parameter_label(&NON_WORD.replace_all(column, "_"))
}

/// Joins the non-empty `clauses` with `AND` behind `prepend`.
///
/// Clauses that are empty or contain only whitespace are dropped. Returns an
/// empty string when no clause is left.
///
/// # Examples
///
/// ```
/// use dbadapt::sql::generate_where;
///
/// assert_eq!(generate_where(&["a=1", "", "b=2"], "WHERE"), "WHERE a=1 AND b=2");
/// assert_eq!(generate_where::<&str>(&[], "WHERE"), "");
/// ```
pub fn generate_where<S: AsRef<str>>(clauses: &[S], prepend: &str) -> String {
    let kept: Vec<&str> = clauses
        .iter()
        .map(AsRef::as_ref)
        .filter(|c| !c.trim().is_empty())
        .collect();

    if kept.is_empty() {
        return String::new();
    }
    format!("{} {}", prepend, kept.join(" AND "))
}

/// Builds a `LIMIT [offset, ]size` fragment.
///
/// A page size of `None`, 0 or 1 disables limiting. Page `None`, 0 or 1 is
/// the first page, which needs no offset. An offset past `u64::MAX` is
/// clamped to `u64::MAX`.
pub fn generate_pagination(page_size: Option<u64>, page: Option<u64>) -> String {
    let size = match page_size {
        Some(size) if size > 1 => size,
        _ => return String::new(),
    };

    match page {
        Some(page) if page > 1 => format!("LIMIT {}, {}", (page - 1).saturating_mul(size), size),
        _ => format!("LIMIT {}", size),
    }
}

/// Builds an `ORDER BY col dir,col dir` fragment in input order.
///
/// `prepend` defaults to `ORDER BY`.
pub fn generate_sort<I, K, D>(columns: I, prepend: Option<&str>) -> String
where
    I: IntoIterator<Item = (K, D)>,
    K: AsRef<str>,
    D: AsRef<str>,
{
    let parts: Vec<String> = columns
        .into_iter()
        .map(|(col, dir)| format!("{} {}", col.as_ref(), dir.as_ref()))
        .collect();

    if parts.is_empty() {
        return String::new();
    }
    format!("{} {}", prepend.unwrap_or("ORDER BY"), parts.join(","))
}

/// Column, placeholder and assignment lists for a column→value mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterizedComponents {
    /// Escaped column names
    pub fields: Vec<String>,
    /// `:placeholder` labels, one per field
    pub placeholders: Vec<String>,
    /// `field = :placeholder` assignments for UPDATE
    pub updates: Vec<String>,
    /// Placeholder label to bound value
    pub params: Params,
}

impl ParameterizedComponents {
    pub fn field_list(&self) -> String {
        self.fields.join(", ")
    }

    pub fn placeholder_list(&self) -> String {
        self.placeholders.join(", ")
    }

    pub fn update_list(&self) -> String {
        self.updates.join(", ")
    }
}

/// Splits `data` into the pieces of a parameterized INSERT or UPDATE.
///
/// Output order follows the order of `data`.
pub fn generate_parameterized_components(
    dialect: Dialect,
    data: &ValueMap,
) -> ParameterizedComponents {
    let mut components = ParameterizedComponents::default();

    for (column, value) in data.iter() {
        let field = escape_column_name(dialect, column);
        let placeholder = placeholder_for_column(column);

        components.updates.push(format!("{} = {}", field, placeholder));
        components.params.insert(placeholder.clone(), value.clone());
        components.fields.push(field);
        components.placeholders.push(placeholder);
    }

    components
}

/// Renders a value as a SQL literal. Only for diagnostics.
pub fn to_sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(x) => x.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Blob(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            format!("X'{}'", hex)
        }
    }
}

/// Replaces every `:label` in `query` that has a bound value with
/// `render(value)`. Unknown labels are left untouched.
pub fn substitute_placeholders<F>(query: &str, params: &Params, render: F) -> String
where
    F: Fn(&Value) -> String,
{
    PLACEHOLDER
        .replace_all(query, |caps: &Captures| {
            let label = &caps[0];
            match params.get(label) {
                Some(value) => render(value),
                None => label.to_string(),
            }
        })
        .into_owned()
}

/// Reconstructs the statement with literal values in place of placeholders,
/// for error messages and logs. The output is not meant to be executed.
pub fn render_debug_query(query: &str, params: &Params) -> String {
    substitute_placeholders(query, params, to_sql_literal)
}
