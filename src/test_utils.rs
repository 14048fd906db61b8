/// # Test Utilities Module
///
/// Shared fixtures for the unit and integration tests:
/// - a seeded in-memory SQLite connection
/// - a scriptable fake directory server
/// - error assertion helpers
use crate::core::db::directory::{Connector, DirectoryClient, DirectoryEntry};
use crate::core::db::query::{NativeStatus, QueryOptions};
use crate::core::db::sqlite::SqliteDao;
use crate::core::db::Dao;
use crate::core::value::Params;
use crate::core::Result;
use crate::logging;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

const SAMPLE_SCHEMA: &[&str] = &[
    "CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        active BOOLEAN DEFAULT TRUE
    )",
    "CREATE TABLE posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
    )",
];

const SAMPLE_USERS: &[(&str, &str)] = &[
    ("alice", "alice@example.com"),
    ("bob", "bob@example.com"),
    ("charlie", "charlie@example.com"),
];

/// Isolated in-memory database with the sample schema and rows.
pub fn seeded_sqlite() -> Result<SqliteDao> {
    logging::init_for_tests();
    let mut dao = SqliteDao::in_memory()?;

    for statement in SAMPLE_SCHEMA {
        dao.query(statement, &Params::new(), &QueryOptions::new())?;
    }

    for (username, email) in SAMPLE_USERS {
        let params: Params = [(":username", *username), (":email", *email)]
            .into_iter()
            .collect();
        dao.query(
            "INSERT INTO users (username, email) VALUES (:username, :email)",
            &params,
            &QueryOptions::new(),
        )?;
    }

    Ok(dao)
}

type SearchRecord = (String, String, Vec<String>);

struct FakeState {
    entries: Vec<DirectoryEntry>,
    accounts: HashMap<String, String>,
    search_failure: Option<NativeStatus>,
    binds: Vec<String>,
    searches: Vec<SearchRecord>,
    unbinds: usize,
}

impl Default for FakeState {
    fn default() -> Self {
        let mut accounts = HashMap::new();
        accounts.insert("svc@example.com".to_string(), "secret".to_string());
        FakeState {
            entries: Vec::new(),
            accounts,
            search_failure: None,
            binds: Vec::new(),
            searches: Vec::new(),
            unbinds: 0,
        }
    }
}

/// Scriptable directory server. Clones share state, so the test keeps a
/// handle while the connection owns the client.
#[derive(Clone, Default)]
pub struct FakeDirectory {
    state: Rc<RefCell<FakeState>>,
}

impl FakeDirectory {
    /// Knows the service account `svc@example.com` / `secret` and two people.
    pub fn with_people() -> Self {
        let fake = FakeDirectory::default();
        for (cn, mail) in [("Ann", "ann@example.com"), ("Ben", "ben@example.com")] {
            let mut attributes = BTreeMap::new();
            attributes.insert("cn".to_string(), vec![cn.to_string()]);
            attributes.insert("mail".to_string(), vec![mail.to_string()]);
            fake.state.borrow_mut().entries.push(DirectoryEntry {
                dn: format!("CN={},DC=example,DC=com", cn),
                attributes,
            });
        }
        fake
    }

    pub fn account(self, identity: &str, password: &str) -> Self {
        self.state
            .borrow_mut()
            .accounts
            .insert(identity.to_string(), password.to_string());
        self
    }

    pub fn failing_search(self, code: &str, message: &str) -> Self {
        self.state.borrow_mut().search_failure = Some(NativeStatus::new(Some(code), message));
        self
    }

    pub fn connector(&self) -> Connector<FakeClient> {
        let state = self.state.clone();
        Box::new(move |_target| Ok(FakeClient { state: state.clone() }))
    }

    /// Every bind identity attempted, in order.
    pub fn binds(&self) -> Vec<String> {
        self.state.borrow().binds.clone()
    }

    /// Every `(base, filter, attributes)` searched, in order.
    pub fn searches(&self) -> Vec<SearchRecord> {
        self.state.borrow().searches.clone()
    }

    pub fn unbinds(&self) -> usize {
        self.state.borrow().unbinds
    }
}

pub struct FakeClient {
    state: Rc<RefCell<FakeState>>,
}

impl DirectoryClient for FakeClient {
    fn bind(&mut self, identity: &str, password: &str) -> std::result::Result<(), NativeStatus> {
        let mut state = self.state.borrow_mut();
        state.binds.push(identity.to_string());
        match state.accounts.get(identity) {
            Some(expected) if expected == password => Ok(()),
            _ => Err(NativeStatus::new(Some("LDAP49"), "Invalid credentials")),
        }
    }

    fn search(
        &mut self,
        base: &str,
        filter: &str,
        attributes: &[String],
    ) -> std::result::Result<Vec<DirectoryEntry>, NativeStatus> {
        let mut state = self.state.borrow_mut();
        state
            .searches
            .push((base.to_string(), filter.to_string(), attributes.to_vec()));
        match &state.search_failure {
            Some(status) => Err(status.clone()),
            None => Ok(state.entries.clone()),
        }
    }

    fn unbind(&mut self) -> std::result::Result<(), NativeStatus> {
        self.state.borrow_mut().unbinds += 1;
        Ok(())
    }
}

/// Error assertion helpers
pub mod error_testing {
    /// Verify error message quality (contains helpful information)
    pub fn verify_error_message_quality<T, E>(result: &std::result::Result<T, E>, context: &str)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => panic!("Expected an error in {}", context),
            Err(error) => {
                let error_str = error.to_string();
                assert!(error_str.len() > 10, "Error message should be descriptive in {}", context);

                let lower = error_str.to_lowercase();
                let has_operation_context = lower.contains("failed")
                    || lower.contains("error")
                    || lower.contains("unable")
                    || lower.contains("not supported");
                assert!(
                    has_operation_context,
                    "Error should indicate what operation failed: '{}' in {}",
                    error_str,
                    context
                );
            }
        }
    }
}

/// Asserts that `$result` is an `Err` of the given `DaoError` variant.
#[macro_export]
macro_rules! assert_dao_error {
    ($result:expr, $variant:ident, $context:expr) => {
        match $result {
            Err($crate::core::DaoError::$variant { .. }) => {}
            Ok(_) => panic!("Expected {} error but got Ok in {}", stringify!($variant), $context),
            Err(other) => panic!("Expected {} but got {:?} in {}", stringify!($variant), other, $context),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use crate::core::DaoError;

    #[test]
    fn test_seeded_sqlite() {
        let mut dao = seeded_sqlite().unwrap();
        let mut result = dao
            .query("SELECT COUNT(*) AS n FROM users", &Params::new(), &QueryOptions::new())
            .unwrap();
        assert_eq!(result.fetch().unwrap().get("n"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_fake_directory_rejects_unknown_account() {
        let fake = FakeDirectory::default();
        let mut client = (fake.connector())(&crate::core::db::directory::DirectoryTarget {
            url: "ldap://fake".to_string(),
            timeout: None,
        })
        .unwrap();
        assert!(client.bind("nobody", "x").is_err());
        assert!(client.bind("svc@example.com", "secret").is_ok());
        assert_eq!(fake.binds().len(), 2);
    }

    #[test]
    fn test_error_assertion_macro() {
        let result: Result<i32> = Err(DaoError::Transaction("Test error".to_string()));
        assert_dao_error!(result, Transaction, "macro test");

        let result: Result<i32> = Err(DaoError::query("boom", "SELECT 1", "{}"));
        assert_dao_error!(result, Query, "macro test");
    }

    #[test]
    fn test_error_message_quality() {
        let result: Result<i32> = Err(DaoError::Connection("Unable to open test.db".to_string()));
        error_testing::verify_error_message_quality(&result, "connection error test");
    }
}
