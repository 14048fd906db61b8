/// Directory Service Backend
///
/// LDAP through the same `Dao` contract as the SQL backends. Query text is an
/// LDAP search filter; `:name` placeholders in it are replaced with escaped
/// values, since LDAP has no parameter binding of its own. Each search entry
/// comes back as one row whose first column is `dn`.
///
/// Directories have no transactions, no insert ids, no sorting and no
/// pagination; the corresponding operations fail or return empty fragments.
use super::connection::{Backend, Dao, TransactionState};
use super::query::{NativeStatus, QueryOptions, ResultSet, RowCursor};
use crate::config::{validate_configuration, DaoConfig};
use crate::core::value::{Params, Row, Value};
use crate::core::{DaoError, Result};
use crate::sql::substitute_placeholders;
use ldap3::{dn_escape, ldap_escape, LdapConn, LdapConnSettings, LdapError, Scope, SearchEntry};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where and how to open the native directory handle.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryTarget {
    pub url: String,
    pub timeout: Option<Duration>,
}

/// One search result entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// `dn` first, then attributes by name. Multi-valued attributes are
    /// joined with `"; "`.
    pub fn into_row(self) -> Row {
        let mut row = Row::with_capacity(self.attributes.len() + 1);
        row.insert("dn", self.dn);
        for (name, values) in self.attributes {
            let value = match values.len() {
                0 => Value::Null,
                1 => Value::from(values.into_iter().next().unwrap_or_default()),
                _ => Value::from(values.join("; ")),
            };
            row.insert(name, value);
        }
        row
    }
}

/// The native directory handle.
///
/// Failures are reported as a `NativeStatus`; protocol result codes use the
/// form `LDAP<rc>`, transport failures carry no code.
pub trait DirectoryClient {
    fn bind(&mut self, identity: &str, password: &str) -> std::result::Result<(), NativeStatus>;

    fn search(
        &mut self,
        base: &str,
        filter: &str,
        attributes: &[String],
    ) -> std::result::Result<Vec<DirectoryEntry>, NativeStatus>;

    fn unbind(&mut self) -> std::result::Result<(), NativeStatus>;
}

/// Opens a client for a target.
pub type Connector<C> = Box<dyn Fn(&DirectoryTarget) -> std::result::Result<C, NativeStatus>>;

fn ldap_status(err: LdapError) -> NativeStatus {
    match err {
        LdapError::LdapResult { result } => {
            let code = format!("LDAP{}", result.rc);
            NativeStatus::new(Some(code.as_str()), result.text)
        }
        other => NativeStatus::new(None, other.to_string()),
    }
}

/// `DirectoryClient` over the synchronous `ldap3` connection.
pub struct LdapClient {
    conn: LdapConn,
}

impl LdapClient {
    pub fn open(target: &DirectoryTarget) -> std::result::Result<Self, NativeStatus> {
        let mut settings = LdapConnSettings::new();
        if let Some(timeout) = target.timeout {
            settings = settings.set_conn_timeout(timeout);
        }
        let conn = LdapConn::with_settings(settings, &target.url).map_err(ldap_status)?;
        Ok(LdapClient { conn })
    }
}

impl DirectoryClient for LdapClient {
    fn bind(&mut self, identity: &str, password: &str) -> std::result::Result<(), NativeStatus> {
        self.conn
            .simple_bind(identity, password)
            .and_then(|result| result.success())
            .map(|_| ())
            .map_err(ldap_status)
    }

    fn search(
        &mut self,
        base: &str,
        filter: &str,
        attributes: &[String],
    ) -> std::result::Result<Vec<DirectoryEntry>, NativeStatus> {
        let attrs: Vec<&str> = if attributes.is_empty() {
            vec!["*"]
        } else {
            attributes.iter().map(String::as_str).collect()
        };

        let (entries, _) = self
            .conn
            .search(base, Scope::Subtree, filter, attrs)
            .and_then(|result| result.success())
            .map_err(ldap_status)?;

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| DirectoryEntry {
                dn: entry.dn,
                attributes: entry.attrs.into_iter().collect(),
            })
            .collect())
    }

    fn unbind(&mut self) -> std::result::Result<(), NativeStatus> {
        self.conn.unbind().map_err(ldap_status)
    }
}

/// Turns `corp.example.com` into `DC=corp,DC=example,DC=com`.
pub fn domain_to_base_dn(domain: &str) -> String {
    domain
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| format!("DC={}", dn_escape(part)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Connection adapter for LDAP directories.
pub struct DirectoryDao<C: DirectoryClient = LdapClient> {
    config: DaoConfig,
    id: String,
    connector: Connector<C>,
    handle: Option<C>,
    last_query_succeeded: bool,
}

impl DirectoryDao<LdapClient> {
    /// Validates `config`; the directory is contacted on first use.
    pub fn new(config: DaoConfig) -> Result<Self> {
        Self::with_connector(config, Box::new(LdapClient::open))
    }
}

impl<C: DirectoryClient> DirectoryDao<C> {
    /// Uses `connector` instead of a real LDAP connection to open the handle.
    pub fn with_connector(config: DaoConfig, connector: Connector<C>) -> Result<Self> {
        validate_configuration(&config, Backend::Directory.required_keys())?;
        Ok(DirectoryDao {
            config,
            id: uuid::Uuid::new_v4().to_string(),
            connector,
            handle: None,
            last_query_succeeded: false,
        })
    }

    pub fn target(&self) -> DirectoryTarget {
        let scheme = if self.config.use_tls { "ldaps" } else { "ldap" };
        let server = self.config.server.as_deref().unwrap_or_default();
        let url = match self.config.port {
            Some(port) => format!("{}://{}:{}", scheme, server, port),
            None => format!("{}://{}", scheme, server),
        };
        DirectoryTarget {
            url,
            timeout: self.config.timeout_secs.map(Duration::from_secs),
        }
    }

    /// Configured `base_dn`, else one derived from `domain`, else empty.
    pub fn base_dn(&self) -> String {
        match (&self.config.base_dn, &self.config.domain) {
            (Some(base), _) => base.clone(),
            (None, Some(domain)) => domain_to_base_dn(domain),
            (None, None) => String::new(),
        }
    }

    fn ensure_connected(&mut self) -> Result<()> {
        if self.handle.is_none() {
            self.connect()?;
        }
        Ok(())
    }

    fn client(&mut self) -> Result<&mut C> {
        self.handle
            .as_mut()
            .ok_or_else(|| DaoError::Connection("Not connected".to_string()))
    }

    fn bind_service_account(&mut self) -> Result<()> {
        let Some(username) = self.config.username.clone() else {
            return Ok(());
        };
        let password = self.config.password.clone().unwrap_or_default();
        self.client()?
            .bind(&username, &password)
            .map_err(|status| {
                DaoError::Connection(format!("Service bind as {} failed: {}", username, status.message))
            })
    }

    /// Checks a user's credentials by binding as `username@domain`.
    ///
    /// All three inputs are DN-escaped before the bind, the password
    /// included, so a password containing `,`, `+`, `"`, `\`, `<`, `>`, `;`
    /// or `=` is sent in escaped form.
    ///
    /// After this call the shared handle is bound as that user, whatever the
    /// outcome. Call [`rebind_service_account`](Self::rebind_service_account)
    /// before issuing queries that need the service account's privileges.
    pub fn authenticate_user(&mut self, domain: &str, username: &str, password: &str) -> Result<bool> {
        // An empty password is an unauthenticated bind, which servers accept
        if password.is_empty() {
            return Ok(false);
        }
        self.ensure_connected()?;

        let identity = format!("{}@{}", dn_escape(username), dn_escape(domain));
        let password = dn_escape(password);
        let id = self.id.clone();
        match self.client()?.bind(&identity, &password) {
            Ok(()) => {
                info!(connection_id = %id, identity = %identity, "user bind succeeded");
                Ok(true)
            }
            Err(status) => {
                debug!(connection_id = %id, identity = %identity, "user bind failed: {}", status.message);
                Ok(false)
            }
        }
    }

    /// Restores the configured service identity on the shared handle.
    pub fn rebind_service_account(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.bind_service_account()
    }

    fn open_search<'a>(
        handle: &'a mut Option<C>,
        base: String,
        text: &str,
        options: &QueryOptions,
    ) -> Result<DirectoryResult<'a, C>> {
        let client = handle
            .as_mut()
            .ok_or_else(|| DaoError::Connection("Not connected".to_string()))?;
        Ok(DirectoryResult {
            client,
            base,
            filter: text.to_string(),
            attributes: options.attributes.clone(),
            cursor: RowCursor::default(),
        })
    }

    fn search_base(&self, options: &QueryOptions) -> String {
        let base = options.base_dn.clone().unwrap_or_else(|| self.base_dn());
        debug!(connection_id = %self.id, base = %base, "resolved directory search base");
        base
    }

    fn teardown(&mut self) {
        if let Some(mut client) = self.handle.take() {
            info!(connection_id = %self.id, "closing directory connection");
            if let Err(status) = client.unbind() {
                warn!(connection_id = %self.id, "directory unbind failed: {}", status.message);
            }
        }
    }
}

impl<C: DirectoryClient> Dao for DirectoryDao<C> {
    fn backend(&self) -> Backend {
        Backend::Directory
    }

    fn connection_id(&self) -> &str {
        &self.id
    }

    fn connect(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let target = self.target();
        let client = (self.connector)(&target).map_err(|status| {
            DaoError::Connection(format!("Unable to reach {}: {}", target.url, status.message))
        })?;
        self.handle = Some(client);

        if let Err(e) = self.bind_service_account() {
            self.teardown();
            return Err(e);
        }
        info!(connection_id = %self.id, url = %target.url, "connected to directory");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.teardown();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    fn transaction_state(&self) -> TransactionState {
        TransactionState::Autocommit
    }

    fn query<'a>(
        &'a mut self,
        text: &str,
        params: &Params,
        options: &QueryOptions,
    ) -> Result<Box<dyn ResultSet + 'a>> {
        self.last_query_succeeded = false;
        let params = options.merged_params(params);
        self.ensure_connected()?;

        let base = self.search_base(options);
        let mut result = Self::open_search(&mut self.handle, base, text, options)?;
        result.execute(&params)?;
        self.last_query_succeeded = true;
        Ok(Box::new(result))
    }

    fn get_statement<'a>(&'a mut self, text: &str) -> Result<Box<dyn ResultSet + 'a>> {
        self.ensure_connected()?;
        let options = QueryOptions::default();
        let base = self.search_base(&options);
        Ok(Box::new(Self::open_search(&mut self.handle, base, text, &options)?))
    }

    fn query_succeeded(&self) -> bool {
        self.last_query_succeeded
    }

    fn begin_transaction(&mut self) -> Result<()> {
        Err(DaoError::TransactionNotSupported(
            "LDAP directories have no transactions".to_string(),
        ))
    }

    fn commit_transaction(&mut self) -> Result<()> {
        self.begin_transaction()
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        self.begin_transaction()
    }

    fn last_insert_id(&self) -> Option<i64> {
        None
    }

    fn generate_pagination(&self, _page_size: Option<u64>, _page: Option<u64>) -> String {
        String::new()
    }

    fn generate_sort(&self, _columns: &[(&str, &str)], _prepend: Option<&str>) -> String {
        String::new()
    }
}

impl<C: DirectoryClient> Drop for DirectoryDao<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Result adapter over a directory search.
pub struct DirectoryResult<'a, C: DirectoryClient> {
    client: &'a mut C,
    base: String,
    filter: String,
    attributes: Vec<String>,
    cursor: RowCursor,
}

impl<C: DirectoryClient> ResultSet for DirectoryResult<'_, C> {
    fn execute(&mut self, params: &Params) -> Result<()> {
        let filter = substitute_placeholders(&self.filter, params, |value| {
            ldap_escape(value.to_string()).into_owned()
        });
        debug!(base = %self.base, filter = %filter, "searching directory");

        let status = match self.client.search(&self.base, &filter, &self.attributes) {
            Ok(entries) => {
                self.cursor
                    .reset(entries.into_iter().map(DirectoryEntry::into_row).collect());
                NativeStatus::success()
            }
            Err(status) => {
                self.cursor.reset(Vec::new());
                status
            }
        };
        status.check(&self.filter, params)
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
        &self.filter
    }
}
