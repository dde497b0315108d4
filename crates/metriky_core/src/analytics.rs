use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{ConnectOptions, Row};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use crate::config::{DEFAULT_DB_PORT, ProjectConfig, ReportConfig, expand_home, non_empty_env};
use crate::metrics::{AnalyticsStore, EditSummary, RevisionDelta, UploadCount};
use crate::window::UtcWindow;

pub const NS_FILE: i32 = 6;
pub const NS_MAIN: i32 = 0;
const ACTIVE_EDIT_THRESHOLD: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaCredentials {
    pub user: String,
    pub password: String,
}

impl ReplicaCredentials {
    /// env ANALYTICS_DB_USER/ANALYTICS_DB_PASSWORD > config > replica.my.cnf.
    pub fn resolve(config: &ReportConfig) -> Result<Self> {
        let user = non_empty_env("ANALYTICS_DB_USER").or_else(|| config.analytics.user.clone());
        let password =
            non_empty_env("ANALYTICS_DB_PASSWORD").or_else(|| config.analytics.password.clone());
        if let (Some(user), Some(password)) = (&user, &password) {
            return Ok(Self {
                user: user.clone(),
                password: password.clone(),
            });
        }

        let file = config
            .analytics
            .credentials_file
            .as_deref()
            .map(expand_home)
            .context(
                "no analytics credentials configured \
                 (set ANALYTICS_DB_USER/ANALYTICS_DB_PASSWORD or analytics.credentials_file)",
            )?;
        let from_file = load_credentials_file(&file)?;
        Ok(Self {
            user: user.unwrap_or(from_file.user),
            password: password.unwrap_or(from_file.password),
        })
    }
}

pub fn load_credentials_file(path: &Path) -> Result<ReplicaCredentials> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_credentials(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Read `user` and `password` from the `[client]` section of a MySQL option file.
pub fn parse_credentials(content: &str) -> Result<ReplicaCredentials> {
    let mut in_client = false;
    let mut user = None;
    let mut password = None;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            in_client = line.eq_ignore_ascii_case("[client]");
            continue;
        }
        if !in_client {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = unquote(value.trim()).to_string();
        match key.trim() {
            "user" => user = Some(value),
            "password" => password = Some(value),
            _ => {}
        }
    }
    match (user, password) {
        (Some(user), Some(password)) => Ok(ReplicaCredentials { user, password }),
        _ => bail!("[client] section must define user and password"),
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Wiki replica databases over MySQL. Queries run one at a time on a private
/// current-thread runtime; one connection is kept per project.
pub struct ReplicaStore {
    runtime: Runtime,
    host_template: String,
    default_cluster: String,
    port: u16,
    credentials: ReplicaCredentials,
    connections: BTreeMap<String, MySqlConnection>,
}

impl ReplicaStore {
    pub fn from_config(config: &ReportConfig) -> Result<Self> {
        let credentials = ReplicaCredentials::resolve(config)?;
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start database runtime")?;
        Ok(Self {
            runtime,
            host_template: config.host_template().to_string(),
            default_cluster: config.default_cluster().to_string(),
            port: config.analytics.port.unwrap_or(DEFAULT_DB_PORT),
            credentials,
            connections: BTreeMap::new(),
        })
    }

    fn ensure_connection(&mut self, project: &ProjectConfig) -> Result<()> {
        if self.connections.contains_key(&project.name) {
            return Ok(());
        }
        let cluster = project.cluster.as_deref().unwrap_or(&self.default_cluster);
        let host = replica_host(&self.host_template, &project.name, cluster);
        info!(project = project.name.as_str(), %host, "connecting to replica");

        let options = MySqlConnectOptions::new()
            .host(&host)
            .port(self.port)
            .username(&self.credentials.user)
            .password(&self.credentials.password)
            .database(&format!("{}_p", project.name));
        let connection = self
            .runtime
            .block_on(options.connect())
            .with_context(|| format!("failed to connect to {host}"))?;
        self.connections.insert(project.name.clone(), connection);
        Ok(())
    }

    fn fetch_rows(
        &mut self,
        project: &ProjectConfig,
        sql: &str,
        binds: Vec<String>,
    ) -> Result<Vec<MySqlRow>> {
        self.ensure_connection(project)?;
        let connection = self
            .connections
            .get_mut(&project.name)
            .with_context(|| format!("no open connection for {}", project.name))?;

        debug!(project = project.name.as_str(), binds = binds.len(), "running replica query");
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(value);
        }
        self.runtime
            .block_on(query.fetch_all(connection))
            .with_context(|| format!("replica query failed on {}", project.name))
    }
}

impl AnalyticsStore for ReplicaStore {
    fn active_editors(
        &mut self,
        project: &ProjectConfig,
        users: &[String],
        since: &str,
        until: &str,
    ) -> Result<i64> {
        let rows = self.fetch_rows(
            project,
            &active_editors_sql(users.len()),
            binds(users, &[since, until]),
        )?;
        Ok(row_count(&rows))
    }

    fn new_users(
        &mut self,
        project: &ProjectConfig,
        users: &[String],
        since: &str,
        until: &str,
    ) -> Result<i64> {
        let rows = self.fetch_rows(
            project,
            &new_users_sql(users.len()),
            binds(users, &[since, until]),
        )?;
        Ok(row_count(&rows))
    }

    fn edit_summary(
        &mut self,
        project: &ProjectConfig,
        users: &[String],
        window: &UtcWindow,
        content_only: bool,
    ) -> Result<EditSummary> {
        let rows = self.fetch_rows(
            project,
            &edit_summary_sql(users.len(), content_only),
            binds(users, &[window.start_stamp().as_str(), window.end_stamp().as_str()]),
        )?;
        let Some(row) = rows.first() else {
            return Ok(EditSummary::default());
        };
        Ok(EditSummary {
            editors: row.try_get(0)?,
            pages: row.try_get(1)?,
            edits: row.try_get(2)?,
        })
    }

    fn byte_changes(
        &mut self,
        project: &ProjectConfig,
        users: &[String],
        window: &UtcWindow,
        content_only: bool,
    ) -> Result<Vec<RevisionDelta>> {
        let rows = self.fetch_rows(
            project,
            &byte_changes_sql(users.len(), content_only),
            binds(users, &[window.start_stamp().as_str(), window.end_stamp().as_str()]),
        )?;
        rows.iter()
            .map(|row| {
                Ok(RevisionDelta::from_lengths(
                    actor_name(row)?,
                    row.try_get::<Option<i64>, _>(3)?,
                    row.try_get::<Option<i64>, _>(2)?,
                    row.try_get::<Option<i64>, _>(1)?,
                ))
            })
            .collect()
    }

    fn file_uploads(
        &mut self,
        project: &ProjectConfig,
        users: &[String],
        window: &UtcWindow,
    ) -> Result<Vec<UploadCount>> {
        let rows = self.fetch_rows(
            project,
            &file_uploads_sql(users.len()),
            binds(users, &[window.start_stamp().as_str(), window.end_stamp().as_str()]),
        )?;
        rows.iter()
            .map(|row| {
                Ok(UploadCount {
                    actor: actor_name(row)?,
                    files: row.try_get(1)?,
                })
            })
            .collect()
    }
}

/// `actor_name` is VARBINARY on the replicas.
fn actor_name(row: &MySqlRow) -> Result<String> {
    let raw: Vec<u8> = row.try_get(0)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn row_count(rows: &[MySqlRow]) -> i64 {
    i64::try_from(rows.len()).unwrap_or(i64::MAX)
}

fn binds(users: &[String], trailing: &[&str]) -> Vec<String> {
    users
        .iter()
        .cloned()
        .chain(trailing.iter().map(|value| value.to_string()))
        .collect()
}

pub fn replica_host(template: &str, db: &str, cluster: &str) -> String {
    template.replace("{db}", db).replace("{cluster}", cluster)
}

/// `?, ?, ?` with one placeholder per user. An empty list becomes `NULL`,
/// which matches nothing instead of being a syntax error.
pub fn placeholders(count: usize) -> String {
    if count == 0 {
        return "NULL".to_string();
    }
    vec!["?"; count].join(", ")
}

fn namespace_filter(content_only: bool) -> String {
    if content_only {
        format!("AND page_namespace = {NS_MAIN}")
    } else {
        String::new()
    }
}

pub(crate) fn active_editors_sql(users: usize) -> String {
    format!(
        r#"
SELECT actor_name
FROM actor_revision
JOIN revision ON rev_actor = actor_id
WHERE actor_name IN ({users})
  AND rev_timestamp BETWEEN ? AND ?
GROUP BY actor_id, actor_name
HAVING COUNT(*) > {ACTIVE_EDIT_THRESHOLD}
"#,
        users = placeholders(users)
    )
}

pub(crate) fn new_users_sql(users: usize) -> String {
    format!(
        r#"
SELECT actor_name
FROM actor_logging
JOIN logging ON log_actor = actor_id
WHERE log_type = 'create'
  AND log_action = 'newusers'
  AND actor_name IN ({users})
  AND log_timestamp BETWEEN ? AND ?
"#,
        users = placeholders(users)
    )
}

pub(crate) fn edit_summary_sql(users: usize, content_only: bool) -> String {
    format!(
        r#"
SELECT COUNT(DISTINCT rev_actor), COUNT(DISTINCT rev_page), COUNT(*)
FROM revision
JOIN actor_revision ON actor_id = rev_actor
JOIN page ON rev_page = page_id
WHERE actor_name IN ({users})
  {namespace}
  AND rev_timestamp BETWEEN ? AND ?
"#,
        users = placeholders(users),
        namespace = namespace_filter(content_only)
    )
}

pub(crate) fn byte_changes_sql(users: usize, content_only: bool) -> String {
    format!(
        r#"
SELECT
    actor_name,
    CAST(revision.rev_len AS SIGNED),
    CAST(old_revision.rev_len AS SIGNED),
    CAST(revision.rev_parent_id AS SIGNED)
FROM revision
JOIN actor_revision ON actor_id = revision.rev_actor
JOIN page ON page_id = revision.rev_page
LEFT JOIN revision AS old_revision ON old_revision.rev_id = revision.rev_parent_id
WHERE actor_name IN ({users})
  {namespace}
  AND revision.rev_timestamp BETWEEN ? AND ?
"#,
        users = placeholders(users),
        namespace = namespace_filter(content_only)
    )
}

pub(crate) fn file_uploads_sql(users: usize) -> String {
    format!(
        r#"
SELECT actor_name, COUNT(*)
FROM revision
JOIN actor_revision ON actor_id = rev_actor
JOIN page ON page_id = rev_page
WHERE actor_name IN ({users})
  AND page_namespace = {NS_FILE}
  AND rev_parent_id = 0
  AND rev_timestamp BETWEEN ? AND ?
GROUP BY actor_name
"#,
        users = placeholders(users)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn placeholders_match_user_count() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(0), "NULL");
    }

    #[test]
    fn queries_bind_every_value() {
        for sql in [
            active_editors_sql(4),
            new_users_sql(4),
            edit_summary_sql(4, true),
            byte_changes_sql(4, false),
            file_uploads_sql(4),
        ] {
            assert_eq!(sql.matches('?').count(), 6, "{sql}");
        }
        let bound = binds(
            &["Alice".to_string(), "Bob".to_string()],
            &["20240510160000", "20240510183000"],
        );
        assert_eq!(
            bound,
            vec!["Alice", "Bob", "20240510160000", "20240510183000"]
        );
    }

    #[test]
    fn content_filter_is_explicit() {
        assert!(edit_summary_sql(1, true).contains("page_namespace = 0"));
        assert!(!edit_summary_sql(1, false).contains("page_namespace"));
        assert!(byte_changes_sql(1, true).contains("page_namespace = 0"));
        assert!(!byte_changes_sql(1, false).contains("page_namespace"));
        assert!(file_uploads_sql(1).contains("page_namespace = 6"));
        assert!(file_uploads_sql(1).contains("rev_parent_id = 0"));
    }

    #[test]
    fn activity_threshold_is_more_than_five_edits() {
        assert!(active_editors_sql(2).contains("HAVING COUNT(*) > 5"));
    }

    #[test]
    fn replica_host_follows_cluster_naming() {
        assert_eq!(
            replica_host("{db}.{cluster}.db.svc.wikimedia.cloud", "cswiki", "analytics"),
            "cswiki.analytics.db.svc.wikimedia.cloud"
        );
    }

    #[test]
    fn credentials_come_from_client_section() {
        let parsed = parse_credentials(
            "[mysqld]\nuser = nobody\n\n[client]\nuser = 's53000'\npassword = \"hunter2=x\"\n",
        )
        .expect("parse");
        assert_eq!(
            parsed,
            ReplicaCredentials {
                user: "s53000".to_string(),
                password: "hunter2=x".to_string(),
            }
        );
    }

    #[test]
    fn incomplete_credentials_are_rejected() {
        let error = parse_credentials("[client]\nuser = s53000\n").expect_err("must fail");
        assert!(error.to_string().contains("user and password"));
    }

    #[test]
    fn credentials_file_errors_name_the_path() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("replica.my.cnf");
        fs::write(&path, "[client]\n").expect("write");
        let error = load_credentials_file(&path).expect_err("must fail");
        assert!(error.to_string().contains("replica.my.cnf"));
    }
}
