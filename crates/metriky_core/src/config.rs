use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::ReportError;

pub const DEFAULT_USER_AGENT: &str = "metriky/0.1";
pub const DEFAULT_TIMEZONE: &str = "Europe/Prague";
pub const DEFAULT_HOST_TEMPLATE: &str = "{db}.{cluster}.db.svc.wikimedia.cloud";
pub const DEFAULT_CLUSTER: &str = "analytics";
pub const DEFAULT_DB_PORT: u16 = 3306;
pub const CONFIG_ENV_VAR: &str = "METRIKY_CONFIG";

const EMBEDDED_CONFIG: &str = include_str!("../../../config/default.toml");

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReportConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub analytics: AnalyticsSection,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct AnalyticsSection {
    pub host_template: Option<String>,
    pub port: Option<u16>,
    pub cluster: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub credentials_file: Option<String>,
}

/// A wiki page that receives reports.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    pub family: String,
    pub lang: String,
    pub namespace: i32,
    pub title: String,
    #[serde(default = "default_true")]
    pub content_namespace_only: bool,
}

impl TargetConfig {
    pub fn api_url(&self) -> String {
        format!("https://{}.{}.org/w/api.php", self.lang, self.family)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectKind {
    #[default]
    Content,
    /// Shared file repository; counted by uploads instead of article edits.
    Media,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Replica database name, e.g. `cswiki`.
    pub name: String,
    pub interwiki: String,
    #[serde(default)]
    pub kind: ProjectKind,
    pub cluster: Option<String>,
}

impl ProjectConfig {
    pub fn is_media(&self) -> bool {
        self.kind == ProjectKind::Media
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Flag,
    Env,
    Embedded,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Embedded => "embedded",
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            wiki: WikiSection::default(),
            analytics: AnalyticsSection::default(),
            targets: BTreeMap::new(),
            projects: Vec::new(),
        }
    }
}

impl ReportConfig {
    pub fn embedded() -> Result<Self> {
        parse_config(EMBEDDED_CONFIG).context("failed to parse embedded default config")
    }

    pub fn target(&self, id: &str) -> Result<&TargetConfig, ReportError> {
        self.targets
            .get(id)
            .ok_or_else(|| ReportError::UnknownTarget {
                target: id.to_string(),
                known: self.targets.keys().cloned().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn time_zone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|error| anyhow::anyhow!("invalid timezone `{}`: {error}", self.timezone))
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        if let Some(value) = non_empty_env("WIKI_USER_AGENT") {
            return value;
        }
        self.wiki
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Resolve the API URL: env WIKI_API_URL > config > derived from the target site.
    pub fn api_url(&self, target: &TargetConfig) -> String {
        if let Some(value) = non_empty_env("WIKI_API_URL") {
            return value;
        }
        self.wiki.api_url.clone().unwrap_or_else(|| target.api_url())
    }

    pub fn host_template(&self) -> &str {
        self.analytics
            .host_template
            .as_deref()
            .unwrap_or(DEFAULT_HOST_TEMPLATE)
    }

    pub fn default_cluster(&self) -> &str {
        self.analytics
            .cluster
            .as_deref()
            .unwrap_or(DEFAULT_CLUSTER)
    }

    pub fn diagnostics(
        &self,
        config_path: Option<&Path>,
        source: ConfigSource,
        target: &str,
    ) -> String {
        let api_url = self
            .targets
            .get(target)
            .map_or_else(|| "<unknown target>".to_string(), |t| self.api_url(t));
        format!(
            "config_path={} ({})\ntarget={}\napi_url={}\nuser_agent={}\ntimezone={}\nhost_template={}\ncluster={}\nprojects={}",
            config_path.map_or_else(|| "<embedded>".to_string(), |path| path.display().to_string()),
            source.as_str(),
            target,
            api_url,
            self.user_agent(),
            self.timezone,
            self.host_template(),
            self.default_cluster(),
            self.projects
                .iter()
                .map(|project| project.name.as_str())
                .collect::<Vec<_>>()
                .join(",")
        )
    }

    /// Check the invariants the pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        self.time_zone()?;
        if self.projects.is_empty() {
            bail!("config must list at least one project");
        }
        let media = self.projects.iter().filter(|p| p.is_media()).count();
        if media > 1 {
            bail!("config lists {media} media projects; at most one is supported");
        }
        for project in &self.projects {
            if project.name.trim().is_empty() {
                bail!("project name cannot be empty");
            }
        }
        Ok(())
    }
}

/// Pick the config file: `--config` flag > METRIKY_CONFIG > embedded default.
pub fn resolve_config_path(flag: Option<&Path>) -> (Option<PathBuf>, ConfigSource) {
    if let Some(path) = flag {
        return (Some(path.to_path_buf()), ConfigSource::Flag);
    }
    if let Some(value) = non_empty_env(CONFIG_ENV_VAR) {
        return (Some(PathBuf::from(value)), ConfigSource::Env);
    }
    (None, ConfigSource::Embedded)
}

pub fn load_config(path: Option<&Path>) -> Result<ReportConfig> {
    let config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            parse_config(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => ReportConfig::embedded()?,
    };
    config.validate()?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<ReportConfig> {
    Ok(toml::from_str(content)?)
}

/// Expand a leading `~/` against $HOME.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = env::var_os("HOME")
    {
        return PathBuf::from(home).join(rest);
    }
    PathBuf::from(path)
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn embedded_config_describes_prague_club() {
        let config = ReportConfig::embedded().expect("embedded config");
        assert_eq!(config.timezone, "Europe/Prague");
        assert_eq!(config.projects.len(), 7);
        assert_eq!(config.projects[0].name, "cswiki");
        assert_eq!(config.projects[0].interwiki, "w:cs");
        assert!(config.projects.iter().all(|p| !p.is_media()));

        let target = config.target("praha-2019").expect("target");
        assert_eq!(target.family, "wikipedia");
        assert_eq!(target.lang, "cs");
        assert_eq!(target.namespace, 4);
        assert_eq!(target.title, "Klub/Praha/2019");
        assert!(target.content_namespace_only);
        assert_eq!(target.api_url(), "https://cs.wikipedia.org/w/api.php");
    }

    #[test]
    fn unknown_target_lists_known_ones() {
        let config = ReportConfig::embedded().expect("embedded config");
        let error = config.target("brno-2020").expect_err("must fail");
        assert!(matches!(error, ReportError::UnknownTarget { .. }));
        let message = error.to_string();
        assert!(message.contains("brno-2020"));
        assert!(message.contains("praha-2019"));
    }

    #[test]
    fn load_config_parses_media_project_and_overrides() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("metriky.toml");
        fs::write(
            &config_path,
            r#"
timezone = "Europe/Bratislava"

[analytics]
cluster = "web"

[targets.brno]
family = "wikipedia"
lang = "cs"
namespace = 4
title = "Klub/Brno"
content_namespace_only = false

[[projects]]
name = "cswiki"
interwiki = "w:cs"

[[projects]]
name = "commonswiki"
interwiki = "c:"
kind = "media"
cluster = "analytics"
"#,
        )
        .expect("write config");

        let config = load_config(Some(&config_path)).expect("load config");
        assert_eq!(config.timezone, "Europe/Bratislava");
        assert!(!config.target("brno").expect("target").content_namespace_only);
        assert_eq!(config.projects.len(), 2);
        assert!(config.projects[1].is_media());
        assert_eq!(config.default_cluster(), "web");
        assert_eq!(config.projects[1].cluster.as_deref(), Some("analytics"));
        assert_eq!(config.host_template(), DEFAULT_HOST_TEMPLATE);
    }

    #[test]
    fn load_config_rejects_invalid_timezone() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("metriky.toml");
        fs::write(
            &config_path,
            "timezone = \"Mars/Olympus\"\n[[projects]]\nname = \"cswiki\"\ninterwiki = \"w:cs\"\n",
        )
        .expect("write config");
        let error = load_config(Some(&config_path)).expect_err("must fail");
        assert!(error.to_string().contains("invalid timezone"));
    }

    #[test]
    fn load_config_rejects_two_media_projects() {
        let config = parse_config(
            r#"
[[projects]]
name = "commonswiki"
interwiki = "c:"
kind = "media"

[[projects]]
name = "otherwiki"
interwiki = "o:"
kind = "media"
"#,
        )
        .expect("parse");
        let error = config.validate().expect_err("must fail");
        assert!(error.to_string().contains("media projects"));
    }

    #[test]
    fn load_config_reports_parse_errors_with_path() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("metriky.toml");
        fs::write(&config_path, "[targets\nfamily = \"oops\"").expect("write config");
        let error = load_config(Some(&config_path)).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn flag_path_wins_over_embedded() {
        let (path, source) = resolve_config_path(Some(Path::new("/tmp/metriky.toml")));
        assert_eq!(path.as_deref(), Some(Path::new("/tmp/metriky.toml")));
        assert_eq!(source, ConfigSource::Flag);
    }

    #[test]
    fn diagnostics_name_config_source_and_projects() {
        let config = ReportConfig::embedded().expect("embedded config");
        let text = config.diagnostics(None, ConfigSource::Embedded, "praha-2019");
        assert!(text.starts_with("config_path=<embedded> (embedded)\n"));
        assert!(text.contains("target=praha-2019\n"));
        assert!(text.contains("timezone=Europe/Prague\n"));
        assert!(text.ends_with(
            "projects=cswiki,cswiktionary,cswikisource,cswikibooks,cswikiquote,cswikinews,cswikiversity"
        ));
    }

    #[test]
    fn expand_home_leaves_absolute_paths_alone() {
        assert_eq!(
            expand_home("/etc/replica.my.cnf"),
            PathBuf::from("/etc/replica.my.cnf")
        );
    }
}
