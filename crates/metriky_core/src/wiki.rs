use std::collections::BTreeMap;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use similar::TextDiff;
use tracing::{debug, info};

const NS_MAIN: i32 = 0;

/// A page as last saved on the wiki.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiPage {
    pub title: String,
    pub content: String,
    pub timestamp: String,
    pub revision_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEdit<'a> {
    pub title: &'a str,
    pub text: &'a str,
    pub summary: &'a str,
    /// Timestamp of the revision the edit was based on; lets the wiki
    /// refuse the save when someone edited the page in the meantime.
    pub base_timestamp: Option<&'a str>,
    pub minor: bool,
}

pub trait WikiPageApi {
    fn fetch_page(&mut self, namespace: i32, title: &str) -> Result<WikiPage>;
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    fn save_page(&mut self, edit: &PageEdit<'_>) -> Result<()>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn new(api_url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            user_agent: user_agent.into(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
    namespace_names: Option<BTreeMap<i32, String>>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
            namespace_names: None,
        })
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid wiki API URL: {}", self.config.api_url))?;
        let pairs = with_format(params);

        self.apply_rate_limit(false);
        let response = self
            .client
            .get(base_url)
            .header("User-Agent", self.config.user_agent.clone())
            .query(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_response(response)
    }

    fn request_json_post(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let pairs = with_format(params);

        self.apply_rate_limit(true);
        let response = self
            .client
            .post(&self.config.api_url)
            .header("User-Agent", self.config.user_agent.clone())
            .form(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_response(response)
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    /// Local name of a namespace, e.g. `Wikipedie` for 4 on cswiki.
    fn namespace_name(&mut self, namespace: i32) -> Result<String> {
        if namespace == NS_MAIN {
            return Ok(String::new());
        }
        if self.namespace_names.is_none() {
            let response = self.request_json_get(&[
                ("action", "query".to_string()),
                ("meta", "siteinfo".to_string()),
                ("siprop", "namespaces".to_string()),
            ])?;
            self.namespace_names = Some(parse_namespaces(response)?);
        }
        self.namespace_names
            .as_ref()
            .and_then(|names| names.get(&namespace))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("wiki has no namespace {namespace}"))
    }
}

impl WikiPageApi for MediaWikiClient {
    fn fetch_page(&mut self, namespace: i32, title: &str) -> Result<WikiPage> {
        let full_title = prefixed_title(&self.namespace_name(namespace)?, title);
        info!(title = full_title.as_str(), "fetching page");
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", full_title.clone()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content|timestamp|ids".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        parse_page_response(response)?
            .ok_or_else(|| anyhow::anyhow!("page does not exist: {full_title}"))
    }

    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(&[
            ("action", "login".to_string()),
            ("lgname", username.to_string()),
            ("lgpassword", password.to_string()),
            ("lgtoken", login_token),
        ])?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                info!(user = username, "logged in");
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn save_page(&mut self, edit: &PageEdit<'_>) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", edit.title.to_string()),
            ("text", edit.text.to_string()),
            ("summary", edit.summary.to_string()),
            ("nocreate", "1".to_string()),
            ("bot", "1".to_string()),
        ];
        params.push(if edit.minor {
            ("minor", "1".to_string())
        } else {
            ("notminor", "1".to_string())
        });
        if let Some(timestamp) = edit.base_timestamp {
            params.push(("basetimestamp", timestamp.to_string()));
        }
        params.push(("token", token));

        let response = self.request_json_post(&params)?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let result = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if result.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                edit.title,
                result.result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        debug!(title = edit.title, new_revid = ?result.newrevid, "page saved");
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Line diff of the page before and after the report is inserted.
pub fn unified_diff(old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header("current", "generated")
        .to_string()
}

pub fn prefixed_title(namespace_name: &str, title: &str) -> String {
    if namespace_name.is_empty() {
        title.to_string()
    } else {
        format!("{namespace_name}:{title}")
    }
}

fn with_format(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn decode_response(response: reqwest::blocking::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        bail!("MediaWiki API request failed with HTTP {status}");
    }
    let payload: Value = response
        .json()
        .context("failed to decode MediaWiki API JSON response")?;
    check_api_error(payload)
}

fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(payload)
}

fn parse_page_response(response: Value) -> Result<Option<WikiPage>> {
    let parsed: QueryResponse =
        serde_json::from_value(response).context("failed to decode page content API response")?;
    let Some(page) = parsed.query.pages.into_iter().next() else {
        return Ok(None);
    };
    if page.missing.unwrap_or(false) {
        return Ok(None);
    }
    let Some(revision) = page.revisions.into_iter().next() else {
        return Ok(None);
    };
    let content = revision
        .slots
        .and_then(|slots| slots.main)
        .map(|slot| slot.content)
        .ok_or_else(|| anyhow::anyhow!("revision of {} has no main slot", page.title))?;
    Ok(Some(WikiPage {
        title: page.title,
        content,
        timestamp: revision.timestamp,
        revision_id: revision.revid,
    }))
}

fn parse_namespaces(response: Value) -> Result<BTreeMap<i32, String>> {
    let parsed: SiteInfoResponse =
        serde_json::from_value(response).context("failed to decode siteinfo API response")?;
    Ok(parsed
        .query
        .namespaces
        .into_values()
        .map(|namespace| (namespace.id, namespace.name))
        .collect())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    revid: i64,
    timestamp: String,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct SiteInfoResponse {
    #[serde(default)]
    query: SiteInfoPayload,
}

#[derive(Debug, Deserialize, Default)]
struct SiteInfoPayload {
    #[serde(default)]
    namespaces: BTreeMap<String, NamespaceItem>,
}

#[derive(Debug, Deserialize)]
struct NamespaceItem {
    id: i32,
    name: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
    newrevid: Option<i64>,
}
