use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::config::ProjectConfig;
use crate::window::UtcWindow;

/// Per-project counters gathered from the replicas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricBundle {
    pub active_editors: i64,
    pub new_users: i64,
    pub editing_editors: i64,
    pub edited_pages: i64,
    pub edits: i64,
    pub absolute_sum: i64,
    pub positive_sum: i64,
    pub negative_sum: i64,
    pub new_pages: i64,
    pub byte_editors: i64,
    pub files_uploaded: i64,
    pub files_users: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditSummary {
    pub editors: i64,
    pub pages: i64,
    pub edits: i64,
}

/// One revision's size change relative to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionDelta {
    pub actor: String,
    pub byte_change: i64,
    pub is_new: bool,
}

impl RevisionDelta {
    /// Build a delta from replica columns, any of which may be NULL.
    ///
    /// Only `rev_parent_id = 0` marks a page creation. A parent row that is
    /// gone from `revision` (deleted or suppressed) still counts as an edit,
    /// measured from an empty page. NULL lengths count as zero.
    pub fn from_lengths(
        actor: impl Into<String>,
        parent_id: Option<i64>,
        parent_len: Option<i64>,
        len: Option<i64>,
    ) -> Self {
        Self {
            actor: actor.into(),
            byte_change: len.unwrap_or(0) - parent_len.unwrap_or(0),
            is_new: parent_id == Some(0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteDeltaSummary {
    pub absolute_sum: i64,
    pub positive_sum: i64,
    pub negative_sum: i64,
    pub new_pages: i64,
    pub editors: i64,
}

#[derive(Default)]
struct EditorDelta {
    absolute: i64,
    positive: i64,
    negative: i64,
    created: i64,
}

impl ByteDeltaSummary {
    /// Sum per editor first, then across editors.
    pub fn from_deltas(deltas: &[RevisionDelta]) -> Self {
        let mut per_editor: BTreeMap<&str, EditorDelta> = BTreeMap::new();
        for delta in deltas {
            let entry = per_editor.entry(delta.actor.as_str()).or_default();
            entry.absolute += delta.byte_change.abs();
            if delta.byte_change > 0 {
                entry.positive += delta.byte_change;
            } else {
                entry.negative += -delta.byte_change;
            }
            if delta.is_new {
                entry.created += 1;
            }
        }

        let mut summary = ByteDeltaSummary {
            editors: i64::try_from(per_editor.len()).unwrap_or(i64::MAX),
            ..Default::default()
        };
        for editor in per_editor.values() {
            summary.absolute_sum += editor.absolute;
            summary.positive_sum += editor.positive;
            summary.negative_sum += editor.negative;
            summary.new_pages += editor.created;
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCount {
    pub actor: String,
    pub files: i64,
}

/// Read-only access to the wiki replicas, one method per query shape.
pub trait AnalyticsStore {
    /// Users with more than five revisions between `since` and `until`.
    fn active_editors(
        &mut self,
        project: &ProjectConfig,
        users: &[String],
        since: &str,
        until: &str,
    ) -> Result<i64>;
    /// Account-creation log entries by the users between `since` and `until`.
    fn new_users(
        &mut self,
        project: &ProjectConfig,
        users: &[String],
        since: &str,
        until: &str,
    ) -> Result<i64>;
    fn edit_summary(
        &mut self,
        project: &ProjectConfig,
        users: &[String],
        window: &UtcWindow,
        content_only: bool,
    ) -> Result<EditSummary>;
    fn byte_changes(
        &mut self,
        project: &ProjectConfig,
        users: &[String],
        window: &UtcWindow,
        content_only: bool,
    ) -> Result<Vec<RevisionDelta>>;
    /// Page-creating revisions in the File namespace, per user.
    fn file_uploads(
        &mut self,
        project: &ProjectConfig,
        users: &[String],
        window: &UtcWindow,
    ) -> Result<Vec<UploadCount>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMetrics {
    pub project: ProjectConfig,
    pub metrics: MetricBundle,
}

/// Cross-project sums used by the headline lines of the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub active_editors: i64,
    pub new_users: i64,
    pub absolute_sum: i64,
    pub positive_sum: i64,
    pub negative_sum: i64,
    pub edits: i64,
    pub editing_editors: i64,
}

pub fn totals(collected: &[ProjectMetrics]) -> Totals {
    collected
        .iter()
        .map(|entry| &entry.metrics)
        .fold(Totals::default(), |mut acc, metrics| {
            acc.active_editors += metrics.active_editors;
            acc.new_users += metrics.new_users;
            acc.absolute_sum += metrics.absolute_sum;
            acc.positive_sum += metrics.positive_sum;
            acc.negative_sum += metrics.negative_sum;
            acc.edits += metrics.edits;
            acc.editing_editors += metrics.editing_editors;
            acc
        })
}

/// Query every configured project in order. Any store error aborts the run.
pub fn collect<S: AnalyticsStore>(
    projects: &[ProjectConfig],
    users: &BTreeSet<String>,
    window: &UtcWindow,
    content_only: bool,
    store: &mut S,
) -> Result<Vec<ProjectMetrics>> {
    let users = users.iter().cloned().collect::<Vec<_>>();
    let mut collected = Vec::with_capacity(projects.len());

    for project in projects {
        let metrics = if users.is_empty() {
            MetricBundle::default()
        } else if project.is_media() {
            collect_media(project, &users, window, store)
                .with_context(|| format!("failed to collect metrics for {}", project.name))?
        } else {
            collect_content(project, &users, window, content_only, store)
                .with_context(|| format!("failed to collect metrics for {}", project.name))?
        };
        collected.push(ProjectMetrics {
            project: project.clone(),
            metrics,
        });
    }

    Ok(collected)
}

fn collect_content<S: AnalyticsStore>(
    project: &ProjectConfig,
    users: &[String],
    window: &UtcWindow,
    content_only: bool,
    store: &mut S,
) -> Result<MetricBundle> {
    let name = project.name.as_str();
    let mut metrics = MetricBundle::default();

    info!(project = name, "querying active editors");
    let (since, until) = window.activity_span();
    metrics.active_editors = store.active_editors(project, users, &since, &until)?;

    info!(project = name, "querying new users");
    let (since, until) = window.registration_span();
    metrics.new_users = store.new_users(project, users, &since, &until)?;

    info!(project = name, "querying edits");
    let summary = store.edit_summary(project, users, window, content_only)?;
    metrics.editing_editors = summary.editors;
    metrics.edited_pages = summary.pages;
    metrics.edits = summary.edits;

    info!(project = name, "querying byte changes");
    let bytes = ByteDeltaSummary::from_deltas(&store.byte_changes(
        project,
        users,
        window,
        content_only,
    )?);
    metrics.absolute_sum = bytes.absolute_sum;
    metrics.positive_sum = bytes.positive_sum;
    metrics.negative_sum = bytes.negative_sum;
    metrics.new_pages = bytes.new_pages;
    metrics.byte_editors = bytes.editors;

    Ok(metrics)
}

fn collect_media<S: AnalyticsStore>(
    project: &ProjectConfig,
    users: &[String],
    window: &UtcWindow,
    store: &mut S,
) -> Result<MetricBundle> {
    info!(project = project.name.as_str(), "querying file uploads");
    let uploads = store.file_uploads(project, users, window)?;
    Ok(MetricBundle {
        files_uploaded: uploads.iter().map(|row| row.files).sum(),
        files_users: i64::try_from(uploads.len()).unwrap_or(i64::MAX),
        ..Default::default()
    })
}
